//! Stateless signal layer.
//!
//! Signal functions are pure consumers of the analyzer's public snapshot:
//! `(analyzer, params) -> Signal`. They are not part of the core pipeline
//! and never mutate analyzer state. A function that cannot evaluate (too few
//! bars, no strokes yet) returns the well-known "other" label instead of
//! raising.
//!
//! Functions are registered under explicit names in a [`SignalRegistry`];
//! parameters travel as a small `name -> f64` map.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bars::Direction;
use crate::stages::centre::ZS;
use crate::stages::fractal::{FxPower, Mark};
use crate::Analyzer;

/// Wildcard label: matches any value on either side of a comparison.
pub const WILDCARD: &str = "any";

/// Fallback value for signals that cannot be evaluated.
pub const OTHER: &str = "other";

// ============================================================
// SIGNAL
// ============================================================

/// A compact labelled tuple produced by a signal function.
///
/// `k1..k3` identify the signal (typically symbol, frequency, signal name);
/// `v1..v3` carry the labels; `score` is a 0..=100 confidence hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
  pub k1: String,
  pub k2: String,
  pub k3: String,
  pub v1: String,
  pub v2: String,
  pub v3: String,
  pub score: u8,
}

impl Signal {
  pub fn new(
    k: (&str, &str, &str),
    v: (&str, &str, &str),
    score: u8,
  ) -> Self {
    Self {
      k1: k.0.into(),
      k2: k.1.into(),
      k3: k.2.into(),
      v1: v.0.into(),
      v2: v.1.into(),
      v3: v.2.into(),
      score: score.min(100),
    }
  }

  /// Joined identity key, `k1_k2_k3`.
  pub fn key(&self) -> String {
    format!("{}_{}_{}", self.k1, self.k2, self.k3)
  }

  /// Joined value labels, `v1_v2_v3`.
  pub fn value(&self) -> String {
    format!("{}_{}_{}", self.v1, self.v2, self.v3)
  }

  /// Wildcard-aware match: two signals match when their keys are equal and
  /// every value slot is equal or wildcarded on either side.
  pub fn matches(&self, other: &Signal) -> bool {
    fn slot(a: &str, b: &str) -> bool {
      a == WILDCARD || b == WILDCARD || a == b
    }
    self.k1 == other.k1
      && self.k2 == other.k2
      && self.k3 == other.k3
      && slot(&self.v1, &other.v1)
      && slot(&self.v2, &other.v2)
      && slot(&self.v3, &other.v3)
  }
}

// ============================================================
// REGISTRY
// ============================================================

/// Parameters for a signal function, `name -> f64` with defaults applied by
/// the function itself.
pub type SignalParams = HashMap<String, f64>;

/// A registered signal function.
pub type SignalFn = fn(&Analyzer, &SignalParams) -> Signal;

/// Explicit-name registry of signal functions.
///
/// Replaces reflection-based dispatch: hosts register `(name, function)`
/// pairs once and evaluate by name.
#[derive(Default)]
pub struct SignalRegistry {
  entries: HashMap<&'static str, SignalFn>,
}

impl SignalRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry preloaded with the builtin catalogue.
  pub fn with_builtins() -> Self {
    let mut r = Self::new();
    r.register("bi_direction", bi_direction);
    r.register("fx_power", fx_power);
    r.register("zs_presence", zs_presence);
    r
  }

  pub fn register(&mut self, name: &'static str, f: SignalFn) {
    self.entries.insert(name, f);
  }

  pub fn get(&self, name: &str) -> Option<SignalFn> {
    self.entries.get(name).copied()
  }

  pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
    self.entries.keys().copied()
  }

  /// Evaluate a registered function; `None` for unknown names.
  pub fn evaluate(
    &self,
    name: &str,
    analyzer: &Analyzer,
    params: &SignalParams,
  ) -> Option<Signal> {
    self.get(name).map(|f| f(analyzer, params))
  }
}

#[inline]
fn get_param(params: &SignalParams, key: &str, default: f64) -> f64 {
  params.get(key).copied().unwrap_or(default)
}

// ============================================================
// BUILTIN SIGNAL FUNCTIONS
// ============================================================

/// Direction of the last finished stroke.
pub fn bi_direction(a: &Analyzer, _params: &SignalParams) -> Signal {
  let k = (a.symbol(), a.freq(), "bi_direction");
  match a.last_finished_bi() {
    Some(bi) => {
      let dir = match bi.direction {
        Direction::Up => "up",
        Direction::Down => "down",
      };
      Signal::new(k, (dir, WILDCARD, WILDCARD), 80)
    }
    None => Signal::new(k, (OTHER, WILDCARD, WILDCARD), 0),
  }
}

/// Mark and strength of the last confirmed fractal.
pub fn fx_power(a: &Analyzer, _params: &SignalParams) -> Signal {
  let k = (a.symbol(), a.freq(), "fx_power");
  match a.fxs().last() {
    Some(fx) => {
      let mark = match fx.mark {
        Mark::Top => "top",
        Mark::Bottom => "bottom",
      };
      let power = match fx.power {
        FxPower::Strong => "strong",
        FxPower::Weak => "weak",
      };
      Signal::new(k, (mark, power, WILDCARD), 80)
    }
    None => Signal::new(k, (OTHER, WILDCARD, WILDCARD), 0),
  }
}

/// Whether the last `n` strokes (param `n`, default 3) form a valid centre.
pub fn zs_presence(a: &Analyzer, params: &SignalParams) -> Signal {
  let n = get_param(params, "n", 3.0) as usize;
  let k = (a.symbol(), a.freq(), "zs_presence");
  let bis = a.bis();
  if n < 3 || bis.len() < n {
    return Signal::new(k, (OTHER, WILDCARD, WILDCARD), 0);
  }
  match ZS::over(&bis[bis.len() - n..]) {
    Some(zs) => {
      let exit = match zs.exit_direction() {
        Direction::Up => "up",
        Direction::Down => "down",
      };
      Signal::new(k, ("inside", exit, WILDCARD), 70)
    }
    None => Signal::new(k, ("none", WILDCARD, WILDCARD), 70),
  }
}
