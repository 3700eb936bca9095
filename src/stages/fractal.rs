//! S2 - fractal detector.
//!
//! Scans the last three merged bars for a confirmed top or bottom pivot.
//! Fractals are immutable once emitted: a later fold of the live tail bar
//! never revises an emitted fractal, and the same middle bar is never
//! confirmed twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bars::NewBar;

// ============================================================
// TYPES
// ============================================================

/// Fractal kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mark {
    Top,
    Bottom,
}

impl Mark {
    #[inline]
    pub fn flip(self) -> Self {
        match self {
            Mark::Top => Mark::Bottom,
            Mark::Bottom => Mark::Top,
        }
    }
}

/// Qualitative fractal strength, consumed by signal functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FxPower {
    Strong,
    Weak,
}

/// A confirmed fractal over three consecutive merged bars `[L, M, R]`.
///
/// `fx` is the pivot price (`M.high` for a top, `M.low` for a bottom);
/// `high`/`low` span the whole triple. `elements` are owned snapshots taken
/// at confirmation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FX {
    pub symbol: String,
    pub dt: DateTime<Utc>,
    pub mark: Mark,
    pub high: f64,
    pub low: f64,
    pub fx: f64,
    pub power: FxPower,
    pub elements: [NewBar; 3],
}

impl FX {
    #[inline]
    pub fn is_top(&self) -> bool {
        self.mark == Mark::Top
    }

    #[inline]
    pub fn is_bottom(&self) -> bool {
        self.mark == Mark::Bottom
    }
}

// ============================================================
// DETECTION
// ============================================================

/// Check the tail triple of the merged-bar list for a new fractal.
///
/// Returns at most one fractal per call. `last_fx` guards against
/// re-confirming a middle bar whose right neighbour folded after the first
/// confirmation; emitted fractal timestamps are therefore strictly
/// increasing.
pub fn check(newbars: &[NewBar], last_fx: Option<&FX>) -> Option<FX> {
    let n = newbars.len();
    if n < 3 {
        return None;
    }
    let (l, m, r) = (&newbars[n - 3], &newbars[n - 2], &newbars[n - 1]);

    if let Some(prev) = last_fx {
        if m.dt <= prev.dt {
            return None;
        }
    }

    let is_top = m.high > l.high && m.high > r.high && m.low > l.low && m.low > r.low;
    let is_bottom = m.low < l.low && m.low < r.low && m.high < l.high && m.high < r.high;

    let (mark, fx) = if is_top {
        (Mark::Top, m.high)
    } else if is_bottom {
        (Mark::Bottom, m.low)
    } else {
        return None;
    };

    // Strong when the right bar closes beyond the middle bar's far extreme.
    let power = match mark {
        Mark::Top if r.close < m.low => FxPower::Strong,
        Mark::Bottom if r.close > m.high => FxPower::Strong,
        _ => FxPower::Weak,
    };

    debug!(symbol = %m.symbol, dt = %m.dt, ?mark, fx, ?power, "fractal confirmed");

    Some(FX {
        symbol: m.symbol.clone(),
        dt: m.dt,
        mark,
        high: l.high.max(m.high).max(r.high),
        low: l.low.min(m.low).min(r.low),
        fx,
        power,
        elements: [l.clone(), m.clone(), r.clone()],
    })
}
