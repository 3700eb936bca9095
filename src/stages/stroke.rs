//! S3 - stroke builder.
//!
//! Pairs confirmed opposite fractals into strokes under minimum-span,
//! extremum-dominance and interior-fractal rules, and maintains the
//! provisional unfinished tail. On each update the builder either extends
//! the tail's closing fractal, freezes the tail and opens a successor of
//! the opposite direction, or defers the new fractal for later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::fractal::{Mark, FX};
use crate::bars::{Direction, NewBar};

// ============================================================
// RULES
// ============================================================

/// Stroke construction parameters, fixed at analyzer construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokeRules {
    /// Minimum count of merged bars per stroke, both fractal bars included.
    pub min_bi_len: usize,
    /// Optional minimum stroke price change in basis points.
    pub bi_change_th_bp: Option<f64>,
}

// ============================================================
// STROKE
// ============================================================

/// A directional move from an opening fractal to a closing fractal.
///
/// The last stroke of the builder's list may be unfinished: its `fx_b` can
/// still move to a more extreme same-mark fractal. Once frozen, every field
/// is immutable. Derived quantities are computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BI {
    pub symbol: String,
    pub fx_a: FX,
    pub fx_b: FX,
    /// Fractals confirmed within `[fx_a.dt, fx_b.dt]`; while unfinished,
    /// also any deferred fractals seen after `fx_b`.
    pub fxs: Vec<FX>,
    pub direction: Direction,
    /// Merged bars with `fx_a.dt <= dt <= fx_b.dt`.
    pub bars: Vec<NewBar>,
    pub(crate) frozen: bool,
}

impl BI {
    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Highest high over the stroke's bars.
    pub fn high(&self) -> f64 {
        self.bars
            .iter()
            .map(|b| b.high)
            .fold(self.fx_a.high.max(self.fx_b.high), f64::max)
    }

    /// Lowest low over the stroke's bars.
    pub fn low(&self) -> f64 {
        self.bars
            .iter()
            .map(|b| b.low)
            .fold(self.fx_a.low.min(self.fx_b.low), f64::min)
    }

    /// Absolute pivot-to-pivot price move.
    #[inline]
    pub fn power_price(&self) -> f64 {
        (self.fx_b.fx - self.fx_a.fx).abs()
    }

    /// Total traded volume over the stroke's bars.
    pub fn power_volume(&self) -> f64 {
        self.bars.iter().map(|b| b.volume).sum()
    }

    /// Merged-bar span of the stroke.
    #[inline]
    pub fn length(&self) -> usize {
        self.bars.len()
    }

    /// Relative pivot-to-pivot change.
    #[inline]
    pub fn change(&self) -> f64 {
        (self.fx_b.fx - self.fx_a.fx) / self.fx_a.fx
    }

    /// R-squared of a least-squares line over the bars' closes. Returns 0.0
    /// for degenerate strokes (fewer than two bars or flat closes).
    pub fn rsq(&self) -> f64 {
        let n = self.bars.len();
        if n < 2 {
            return 0.0;
        }
        let nf = n as f64;
        let x_mean = (nf - 1.0) / 2.0;
        let y_mean = self.bars.iter().map(|b| b.close).sum::<f64>() / nf;
        let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
        for (i, b) in self.bars.iter().enumerate() {
            let dx = i as f64 - x_mean;
            let dy = b.close - y_mean;
            sxx += dx * dx;
            sxy += dx * dy;
            syy += dy * dy;
        }
        if sxx <= f64::EPSILON || syy <= f64::EPSILON {
            return 0.0;
        }
        (sxy * sxy) / (sxx * syy)
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Stroke list with a provisionally editable tail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeBuilder {
    rules: StrokeRules,
    bis: Vec<BI>,
    /// Fractals seen since the last frozen stroke's closing fractal, before
    /// the first stroke opens.
    ubi_fxs: Vec<FX>,
}

impl StrokeBuilder {
    pub fn new(rules: StrokeRules) -> Self {
        Self {
            rules,
            bis: Vec::new(),
            ubi_fxs: Vec::new(),
        }
    }

    #[inline]
    pub fn bis(&self) -> &[BI] {
        &self.bis
    }

    #[inline]
    pub fn ubi_fxs(&self) -> &[FX] {
        &self.ubi_fxs
    }

    /// The unfinished tail stroke, if any.
    #[inline]
    pub fn unfinished(&self) -> Option<&BI> {
        self.bis.last().filter(|bi| !bi.frozen)
    }

    /// Drop frozen strokes and accumulated fractals entirely before
    /// `cutoff`. The unfinished tail is never dropped.
    pub(crate) fn trim_before(&mut self, cutoff: DateTime<Utc>) {
        self.bis.retain(|bi| !bi.frozen || bi.fx_b.dt >= cutoff);
        self.ubi_fxs.retain(|f| f.dt >= cutoff);
    }

    /// Advance the builder by one update: the merged list changed and S2 may
    /// have confirmed at most one new fractal.
    pub fn on_bar(&mut self, newbars: &[NewBar], new_fx: Option<&FX>) {
        let Some(fx) = new_fx else { return };
        if self.unfinished().is_some() {
            self.on_fx_with_tail(newbars, fx);
        } else {
            self.ubi_fxs.push(fx.clone());
            self.try_open_first(newbars);
        }
    }

    /// Seed phase: open the first stroke once two opposite-mark fractals in
    /// `ubi_fxs` satisfy the eligibility predicate. The stroke runs from the
    /// earliest eligible opening fractal to the newest fractal.
    fn try_open_first(&mut self, newbars: &[NewBar]) {
        let Some(fb) = self.ubi_fxs.last().cloned() else { return };
        let candidate = self.ubi_fxs[..self.ubi_fxs.len() - 1]
            .iter()
            .position(|fa| {
                fa.mark != fb.mark && self.eligible(fa, &fb, newbars, &self.ubi_fxs)
            });
        let Some(i) = candidate else { return };

        let fa = self.ubi_fxs[i].clone();
        let direction = if fa.is_bottom() {
            Direction::Up
        } else {
            Direction::Down
        };
        let fxs: Vec<FX> = self
            .ubi_fxs
            .iter()
            .filter(|f| f.dt >= fa.dt && f.dt <= fb.dt)
            .cloned()
            .collect();
        let bars = slice_between(newbars, fa.dt, fb.dt);

        debug!(
            symbol = %fa.symbol,
            ?direction,
            fx_a = %fa.dt,
            fx_b = %fb.dt,
            span = bars.len(),
            "first stroke opened"
        );

        self.bis.push(BI {
            symbol: fa.symbol.clone(),
            fx_a: fa,
            fx_b: fb,
            fxs,
            direction,
            bars,
            frozen: false,
        });
        self.ubi_fxs.clear();
    }

    /// A new fractal arrived while the tail stroke is unfinished.
    fn on_fx_with_tail(&mut self, newbars: &[NewBar], fx: &FX) {
        let idx = self.bis.len() - 1;
        self.bis[idx].fxs.push(fx.clone());

        if fx.mark == self.bis[idx].fx_b.mark {
            self.maybe_extend(idx, newbars, fx);
        } else {
            self.maybe_freeze_and_open(idx, newbars, fx);
        }
    }

    /// Same-mark fractal: replace the provisional closing fractal when the
    /// new one is strictly more extreme; on an exact price tie the earlier
    /// fractal is kept.
    fn maybe_extend(&mut self, idx: usize, newbars: &[NewBar], fx: &FX) {
        let cur = &mut self.bis[idx];
        let more_extreme = match cur.direction {
            Direction::Up => fx.fx > cur.fx_b.fx,
            Direction::Down => fx.fx < cur.fx_b.fx,
        };
        if !more_extreme {
            return;
        }
        cur.fx_b = fx.clone();
        cur.bars = slice_between(newbars, cur.fx_a.dt, cur.fx_b.dt);
        debug!(
            symbol = %cur.symbol,
            ?cur.direction,
            fx_b = %cur.fx_b.dt,
            price = cur.fx_b.fx,
            "unfinished stroke extended"
        );
    }

    /// Opposite-mark fractal: freeze the tail and open the successor when
    /// the candidate from `fx_b` to the new fractal is eligible; otherwise
    /// the fractal stays deferred in the tail's `fxs`.
    fn maybe_freeze_and_open(&mut self, idx: usize, newbars: &[NewBar], fx: &FX) {
        let (fa, interior): (FX, Vec<FX>) = {
            let cur = &self.bis[idx];
            let fa = cur.fx_b.clone();
            let interior = cur
                .fxs
                .iter()
                .filter(|f| f.dt > fa.dt && f.dt < fx.dt)
                .cloned()
                .collect();
            (fa, interior)
        };

        if !self.eligible(&fa, fx, newbars, &interior) {
            return;
        }

        let cur = &mut self.bis[idx];
        let carried: Vec<FX> = cur.fxs.iter().filter(|f| f.dt >= fa.dt).cloned().collect();
        cur.fxs.retain(|f| f.dt <= fa.dt);
        cur.frozen = true;
        debug!(
            symbol = %cur.symbol,
            ?cur.direction,
            fx_a = %cur.fx_a.dt,
            fx_b = %cur.fx_b.dt,
            "stroke frozen"
        );

        let direction = cur.direction.flip();
        let bars = slice_between(newbars, fa.dt, fx.dt);
        self.bis.push(BI {
            symbol: fa.symbol.clone(),
            fx_a: fa,
            fx_b: fx.clone(),
            fxs: carried,
            direction,
            bars,
            frozen: false,
        });
        debug!(?direction, "successor stroke opened");
    }

    /// Minimum-stroke eligibility predicate for a candidate from `fa` to
    /// `fb` (opposite marks).
    ///
    /// 1. At least `min_bi_len` merged bars lie in `[fa.dt, fb.dt]`.
    /// 2. `fb`'s pivot is the extreme of the candidate range and `fa`'s far
    ///    extreme bounds the other side.
    /// 3. No interior fractal of `fb`'s mark reaches `fb`'s pivot.
    /// 4. The optional basis-point change threshold is met.
    fn eligible(&self, fa: &FX, fb: &FX, newbars: &[NewBar], interior_fxs: &[FX]) -> bool {
        let span = slice_bounds(newbars, fa.dt, fb.dt);
        let bars = &newbars[span.0..span.1];
        if bars.len() < self.rules.min_bi_len {
            return false;
        }

        let mut between = bars.iter().filter(|b| b.dt > fa.dt && b.dt < fb.dt);
        let dominated = match fb.mark {
            Mark::Top => between.all(|b| b.high <= fb.high && b.low >= fa.low),
            Mark::Bottom => between.all(|b| b.low >= fb.low && b.high <= fa.high),
        };
        if !dominated {
            return false;
        }

        let interior_breaks = interior_fxs
            .iter()
            .filter(|f| f.dt > fa.dt && f.dt < fb.dt && f.mark == fb.mark)
            .any(|f| match fb.mark {
                Mark::Top => f.fx >= fb.fx,
                Mark::Bottom => f.fx <= fb.fx,
            });
        if interior_breaks {
            return false;
        }

        if let Some(th) = self.rules.bi_change_th_bp {
            let change_bp = ((fb.fx - fa.fx) / fa.fx).abs() * 10_000.0;
            if change_bp < th {
                return false;
            }
        }
        true
    }
}

// ============================================================
// SLICE HELPERS
// ============================================================

/// Index bounds of the merged bars with `from <= dt <= to`.
#[inline]
fn slice_bounds(newbars: &[NewBar], from: DateTime<Utc>, to: DateTime<Utc>) -> (usize, usize) {
    let lo = newbars.partition_point(|b| b.dt < from);
    let hi = newbars.partition_point(|b| b.dt <= to);
    (lo, hi)
}

/// Owned snapshot of the merged bars with `from <= dt <= to`.
fn slice_between(newbars: &[NewBar], from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<NewBar> {
    let (lo, hi) = slice_bounds(newbars, from, to);
    newbars[lo..hi].to_vec()
}
