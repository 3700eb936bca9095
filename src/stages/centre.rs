//! S4 - centre (zhongshu) views.
//!
//! A centre is an overlap-defined consolidation zone over at least three
//! consecutive strokes. Centres are never stored: they are borrowed views
//! recomputed on demand from a stroke slice.

use serde::Serialize;

use super::stroke::BI;
use crate::bars::Direction;

/// A valid centre over a contiguous stroke slice.
///
/// `zg`/`zd` bound the overlap of the first three strokes; `gg`/`dd` span
/// the extremes of the whole slice. Constructed via [`ZS::over`], which
/// returns `None` when the slice is too short or the first three strokes
/// share no price overlap.
#[derive(Debug, Clone, Serialize)]
pub struct ZS<'a> {
    #[serde(skip)]
    bis: &'a [BI],
    pub zg: f64,
    pub zd: f64,
    pub gg: f64,
    pub dd: f64,
}

impl<'a> ZS<'a> {
    /// Build a centre view over `bis`, or `None` when invalid.
    pub fn over(bis: &'a [BI]) -> Option<Self> {
        if bis.len() < 3 {
            return None;
        }
        let zg = bis[..3].iter().map(BI::high).fold(f64::INFINITY, f64::min);
        let zd = bis[..3].iter().map(BI::low).fold(f64::NEG_INFINITY, f64::max);
        if zd > zg {
            return None;
        }
        let gg = bis.iter().map(|b| b.high()).fold(f64::NEG_INFINITY, f64::max);
        let dd = bis.iter().map(|b| b.low()).fold(f64::INFINITY, f64::min);
        Some(Self { bis, zg, zd, gg, dd })
    }

    #[inline]
    pub fn bis(&self) -> &'a [BI] {
        self.bis
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bis.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bis.is_empty()
    }

    /// Midline of the overlap band.
    #[inline]
    pub fn midline(&self) -> f64 {
        self.zd + (self.zg - self.zd) / 2.0
    }

    /// Direction of the stroke entering the centre.
    #[inline]
    pub fn entry_direction(&self) -> Direction {
        self.bis[0].direction
    }

    /// Direction of the stroke leaving the centre.
    #[inline]
    pub fn exit_direction(&self) -> Direction {
        self.bis[self.bis.len() - 1].direction
    }

    /// Whether a stroke's price range intersects the overlap band.
    #[inline]
    fn overlaps(&self, bi: &BI) -> bool {
        bi.low() <= self.zg && bi.high() >= self.zd
    }
}

/// Greedily extract non-overlapping centres from a stroke list.
///
/// Slides from the start: each centre seeds on the first valid three-stroke
/// window and consumes further strokes while they keep intersecting the
/// centre's `[zd, zg]` band.
pub fn centre_sequence(bis: &[BI]) -> Vec<ZS<'_>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 3 <= bis.len() {
        let Some(seed) = ZS::over(&bis[i..i + 3]) else {
            i += 1;
            continue;
        };
        let mut end = i + 3;
        while end < bis.len() && seed.overlaps(&bis[end]) {
            end += 1;
        }
        // Re-window over the full consumed span; zg/zd stay those of the
        // seed's first three strokes.
        if let Some(zs) = ZS::over(&bis[i..end]) {
            out.push(zs);
        }
        i = end;
    }
    out
}
