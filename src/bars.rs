//! Bar-level data model: raw input bars and containment-merged bars.
//!
//! A [`RawBar`] is the immutable input record fed to the analyzer. A
//! [`NewBar`] is the result of folding containment-related raw bars into a
//! single entity so that no two consecutive merged bars contain each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================
// DIRECTION
// ============================================================

/// Direction of a fold or a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    #[inline]
    pub fn is_up(self) -> bool {
        matches!(self, Direction::Up)
    }

    #[inline]
    pub fn is_down(self) -> bool {
        matches!(self, Direction::Down)
    }

    /// The opposite direction.
    #[inline]
    pub fn flip(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    /// Infer the direction between two consecutive merged bars.
    ///
    /// `Up` when the later bar makes a higher high, `Down` when it makes a
    /// lower low. The exact-tie case (equal high and equal low) resolves to
    /// `Up`.
    #[inline]
    pub fn infer(prev: &NewBar, cur: &NewBar) -> Self {
        if cur.high > prev.high {
            Direction::Up
        } else if cur.low < prev.low {
            Direction::Down
        } else {
            Direction::Up
        }
    }
}

// ============================================================
// RAW BAR
// ============================================================

/// One immutable OHLCV observation at the analyzer's base frequency.
///
/// Invariants (enforced at the analyzer boundary):
/// `low <= min(open, close) <= max(open, close) <= high`, all prices
/// positive and finite, `dt` strictly increasing and `id` monotone
/// non-decreasing within a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    pub symbol: String,
    pub id: u64,
    pub dt: DateTime<Utc>,
    pub freq: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub amount: f64,
}

impl RawBar {
    #[inline]
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    #[inline]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    #[inline]
    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }
}

// ============================================================
// MERGED BAR
// ============================================================

/// A merged bar: one or more raw bars with containment relations folded.
///
/// `id` is the first folded raw bar's id; `dt` tracks the last folded raw
/// bar. `elements` keeps the folded raw bars in arrival order and is never
/// empty. Consecutive merged bars never contain each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBar {
    pub symbol: String,
    pub id: u64,
    pub dt: DateTime<Utc>,
    pub freq: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub amount: f64,
    pub elements: Vec<RawBar>,
}

impl NewBar {
    /// Wrap a single raw bar as a merged bar.
    pub fn from_raw(bar: RawBar) -> Self {
        Self {
            symbol: bar.symbol.clone(),
            id: bar.id,
            dt: bar.dt,
            freq: bar.freq.clone(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            amount: bar.amount,
            elements: vec![bar],
        }
    }

    /// Containment relation: this bar's range fully covers `other`'s.
    #[inline]
    pub fn contains(&self, other_high: f64, other_low: f64) -> bool {
        self.high >= other_high && self.low <= other_low
    }

    /// Whether the bar draws up-coloured (close at or above open).
    #[inline]
    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }

    #[inline]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}
