//! # chanlyzer - incremental Chan-theory structural analyzer
//!
//! A streaming engine that consumes time-ordered OHLCV bars for a single
//! instrument at a single base frequency and maintains a layered structural
//! decomposition: merged bars (containment folded), fractals (three-bar
//! pivots), strokes (moves between confirmed opposite fractals) and centres
//! (overlap-defined consolidation views).
//!
//! Every public query is answerable in O(1) or amortised O(1) after each
//! bar update. Later bars can retroactively revise the provisional tail of
//! each stage; frozen history is immutable.
//!
//! ## Quick Start
//!
//! ```rust
//! use chanlyzer::prelude::*;
//! use chrono::{TimeZone, Utc};
//!
//! let mut analyzer = Analyzer::with_defaults("BTCUSDT", "1m");
//!
//! let bar = RawBar {
//!     symbol: "BTCUSDT".into(),
//!     id: 1,
//!     dt: Utc.timestamp_opt(60, 0).unwrap(),
//!     freq: "1m".into(),
//!     open: 100.0,
//!     high: 101.0,
//!     low: 99.5,
//!     close: 100.5,
//!     volume: 10.0,
//!     amount: 1_000.0,
//! };
//! analyzer.update(bar).unwrap();
//!
//! assert_eq!(analyzer.bars_merged().len(), 1);
//! assert!(analyzer.bis().is_empty());
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod bars;
pub mod signals;
pub mod stages;

use bars::{Direction, NewBar, RawBar};
use stages::centre::{centre_sequence, ZS};
use stages::fractal::{self, FX};
use stages::merge;
use stages::stroke::{StrokeBuilder, StrokeRules, BI};

pub mod prelude {
    pub use crate::{
        bars::{Direction, NewBar, RawBar},
        replay_parallel,
        signals::{Signal, SignalFn, SignalParams, SignalRegistry, OTHER, WILDCARD},
        stages::{centre_sequence, FxPower, Mark, BI, FX, ZS},
        Analyzer, AnalyzerConfig, AnalyzerError, MinBiLen, ReplayError, Result, SideTable,
        UbiSummary,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, AnalyzerError>;

/// Errors surfaced by the analyzer. All of them are caller bugs: a failed
/// `update` leaves the analyzer state unchanged.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalyzerError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid bar at {dt}: {reason}")]
    InvalidBar {
        dt: DateTime<Utc>,
        reason: &'static str,
    },

    #[error("Non-monotonic timestamp: got {got}, last accepted {last}")]
    NonMonotonicTimestamp {
        got: DateTime<Utc>,
        last: DateTime<Utc>,
    },
}

// ============================================================
// VALIDATED CONFIG TYPES
// ============================================================

/// Minimum merged-bar span per stroke (must be in `[5, 13]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MinBiLen(usize);

impl MinBiLen {
    pub const MIN: usize = 5;
    pub const MAX: usize = 13;

    /// Create a new MinBiLen, validating the value is in `[5, 13]`.
    pub fn new(value: usize) -> Result<Self> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(AnalyzerError::OutOfRange {
                field: "min_bi_len",
                value: value as f64,
                min: Self::MIN as f64,
                max: Self::MAX as f64,
            });
        }
        Ok(Self(value))
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for MinBiLen {
    fn default() -> Self {
        Self(7)
    }
}

impl serde::Serialize for MinBiLen {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for MinBiLen {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        MinBiLen::new(value).map_err(serde::de::Error::custom)
    }
}

/// Immutable analyzer configuration, passed once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Minimum merged-bar count per stroke.
    pub min_bi_len: MinBiLen,
    /// Optional minimum stroke price change in basis points; `None` disables
    /// the threshold.
    pub bi_change_th_bp: Option<f64>,
    /// Optional bound on retained raw-bar history. `None` (the default)
    /// keeps everything; trimming never touches the unfinished tail.
    pub max_history: Option<usize>,
}

impl AnalyzerConfig {
    /// Validated construction from plain values.
    pub fn new(
        min_bi_len: usize,
        bi_change_th_bp: Option<f64>,
        max_history: Option<usize>,
    ) -> Result<Self> {
        if let Some(th) = bi_change_th_bp {
            if !th.is_finite() || th < 0.0 {
                return Err(AnalyzerError::InvalidValue(
                    "bi_change_th_bp must be finite and non-negative",
                ));
            }
        }
        if max_history == Some(0) {
            return Err(AnalyzerError::InvalidValue("max_history must be > 0"));
        }
        Ok(Self {
            min_bi_len: MinBiLen::new(min_bi_len)?,
            bi_change_th_bp,
            max_history,
        })
    }
}

// ============================================================
// SIDE TABLE
// ============================================================

/// Indicator side table: `(bar id, key) -> value`.
///
/// Replaces a free-form per-bar cache dict. Ownership is by key-namespace
/// convention (e.g. `"MACD12#26#9"`); the core never reads values, it only
/// drops entries for bars trimmed out of history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideTable {
    entries: HashMap<u64, HashMap<String, f64>>,
}

impl SideTable {
    pub fn insert(&mut self, bar_id: u64, key: impl Into<String>, value: f64) {
        self.entries.entry(bar_id).or_default().insert(key.into(), value);
    }

    pub fn get(&self, bar_id: u64, key: &str) -> Option<f64> {
        self.entries.get(&bar_id).and_then(|m| m.get(key)).copied()
    }

    pub fn remove(&mut self, bar_id: u64, key: &str) -> Option<f64> {
        self.entries.get_mut(&bar_id).and_then(|m| m.remove(key))
    }

    /// Total number of stored values.
    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(HashMap::is_empty)
    }

    fn retain_from(&mut self, min_bar_id: u64) {
        self.entries.retain(|id, _| *id >= min_bar_id);
    }
}

// ============================================================
// UNFINISHED-TAIL SUMMARY
// ============================================================

/// Lightweight snapshot of the unfinished tail, returned by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UbiSummary {
    pub direction: Direction,
    pub high: f64,
    pub low: f64,
    pub fxs: Vec<FX>,
    pub raw_bars: Vec<RawBar>,
}

// ============================================================
// ANALYZER
// ============================================================

/// The incremental structural analyzer for one `(symbol, freq)` stream.
///
/// Single-threaded: one bar is processed to completion before the next.
/// Instances are independent; drive several in parallel with
/// [`replay_parallel`]. The whole analyzer is serde-serializable, which is
/// the supported black-box checkpoint mechanism.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analyzer {
    symbol: String,
    freq: String,
    config: AnalyzerConfig,
    bars_raw: Vec<RawBar>,
    bars_merged: Vec<NewBar>,
    fxs: Vec<FX>,
    strokes: StrokeBuilder,
    side: SideTable,
}

impl Analyzer {
    pub fn new(symbol: impl Into<String>, freq: impl Into<String>, config: AnalyzerConfig) -> Self {
        Self {
            symbol: symbol.into(),
            freq: freq.into(),
            config,
            bars_raw: Vec::new(),
            bars_merged: Vec::new(),
            fxs: Vec::new(),
            strokes: StrokeBuilder::new(StrokeRules {
                min_bi_len: config.min_bi_len.get(),
                bi_change_th_bp: config.bi_change_th_bp,
            }),
            side: SideTable::default(),
        }
    }

    /// Analyzer with the default configuration.
    pub fn with_defaults(symbol: impl Into<String>, freq: impl Into<String>) -> Self {
        Self::new(symbol, freq, AnalyzerConfig::default())
    }

    // ===========================================
    // UPDATE
    // ===========================================

    /// Advance the analyzer by one bar.
    ///
    /// Re-feeding a bar identical to the last accepted one is a silent
    /// no-op. Any other violation of the input contract fails without
    /// touching analyzer state.
    pub fn update(&mut self, bar: RawBar) -> Result<()> {
        if let Some(last) = self.bars_raw.last() {
            if *last == bar {
                return Ok(());
            }
            if bar.dt <= last.dt {
                return Err(AnalyzerError::NonMonotonicTimestamp {
                    got: bar.dt,
                    last: last.dt,
                });
            }
            if bar.id < last.id {
                return Err(AnalyzerError::InvalidBar {
                    dt: bar.dt,
                    reason: "bar id went backwards",
                });
            }
        }
        self.validate_bar(&bar)?;

        self.bars_raw.push(bar.clone());
        merge::fold(&mut self.bars_merged, bar);

        let new_fx = fractal::check(&self.bars_merged, self.fxs.last());
        if let Some(fx) = &new_fx {
            self.fxs.push(fx.clone());
        }
        self.strokes.on_bar(&self.bars_merged, new_fx.as_ref());

        self.trim();
        Ok(())
    }

    /// Feed a bar sequence in order, stopping at the first invalid bar.
    pub fn replay(&mut self, bars: impl IntoIterator<Item = RawBar>) -> Result<()> {
        for bar in bars {
            self.update(bar)?;
        }
        Ok(())
    }

    fn validate_bar(&self, bar: &RawBar) -> Result<()> {
        if bar.symbol != self.symbol {
            return Err(AnalyzerError::InvalidBar {
                dt: bar.dt,
                reason: "symbol does not match analyzer",
            });
        }
        if bar.freq != self.freq {
            return Err(AnalyzerError::InvalidBar {
                dt: bar.dt,
                reason: "freq does not match analyzer",
            });
        }
        let prices = [bar.open, bar.high, bar.low, bar.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(AnalyzerError::InvalidBar {
                dt: bar.dt,
                reason: "NaN or infinite price",
            });
        }
        if prices.iter().any(|p| *p <= 0.0) {
            return Err(AnalyzerError::InvalidBar {
                dt: bar.dt,
                reason: "non-positive price",
            });
        }
        if !(bar.low <= bar.open.min(bar.close) && bar.open.max(bar.close) <= bar.high) {
            return Err(AnalyzerError::InvalidBar {
                dt: bar.dt,
                reason: "OHLC ordering violated",
            });
        }
        if !bar.volume.is_finite() || !bar.amount.is_finite() || bar.volume < 0.0 || bar.amount < 0.0
        {
            return Err(AnalyzerError::InvalidBar {
                dt: bar.dt,
                reason: "negative or non-finite volume/amount",
            });
        }
        Ok(())
    }

    /// Bounded-history trim. Drops head bars and orphaned merged bars,
    /// fractals and frozen strokes; the unfinished tail and the three-bar
    /// fractal window are always preserved.
    fn trim(&mut self) {
        let Some(max) = self.config.max_history else {
            return;
        };
        if self.bars_raw.len() <= max {
            return;
        }

        let excess = self.bars_raw.len() - max;
        let mut cutoff = self.bars_raw[excess].dt;
        if let Some(ubi) = self.strokes.unfinished() {
            cutoff = cutoff.min(ubi.fx_a.elements[0].dt);
        }
        if self.bars_merged.len() >= 3 {
            cutoff = cutoff.min(self.bars_merged[self.bars_merged.len() - 3].dt);
        }

        self.bars_raw.retain(|b| b.dt >= cutoff);
        self.bars_merged.retain(|b| b.dt >= cutoff);
        self.fxs.retain(|f| f.dt >= cutoff);
        self.strokes.trim_before(cutoff);
        if let Some(first) = self.bars_raw.first() {
            self.side.retain_from(first.id);
        }
        debug!(symbol = %self.symbol, %cutoff, retained = self.bars_raw.len(), "history trimmed");
    }

    // ===========================================
    // SNAPSHOTS
    // ===========================================

    #[inline]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[inline]
    pub fn freq(&self) -> &str {
        &self.freq
    }

    #[inline]
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    #[inline]
    pub fn bars_raw(&self) -> &[RawBar] {
        &self.bars_raw
    }

    #[inline]
    pub fn bars_merged(&self) -> &[NewBar] {
        &self.bars_merged
    }

    #[inline]
    pub fn fxs(&self) -> &[FX] {
        &self.fxs
    }

    /// All strokes; the last one may be unfinished.
    #[inline]
    pub fn bis(&self) -> &[BI] {
        self.strokes.bis()
    }

    /// Fractals accumulated before the first stroke opens.
    #[inline]
    pub fn ubi_fxs(&self) -> &[FX] {
        self.strokes.ubi_fxs()
    }

    #[inline]
    pub fn last_bi(&self) -> Option<&BI> {
        self.strokes.bis().last()
    }

    /// Most recent frozen stroke.
    pub fn last_finished_bi(&self) -> Option<&BI> {
        self.strokes.bis().iter().rev().find(|bi| bi.is_frozen())
    }

    #[inline]
    pub fn end_dt(&self) -> Option<DateTime<Utc>> {
        self.bars_raw.last().map(|b| b.dt)
    }

    #[inline]
    pub fn latest_price(&self) -> Option<f64> {
        self.bars_raw.last().map(|b| b.close)
    }

    /// Summary of the unfinished tail, or `None` before any merged bar.
    pub fn ubi(&self) -> Option<UbiSummary> {
        if let Some(bi) = self.strokes.unfinished() {
            return Some(UbiSummary {
                direction: bi.direction,
                high: bi.high(),
                low: bi.low(),
                fxs: bi.fxs.clone(),
                raw_bars: bi.bars.iter().flat_map(|b| b.elements.iter().cloned()).collect(),
            });
        }

        // No unfinished stroke: summarise everything after the last frozen
        // stroke's closing fractal.
        let tail_start = self
            .last_finished_bi()
            .map(|bi| bi.fx_b.dt)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let tail: Vec<&NewBar> = self
            .bars_merged
            .iter()
            .filter(|b| b.dt >= tail_start)
            .collect();
        if tail.is_empty() {
            return None;
        }
        let direction = match tail.len() {
            1 => Direction::Up,
            n => Direction::infer(tail[n - 2], tail[n - 1]),
        };
        Some(UbiSummary {
            direction,
            high: tail.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max),
            low: tail.iter().map(|b| b.low).fold(f64::INFINITY, f64::min),
            fxs: self.strokes.ubi_fxs().to_vec(),
            raw_bars: tail.iter().flat_map(|b| b.elements.iter().cloned()).collect(),
        })
    }

    /// Centre view over the last `n` strokes, or `None` when invalid.
    pub fn centre(&self, n: usize) -> Option<ZS<'_>> {
        let bis = self.strokes.bis();
        if n < 3 || bis.len() < n {
            return None;
        }
        ZS::over(&bis[bis.len() - n..])
    }

    /// Greedy non-overlapping centre sequence over the whole stroke list.
    pub fn centres(&self) -> Vec<ZS<'_>> {
        centre_sequence(self.strokes.bis())
    }

    #[inline]
    pub fn side_table(&self) -> &SideTable {
        &self.side
    }

    #[inline]
    pub fn side_table_mut(&mut self) -> &mut SideTable {
        &mut self.side
    }
}

// ============================================================
// PARALLEL REPLAY
// ============================================================

use rayon::prelude::*;

/// Error from replaying a single instrument.
#[derive(Debug)]
pub struct ReplayError {
    pub symbol: String,
    pub error: AnalyzerError,
}

/// Drive many independent analyzers in parallel, each over its own bar
/// stream. Analyzers that fail stop at the offending bar; their errors are
/// returned per symbol.
pub fn replay_parallel<'a, I>(feeds: I) -> Vec<ReplayError>
where
    I: IntoParallelIterator<Item = (&'a mut Analyzer, &'a [RawBar])>,
{
    feeds
        .into_par_iter()
        .filter_map(|(analyzer, bars)| {
            analyzer
                .replay(bars.iter().cloned())
                .err()
                .map(|error| ReplayError {
                    symbol: analyzer.symbol().to_string(),
                    error,
                })
        })
        .collect()
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(dt_min: i64, open: f64, high: f64, low: f64, close: f64) -> RawBar {
        RawBar {
            symbol: "T".into(),
            id: dt_min as u64,
            dt: Utc.timestamp_opt(dt_min * 60, 0).unwrap(),
            freq: "1m".into(),
            open,
            high,
            low,
            close,
            volume: 1.0,
            amount: 1.0,
        }
    }

    fn flat(dt_min: i64, price: f64) -> RawBar {
        raw(dt_min, price, price, price, price)
    }

    #[test]
    fn test_min_bi_len_validation() {
        assert!(MinBiLen::new(5).is_ok());
        assert!(MinBiLen::new(7).is_ok());
        assert!(MinBiLen::new(13).is_ok());
        assert!(MinBiLen::new(4).is_err());
        assert!(MinBiLen::new(14).is_err());
        assert_eq!(MinBiLen::default().get(), 7);
    }

    #[test]
    fn test_config_validation() {
        assert!(AnalyzerConfig::new(7, None, None).is_ok());
        assert!(AnalyzerConfig::new(4, None, None).is_err());
        assert!(AnalyzerConfig::new(7, Some(-1.0), None).is_err());
        assert!(AnalyzerConfig::new(7, Some(f64::NAN), None).is_err());
        assert!(AnalyzerConfig::new(7, None, Some(0)).is_err());
        assert!(AnalyzerConfig::new(7, Some(25.0), Some(50)).is_ok());
    }

    #[test]
    fn test_empty_snapshots() {
        let a = Analyzer::with_defaults("T", "1m");
        assert!(a.bars_raw().is_empty());
        assert!(a.bars_merged().is_empty());
        assert!(a.fxs().is_empty());
        assert!(a.bis().is_empty());
        assert!(a.ubi().is_none());
        assert!(a.end_dt().is_none());
        assert!(a.latest_price().is_none());
        assert!(a.centre(3).is_none());
        assert!(a.centres().is_empty());
    }

    #[test]
    fn test_update_basics() {
        let mut a = Analyzer::with_defaults("T", "1m");
        a.update(raw(1, 10.0, 11.0, 9.0, 10.5)).unwrap();
        assert_eq!(a.bars_raw().len(), 1);
        assert_eq!(a.bars_merged().len(), 1);
        assert_eq!(a.latest_price(), Some(10.5));
        assert_eq!(a.end_dt(), Some(Utc.timestamp_opt(60, 0).unwrap()));
    }

    #[test]
    fn test_duplicate_bar_is_noop() {
        let mut a = Analyzer::with_defaults("T", "1m");
        let b = raw(1, 10.0, 11.0, 9.0, 10.5);
        a.update(b.clone()).unwrap();
        a.update(b).unwrap();
        assert_eq!(a.bars_raw().len(), 1);
    }

    #[test]
    fn test_rejects_backwards_timestamp() {
        let mut a = Analyzer::with_defaults("T", "1m");
        a.update(raw(2, 10.0, 11.0, 9.0, 10.5)).unwrap();
        let err = a.update(raw(1, 10.0, 11.0, 9.0, 10.5)).unwrap_err();
        assert!(matches!(err, AnalyzerError::NonMonotonicTimestamp { .. }));
        assert_eq!(a.bars_raw().len(), 1);
    }

    #[test]
    fn test_rejects_same_timestamp_different_content() {
        let mut a = Analyzer::with_defaults("T", "1m");
        a.update(raw(1, 10.0, 11.0, 9.0, 10.5)).unwrap();
        let err = a.update(raw(1, 10.0, 12.0, 9.0, 10.5)).unwrap_err();
        assert!(matches!(err, AnalyzerError::NonMonotonicTimestamp { .. }));
    }

    #[test]
    fn test_rejects_bad_ohlc() {
        let mut a = Analyzer::with_defaults("T", "1m");
        // close above high
        let err = a.update(raw(1, 10.0, 11.0, 9.0, 12.0)).unwrap_err();
        assert!(matches!(err, AnalyzerError::InvalidBar { .. }));
        assert!(a.bars_raw().is_empty());
    }

    #[test]
    fn test_rejects_nan_and_nonpositive() {
        let mut a = Analyzer::with_defaults("T", "1m");
        let mut b = raw(1, 10.0, 11.0, 9.0, 10.5);
        b.high = f64::NAN;
        assert!(a.update(b).is_err());

        let mut b = raw(1, 10.0, 11.0, 9.0, 10.5);
        b.low = -1.0;
        assert!(a.update(b).is_err());
        assert!(a.bars_raw().is_empty());
    }

    #[test]
    fn test_rejects_symbol_mismatch() {
        let mut a = Analyzer::with_defaults("T", "1m");
        let mut b = raw(1, 10.0, 11.0, 9.0, 10.5);
        b.symbol = "X".into();
        assert!(a.update(b).is_err());
    }

    #[test]
    fn test_rejects_backwards_id() {
        let mut a = Analyzer::with_defaults("T", "1m");
        let mut b = raw(1, 10.0, 11.0, 9.0, 10.5);
        b.id = 10;
        a.update(b).unwrap();
        let mut c = raw(2, 10.0, 11.0, 9.0, 10.5);
        c.id = 9;
        assert!(a.update(c).is_err());
    }

    #[test]
    fn test_constant_stream_stays_degenerate() {
        let mut a = Analyzer::with_defaults("T", "1m");
        for i in 1..=50 {
            a.update(flat(i, 10.0)).unwrap();
        }
        // Every bar folds into the first merged bar; nothing downstream.
        assert_eq!(a.bars_merged().len(), 1);
        assert!(a.fxs().is_empty());
        assert!(a.bis().is_empty());
    }

    #[test]
    fn test_side_table() {
        let mut a = Analyzer::with_defaults("T", "1m");
        a.update(raw(1, 10.0, 11.0, 9.0, 10.5)).unwrap();
        a.side_table_mut().insert(1, "MACD12#26#9", 0.42);
        assert_eq!(a.side_table().get(1, "MACD12#26#9"), Some(0.42));
        assert_eq!(a.side_table().get(1, "missing"), None);
        assert_eq!(a.side_table().len(), 1);
        assert!(!a.side_table().is_empty());
    }

    #[test]
    fn test_trim_bounds_history() {
        let mut a = Analyzer::new(
            "T",
            "1m",
            AnalyzerConfig {
                max_history: Some(20),
                ..AnalyzerConfig::default()
            },
        );
        // Alternating zigzag: nothing ever folds, no strokes form.
        for i in 1..=200 {
            let b = if i % 2 == 0 {
                raw(i, 11.0, 12.0, 9.0, 11.5)
            } else {
                raw(i, 10.0, 11.0, 8.0, 9.0)
            };
            a.update(b).unwrap();
        }
        assert!(a.bars_raw().len() <= 21);
        assert!(a.bars_merged().len() >= 3);
        // Remaining entities all postdate the oldest retained raw bar.
        let oldest = a.bars_raw()[0].dt;
        assert!(a.fxs().iter().all(|f| f.dt >= oldest));
    }

    #[test]
    fn test_trim_drops_side_entries() {
        let mut a = Analyzer::new(
            "T",
            "1m",
            AnalyzerConfig {
                max_history: Some(10),
                ..AnalyzerConfig::default()
            },
        );
        for i in 1..=30 {
            let b = if i % 2 == 0 {
                raw(i, 11.0, 12.0, 9.0, 11.5)
            } else {
                raw(i, 10.0, 11.0, 8.0, 9.0)
            };
            a.side_table_mut().insert(i as u64, "k", i as f64);
            a.update(b).unwrap();
        }
        assert!(a.side_table().get(1, "k").is_none());
        let newest = a.bars_raw().last().unwrap().id;
        assert!(a.side_table().get(newest, "k").is_some());
    }

    #[test]
    fn test_replay_matches_one_by_one() {
        let bars: Vec<RawBar> = (1..=40)
            .map(|i| {
                let base = 10.0 + (i as f64 * 0.7).sin() * 3.0;
                raw(i, base, base + 1.0, base - 1.0, base + 0.5)
            })
            .collect();

        let mut one = Analyzer::with_defaults("T", "1m");
        for b in bars.clone() {
            one.update(b).unwrap();
        }
        let mut all = Analyzer::with_defaults("T", "1m");
        all.replay(bars).unwrap();
        assert_eq!(one, all);
    }

    #[test]
    fn test_replay_parallel_collects_errors() {
        let good: Vec<RawBar> = (1..=10).map(|i| raw(i, 10.0, 11.0, 9.0, 10.5)).collect();
        let mut bad = good.clone();
        bad[5].close = 50.0; // above high

        let mut a1 = Analyzer::with_defaults("T", "1m");
        let mut a2 = Analyzer::with_defaults("T", "1m");
        let feeds = vec![(&mut a1, good.as_slice()), (&mut a2, bad.as_slice())];
        let errors = replay_parallel(feeds);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].symbol, "T");
        assert_eq!(a1.bars_raw().len(), 10);
        assert_eq!(a2.bars_raw().len(), 5);
    }

    #[test]
    fn test_ubi_before_first_stroke() {
        let mut a = Analyzer::with_defaults("T", "1m");
        a.update(raw(1, 10.0, 11.0, 9.0, 10.0)).unwrap();
        a.update(raw(2, 10.5, 12.0, 10.0, 11.5)).unwrap();
        let ubi = a.ubi().expect("tail summary");
        assert_eq!(ubi.direction, Direction::Up);
        assert_eq!(ubi.high, 12.0);
        assert_eq!(ubi.low, 9.0);
        assert_eq!(ubi.raw_bars.len(), 2);
    }
}
