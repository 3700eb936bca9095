//! S1 - bar merger.
//!
//! Absorbs raw bars into merged bars by folding containment relations.
//! After every call the tail pair of the merged list is containment-free.

use tracing::trace;

use crate::bars::{Direction, NewBar, RawBar};

/// Advance the merged-bar list by one raw bar.
///
/// Either appends a fresh [`NewBar`] or folds `bar` into the current tail
/// when one of the two contains the other. The fold direction comes from the
/// previous tail pair and defaults to up while fewer than two merged bars
/// exist.
pub fn fold(newbars: &mut Vec<NewBar>, bar: RawBar) {
    let n = newbars.len();
    if n == 0 {
        newbars.push(NewBar::from_raw(bar));
        return;
    }

    let cur = &newbars[n - 1];
    let c_contains_b = cur.contains(bar.high, bar.low);
    let b_contains_c = bar.high >= cur.high && bar.low <= cur.low;

    if !(c_contains_b || b_contains_c) {
        newbars.push(NewBar::from_raw(bar));
        return;
    }

    let direction = if n < 2 {
        Direction::Up
    } else {
        Direction::infer(&newbars[n - 2], &newbars[n - 1])
    };

    let cur = &mut newbars[n - 1];
    trace!(
        symbol = %cur.symbol,
        dt = %bar.dt,
        ?direction,
        "folding contained bar into merged tail"
    );

    let (high, low) = match direction {
        // Both extremes move toward the fold direction.
        Direction::Up => (cur.high.max(bar.high), cur.low.max(bar.low)),
        Direction::Down => (cur.high.min(bar.high), cur.low.min(bar.low)),
    };

    // The synthesized open/close carry no structural meaning; they only pin
    // the candle colour of the pre-fold bar to the recomputed extremes.
    let (open, close) = if cur.is_bullish() {
        (low, high)
    } else {
        (high, low)
    };

    cur.high = high;
    cur.low = low;
    cur.open = open;
    cur.close = close;
    cur.dt = bar.dt;
    cur.volume += bar.volume;
    cur.amount += bar.amount;
    cur.elements.push(bar);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

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

    fn run(bars: Vec<RawBar>) -> Vec<NewBar> {
        let mut out = Vec::new();
        for b in bars {
            fold(&mut out, b);
        }
        out
    }

    #[test]
    fn test_first_bar_appends() {
        let out = run(vec![raw(1, 10.0, 12.0, 8.0, 11.0)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].elements.len(), 1);
    }

    #[test]
    fn test_containment_fold_default_up() {
        // Second bar is contained by the first; with no prior pair the fold
        // direction defaults to up: both extremes take the max.
        let out = run(vec![raw(1, 10.0, 12.0, 8.0, 11.0), raw(2, 11.0, 11.0, 10.0, 10.0)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].high, 12.0);
        assert_eq!(out[0].low, 10.0);
        assert_eq!(out[0].dt, Utc.timestamp_opt(2 * 60, 0).unwrap());
        assert_eq!(out[0].elements.len(), 2);
        assert_eq!(out[0].volume, 2.0);
    }

    #[test]
    fn test_fold_preserves_candle_colour() {
        // Pre-fold bar is bullish (close >= open), so the merged candle pins
        // open to the low and close to the high.
        let out = run(vec![raw(1, 10.0, 12.0, 8.0, 11.0), raw(2, 11.0, 11.0, 10.0, 10.0)]);
        assert_eq!(out[0].open, 10.0);
        assert_eq!(out[0].close, 12.0);
        assert!(out[0].is_bullish());
    }

    #[test]
    fn test_down_fold_takes_minima() {
        // Establish a down pair first, then fold a contained bar downward.
        let out = run(vec![
            raw(1, 10.0, 11.0, 10.0, 10.0),
            raw(2, 9.0, 9.5, 8.0, 8.5),
            raw(3, 9.0, 9.2, 8.2, 8.5),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].high, 9.2);
        assert_eq!(out[1].low, 8.0);
    }

    #[test]
    fn test_no_containment_appends() {
        let out = run(vec![raw(1, 10.0, 11.0, 9.0, 10.0), raw(2, 10.5, 12.0, 10.0, 11.5)]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_repeated_folds_collapse_to_one() {
        // A contained middle bar disappears as a separate merged bar.
        let out = run(vec![
            raw(1, 9.5, 10.0, 9.0, 9.5),
            raw(2, 9.5, 11.0, 8.0, 9.0),
            raw(3, 9.8, 10.0, 9.2, 10.0),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].elements.len(), 3);
    }

    #[test]
    fn test_tail_pair_containment_free() {
        let streams = vec![
            vec![
                raw(1, 10.0, 10.0, 10.0, 10.0),
                raw(2, 10.0, 11.0, 9.0, 10.0),
                raw(3, 10.0, 9.0, 8.0, 9.0),
                raw(4, 9.0, 10.0, 8.0, 9.0),
                raw(5, 9.0, 10.0, 9.0, 10.0),
            ],
        ];
        for s in streams {
            let out = run(s);
            for w in out.windows(2) {
                assert!(!w[0].contains(w[1].high, w[1].low));
                assert!(!(w[1].high >= w[0].high && w[1].low <= w[0].low));
            }
        }
    }
}
