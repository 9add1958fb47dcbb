//! Technical features over a daily [`Series`].
//!
//! Every function is pure. Means are simple population means over trailing
//! windows. Ratios whose base is zero or undefined come back as
//! [`SENTINEL`] (or `None` where the caller decides), never as a panic or NaN.
//! Minimum-length requirements are the caller's responsibility; short inputs
//! degrade to `None`, `false`, or the sentinel.

use serde::{Deserialize, Serialize};

use crate::data::{Bar, Series};

/// Disqualifying value for ratios that cannot be computed.
pub const SENTINEL: f64 = 9.99;

/// Ratios at or above this are treated as sentinels when reported.
pub const SENTINEL_THRESHOLD: f64 = 9.0;

pub const ATR_PERIOD: usize = 14;
pub const FAST_MA: usize = 50;
pub const SLOW_MA: usize = 200;
pub const YEAR_BARS: usize = 252;
pub const NEAR_HIGH_DRAWDOWN: f64 = 0.20;
pub const TRADED_VALUE_WINDOW: usize = 20;

/// Bars between the two MA50 samples of the slope check
const SLOPE_LAG: usize = 4;
/// ATR points the baseline median is taken over (excluding the latest)
const ATR_BASELINE: usize = 59;
/// 1 crore = 10 million currency units
const CRORE: f64 = 1e7;

// ============================================================================
// Rolling Primitives
// ============================================================================

fn rolling_mean(values: &[f64], n: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if n == 0 {
        return out;
    }
    let mut sum = 0.0;
    for (i, v) in values.iter().enumerate() {
        sum += v;
        if i >= n {
            sum -= values[i - n];
        }
        if i + 1 >= n {
            out[i] = Some(sum / n as f64);
        }
    }
    out
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

// ============================================================================
// Indicators
// ============================================================================

/// Trailing simple mean of close over `n` bars, `None` before `n` bars exist.
pub fn moving_average(series: &Series, n: usize) -> Vec<Option<f64>> {
    let closes: Vec<f64> = series.closes().collect();
    rolling_mean(&closes, n)
}

/// Per-bar true range. The first bar has no previous close and uses high − low.
pub fn true_range(series: &Series) -> Vec<f64> {
    let bars = series.bars();
    bars.iter()
        .enumerate()
        .map(|(i, b)| match i.checked_sub(1).map(|p| bars[p].close) {
            Some(prev) => b.range().max((b.high - prev).abs()).max((b.low - prev).abs()),
            None => b.range(),
        })
        .collect()
}

/// Trailing simple mean of true range over `n` bars.
pub fn average_true_range(series: &Series, n: usize) -> Vec<Option<f64>> {
    rolling_mean(&true_range(series), n)
}

/// Close above a rising MA50 which is above MA200.
///
/// The slope check compares MA50 at the latest bar with MA50 at the
/// fifth-most-recent bar. Any undefined average makes this false.
pub fn is_uptrend(series: &Series) -> bool {
    let Some(last) = series.last() else {
        return false;
    };
    let len = series.len();
    if len <= SLOPE_LAG {
        return false;
    }
    let fast = moving_average(series, FAST_MA);
    let slow = moving_average(series, SLOW_MA);

    match (fast[len - 1], slow[len - 1], fast[len - 1 - SLOPE_LAG]) {
        (Some(f), Some(s), Some(f_prior)) => last.close > f && f > s && f > f_prior,
        _ => false,
    }
}

/// Latest close within `max_drawdown` of the 252-bar high.
///
/// False with fewer than 252 bars.
pub fn within_52w_high(series: &Series, max_drawdown: f64) -> bool {
    let Some(last) = series.last() else {
        return false;
    };
    if series.len() < YEAR_BARS {
        return false;
    }
    let high = series
        .tail(YEAR_BARS)
        .iter()
        .map(|b| b.high)
        .fold(f64::NEG_INFINITY, f64::max);
    if high <= 0.0 {
        return false;
    }
    (high - last.close) / high <= max_drawdown
}

/// (max high − min low) over the trailing `lookback` bars ÷ `last_close`.
pub fn box_span_fraction(series: &Series, lookback: usize, last_close: f64) -> f64 {
    let window = series.tail(lookback);
    if lookback == 0 || window.is_empty() || last_close <= 0.0 {
        return SENTINEL;
    }
    let high = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    (high - low) / last_close
}

/// Max high over the trailing `lookback` bars, or the last close when the
/// window is empty.
pub fn pivot(series: &Series, lookback: usize) -> f64 {
    let window = series.tail(lookback);
    if lookback == 0 || window.is_empty() {
        return series.last().map_or(0.0, |b| b.close);
    }
    window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max)
}

/// |pivot − close| ÷ pivot.
pub fn distance_to_pivot(pivot: f64, close: f64) -> f64 {
    if pivot <= 0.0 {
        return SENTINEL;
    }
    (pivot - close).abs() / pivot
}

/// Latest bar's range equals the smallest range of the last 7 bars.
pub fn narrow_range7(series: &Series) -> bool {
    let window = series.tail(7);
    let Some(last) = window.last() else {
        return false;
    };
    if window.len() < 7 {
        return false;
    }
    let min = window.iter().map(Bar::range).fold(f64::INFINITY, f64::min);
    last.range() == min
}

/// Latest high below the previous high and latest low above the previous low.
pub fn inside_day(series: &Series) -> bool {
    match series.tail(2) {
        [prev, last] => last.high < prev.high && last.low > prev.low,
        _ => false,
    }
}

/// Latest ATR over the median of the previous 59 ATR values.
///
/// With fewer than 61 ATR points the latest ATR is its own baseline.
/// `None` when the ATR or its baseline is undefined or non-positive.
pub fn atr_ratio(series: &Series, period: usize) -> Option<f64> {
    let atr = average_true_range(series, period);
    let now = (*atr.last()?)?;

    let base = if atr.len() >= ATR_BASELINE + 2 {
        let end = atr.len() - 1;
        median(atr[end - ATR_BASELINE..end].iter().flatten().copied().collect())?
    } else {
        now
    };

    (base > 0.0).then(|| now / base)
}

/// Mean volume of the last 5 bars over the mean of the last 50.
pub fn volume_ratio(series: &Series) -> Option<f64> {
    if series.len() < 50 {
        return None;
    }
    let v5 = mean(series.tail(5).iter().map(|b| b.volume as f64))?;
    let v50 = mean(series.tail(50).iter().map(|b| b.volume as f64))?;
    (v50 > 0.0).then(|| v5 / v50)
}

/// Mean of close × volume over the last `n` bars, in crore.
pub fn traded_value_cr(series: &Series, n: usize) -> Option<f64> {
    if n == 0 || series.len() < n {
        return None;
    }
    mean(series.tail(n).iter().map(Bar::traded_value)).map(|v| v / CRORE)
}

/// Box span at or under `max_span`.
pub fn is_tight_box(box_span_frac: f64, max_span: f64) -> bool {
    box_span_frac < SENTINEL_THRESHOLD && box_span_frac <= max_span
}

// ============================================================================
// Metrics Record
// ============================================================================

/// Scoring inputs derived from the tail of one series.
///
/// `atr_ratio` and `vol_ratio` are `None` when not computable; the scoring
/// boundary maps that to [`SENTINEL`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub box_span_frac: f64,
    pub atr_ratio: Option<f64>,
    pub vol_ratio: Option<f64>,
    pub dist_to_pivot: f64,
    pub uptrend: bool,
    pub within_20pct_high: bool,
}

/// Everything the scanner reports about one series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureSnapshot {
    pub close: f64,
    pub pivot: f64,
    pub metrics: MetricsRecord,
    pub nr7_today: bool,
    pub inside_today: bool,
}

impl FeatureSnapshot {
    /// Compute the snapshot for the latest bar. `None` for an empty series.
    pub fn compute(series: &Series, box_len: usize) -> Option<Self> {
        let close = series.last()?.close;
        let pivot = pivot(series, box_len);

        let metrics = MetricsRecord {
            box_span_frac: box_span_fraction(series, box_len, close),
            atr_ratio: atr_ratio(series, ATR_PERIOD),
            vol_ratio: volume_ratio(series),
            dist_to_pivot: distance_to_pivot(pivot, close),
            uptrend: is_uptrend(series),
            within_20pct_high: within_52w_high(series, NEAR_HIGH_DRAWDOWN),
        };

        Some(Self {
            close,
            pivot,
            metrics,
            nr7_today: narrow_range7(series),
            inside_today: inside_day(series),
        })
    }
}
