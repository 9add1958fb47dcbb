//! Market data module for daily equity bars.
//!
//! Provides the bar and series types, the upstream provider abstraction, the
//! incremental per-symbol series cache, and the durable OHLCV store.
//!
//! # Data Sources
//! - **Kite Connect** (online): instrument master plus daily historical candles
//! - **Offline**: persisted instrument map only, the warm cache serves all bars

mod instruments;
mod kite;
mod offline;
mod provider;
pub mod series_cache;
pub mod store;

pub use instruments::{resolve_instruments, InstrumentMap};
pub use kite::{KiteAdapter, KiteCredentials};
pub use offline::OfflineProvider;
pub use provider::{HistoricalProvider, ProviderError};
pub use series_cache::{Lookup, SeriesCache};
pub use store::{OhlcvStore, ScanMeta, SqliteStore, StorageError};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// Core Data Types
// ============================================================================

/// Candle interval requested from the upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    /// One bar per trading day
    Day,
}

impl Interval {
    /// Interval name as used in provider URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One trading day of OHLCV data.
///
/// The owning [`Series`] carries the symbol, so a bar's identity is
/// `(series.symbol(), bar.date)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    /// High minus low.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Close times volume, in currency units.
    pub fn traded_value(&self) -> f64 {
        self.close * self.volume as f64
    }
}

/// Date-ordered bars for one symbol.
///
/// Dates are strictly increasing and unique. Gaps for holidays and weekends
/// are kept as-is. The only way to build a series is through [`Series::new`],
/// which sorts and deduplicates, so every value of this type holds the
/// ordering invariant.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    symbol: String,
    bars: Vec<Bar>,
}

impl Series {
    /// Build a series from bars in any order.
    ///
    /// When two bars share a date the one appearing later in `bars` wins.
    pub fn new(symbol: impl Into<String>, mut bars: Vec<Bar>) -> Self {
        // stable sort keeps input order within a date
        bars.sort_by_key(|b| b.date);

        let mut normalized: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match normalized.last_mut() {
                Some(last) if last.date == bar.date => *last = bar,
                _ => normalized.push(bar),
            }
        }

        Self {
            symbol: symbol.into(),
            bars: normalized,
        }
    }

    /// An empty series for `symbol`.
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bars: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Latest bar, if any.
    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(|b| b.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }

    /// The trailing `n` bars (all bars when the series is shorter).
    pub fn tail(&self, n: usize) -> &[Bar] {
        let start = self.bars.len().saturating_sub(n);
        &self.bars[start..]
    }

    /// Bars with `start <= date <= end`, as a new series.
    pub fn range(&self, start: NaiveDate, end: NaiveDate) -> Series {
        let bars = self
            .bars
            .iter()
            .filter(|b| b.date >= start && b.date <= end)
            .copied()
            .collect();
        Self {
            symbol: self.symbol.clone(),
            bars,
        }
    }

    /// Merge freshly fetched bars into this series.
    ///
    /// On a date collision the fresh bar replaces the existing one.
    pub fn merge(self, fresh: Vec<Bar>) -> Series {
        let Series { symbol, mut bars } = self;
        bars.extend(fresh);
        Series::new(symbol, bars)
    }

    pub fn closes(&self) -> impl Iterator<Item = f64> + '_ {
        self.bars.iter().map(|b| b.close)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub fn bar(date: NaiveDate, close: f64) -> Bar {
        Bar {
            date,
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 100_000,
        }
    }

    /// `n` consecutive calendar-day bars starting at `start` with closes from `close_at`.
    pub fn series_from(symbol: &str, start: NaiveDate, n: usize, close_at: impl Fn(usize) -> f64) -> Series {
        let bars = (0..n)
            .map(|i| bar(start + chrono::Duration::days(i as i64), close_at(i)))
            .collect();
        Series::new(symbol, bars)
    }
}
