//! Swing Scanner Library
//!
//! Daily scan of an equity universe for swing setups: a stock in a long-term
//! uptrend that has paused in a tight sideways box just under its recent
//! high, on contracting range and volume.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         swing-scanner                               │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐      │
//! │  │  data           │  │  screener       │  │  report         │      │
//! │  │  provider/cache │─▶│  features/score │─▶│  CSV/JSON/table │      │
//! │  │  sqlite store   │  │  engine         │  │                 │      │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! - **Box**: the last `box_len` bars; its span is `(max high − min low) / close`
//! - **Pivot**: highest high of the box, the breakout level
//! - **Contraction**: current ATR and 5-day volume small relative to their
//!   own recent history
//! - **Sentinel**: `9.99` stands in for a ratio that cannot be computed

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod data;
pub mod screener;

pub use data::{
    Bar, HistoricalProvider, InstrumentMap, KiteAdapter, OfflineProvider, OhlcvStore,
    ProviderError, Series, SeriesCache, SqliteStore,
};
pub use screener::{ScanEngine, ScanReport, ScanResult, ScoringModel};
