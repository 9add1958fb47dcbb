//! Trend-then-consolidation screener.
//!
//! Scans a symbol universe for names in a long-term uptrend that are now
//! coiling in a tight range just under a pivot high.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │  Universe    │───▶│ SeriesCache  │───▶│   Features   │───▶│ ScoringModel │
//! │  + tokens    │    │  (CSV/sym)   │    │  (metrics)   │    │  (weighted)  │
//! └──────────────┘    └──────┬───────┘    └──────────────┘    └──────┬───────┘
//!                            │                                       │
//!                     ┌──────▼───────┐                        ┌──────▼───────┐
//!                     │ OhlcvStore   │                        │  ScanReport  │
//!                     │  (SQLite)    │                        │ CSV + JSON   │
//!                     └──────────────┘                        └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use swing_scanner::screener::{ScanEngine, ScanReport};
//!
//! let engine = ScanEngine::new(config.scan.clone(), provider, config.storage.cache_dir());
//! let result = engine.run(&universe, &instruments, scan_date).await;
//! ScanReport::new(&result).write_all(&config.storage.out_dir())?;
//! ```

pub mod engine;
pub mod features;
pub mod report;
pub mod scoring;
pub mod universe;

pub use engine::{
    ranking_order, DiagnosticRecord, RankedRecord, ScanEngine, ScanError, ScanReason, ScanResult,
    ScanSummary, SymbolOutcome,
};
pub use features::{FeatureSnapshot, MetricsRecord};
pub use report::{ReportPaths, ScanReport};
pub use scoring::{ScoreBreakdown, Scorer, ScoringModel};
pub use universe::{load_universe, parse_universe};
