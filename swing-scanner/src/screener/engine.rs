//! Scan engine.
//!
//! The central orchestrator for a universe scan. Every symbol ends in exactly
//! one [`ScanReason`]; survivors are scored and ranked, and every symbol gets
//! a diagnostic row explaining its fate.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use swing_common::config::ScanConfig;

use crate::data::{
    HistoricalProvider, InstrumentMap, OhlcvStore, ProviderError, ScanMeta, SeriesCache, Series,
};

use super::features::{
    is_tight_box, traded_value_cr, FeatureSnapshot, SENTINEL, SENTINEL_THRESHOLD,
    TRADED_VALUE_WINDOW,
};
use super::scoring::{Scorer, ScoringModel};

/// Progress is logged every this many symbols
const PROGRESS_EVERY: usize = 50;

// ============================================================================
// Reasons and Errors
// ============================================================================

/// Terminal state of one symbol in a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanReason {
    NotFoundInInstruments,
    FetchFailed,
    InsufficientHistory,
    BelowPriceFloor,
    BelowTradedValue,
    Ranked,
}

impl ScanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFoundInInstruments => "not_found_in_instruments",
            Self::FetchFailed => "fetch_failed",
            Self::InsufficientHistory => "insufficient_history",
            Self::BelowPriceFloor => "below_price_floor",
            Self::BelowTradedValue => "below_traded_value",
            Self::Ranked => "ranked",
        }
    }
}

impl std::fmt::Display for ScanReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a symbol was not ranked. Each variant is skip-and-log, never fatal.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Symbol missing from the instrument map
    #[error("no instrument token for {0}")]
    Validation(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("{bars} bars, need {required}")]
    InsufficientData { bars: usize, required: usize },

    #[error("close {close:.2} below price floor {floor:.2}")]
    BelowPriceFloor { close: f64, floor: f64 },

    #[error("20-bar traded value {tv20_cr:.2} cr below floor {floor:.2} cr")]
    BelowTradedValue { tv20_cr: f64, floor: f64 },
}

impl ScanError {
    pub fn reason(&self) -> ScanReason {
        match self {
            Self::Validation(_) => ScanReason::NotFoundInInstruments,
            Self::Provider(_) => ScanReason::FetchFailed,
            Self::InsufficientData { .. } => ScanReason::InsufficientHistory,
            Self::BelowPriceFloor { .. } => ScanReason::BelowPriceFloor,
            Self::BelowTradedValue { .. } => ScanReason::BelowTradedValue,
        }
    }
}

// ============================================================================
// Records
// ============================================================================

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// One ranked candidate, with values rounded as reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRecord {
    pub symbol: String,
    pub score: f64,
    pub close: f64,
    pub pivot: f64,
    pub dist_to_pivot_pct: f64,
    pub box_span_pct: f64,
    pub atr_ratio: f64,
    /// Empty when the ratio was not computable
    pub vol5_to_vol50: Option<f64>,
    pub uptrend: bool,
    pub within_20pct_high: bool,
    pub nr7_today: bool,
    pub inside_today: bool,
    pub tv20_cr: f64,
}

impl RankedRecord {
    /// Build the reported record. Score keeps 4 places, everything else 2.
    pub fn new(symbol: &str, score: f64, snapshot: &FeatureSnapshot, tv20_cr: f64) -> Self {
        let m = &snapshot.metrics;
        Self {
            symbol: symbol.to_string(),
            score: round_to(score, 4),
            close: round_to(snapshot.close, 2),
            pivot: round_to(snapshot.pivot, 2),
            dist_to_pivot_pct: round_to(m.dist_to_pivot * 100.0, 2),
            box_span_pct: round_to(m.box_span_frac * 100.0, 2),
            atr_ratio: round_to(m.atr_ratio.unwrap_or(SENTINEL), 2),
            vol5_to_vol50: m
                .vol_ratio
                .filter(|v| *v < SENTINEL_THRESHOLD)
                .map(|v| round_to(v, 2)),
            uptrend: m.uptrend,
            within_20pct_high: m.within_20pct_high,
            nr7_today: snapshot.nr7_today,
            inside_today: snapshot.inside_today,
            tv20_cr: round_to(tv20_cr, 2),
        }
    }
}

/// Score descending, then box span ascending (tighter first), then symbol.
pub fn ranking_order(a: &RankedRecord, b: &RankedRecord) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.box_span_pct.total_cmp(&b.box_span_pct))
        .then_with(|| a.symbol.cmp(&b.symbol))
}

/// Fate of one universe symbol plus whatever was computed before rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub symbol: String,
    pub reason: ScanReason,
    pub detail: Option<String>,
    pub bars: Option<usize>,
    pub close: Option<f64>,
    pub tv20_cr: Option<f64>,
    pub score: Option<f64>,
    pub pivot: Option<f64>,
    pub dist_to_pivot_pct: Option<f64>,
    pub box_span_pct: Option<f64>,
    pub atr_ratio: Option<f64>,
    pub vol5_to_vol50: Option<f64>,
    pub uptrend: Option<bool>,
    pub within_20pct_high: Option<bool>,
    pub nr7_today: Option<bool>,
    pub inside_today: Option<bool>,
}

impl DiagnosticRecord {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            reason: ScanReason::Ranked,
            detail: None,
            bars: None,
            close: None,
            tv20_cr: None,
            score: None,
            pivot: None,
            dist_to_pivot_pct: None,
            box_span_pct: None,
            atr_ratio: None,
            vol5_to_vol50: None,
            uptrend: None,
            within_20pct_high: None,
            nr7_today: None,
            inside_today: None,
        }
    }

    fn reject(mut self, error: ScanError) -> SymbolOutcome {
        self.reason = error.reason();
        self.detail = Some(error.to_string());
        SymbolOutcome {
            diagnostic: self,
            ranked: None,
            tight_box: false,
        }
    }

    fn accept(mut self, ranked: &RankedRecord) -> Self {
        self.reason = ScanReason::Ranked;
        self.score = Some(ranked.score);
        self.close = Some(ranked.close);
        self.tv20_cr = Some(ranked.tv20_cr);
        self.pivot = Some(ranked.pivot);
        self.dist_to_pivot_pct = Some(ranked.dist_to_pivot_pct);
        self.box_span_pct = Some(ranked.box_span_pct);
        self.atr_ratio = Some(ranked.atr_ratio);
        self.vol5_to_vol50 = ranked.vol5_to_vol50;
        self.uptrend = Some(ranked.uptrend);
        self.within_20pct_high = Some(ranked.within_20pct_high);
        self.nr7_today = Some(ranked.nr7_today);
        self.inside_today = Some(ranked.inside_today);
        self
    }
}

/// Result of scanning one symbol.
#[derive(Debug, Clone)]
pub struct SymbolOutcome {
    pub diagnostic: DiagnosticRecord,
    pub ranked: Option<RankedRecord>,
    /// Ranked with a box span under the configured maximum
    pub tight_box: bool,
}

// ============================================================================
// Scan Result
// ============================================================================

/// Counts and timing of one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Scan ID (timestamp-based)
    pub scan_id: String,
    pub scan_date: NaiveDate,
    pub total_symbols: usize,
    pub ranked_symbols: usize,
    /// Ranked symbols whose box span is within `box_max_span`
    pub tight_boxes: usize,
    /// Symbols per terminal reason
    pub reasons: BTreeMap<ScanReason, usize>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl ScanSummary {
    /// Summary string for logging.
    pub fn line(&self) -> String {
        format!(
            "Scanned {} symbols in {:.1}s: {} ranked ({:.1}%), {} tight boxes",
            self.total_symbols,
            self.duration_secs,
            self.ranked_symbols,
            if self.total_symbols > 0 {
                (self.ranked_symbols as f64 / self.total_symbols as f64) * 100.0
            } else {
                0.0
            },
            self.tight_boxes
        )
    }

    pub fn count(&self, reason: ScanReason) -> usize {
        self.reasons.get(&reason).copied().unwrap_or(0)
    }

    pub fn to_meta(&self) -> ScanMeta {
        ScanMeta {
            scan_id: self.scan_id.clone(),
            scan_date: self.scan_date,
            total_symbols: self.total_symbols,
            ranked_symbols: self.ranked_symbols,
            duration_secs: self.duration_secs,
        }
    }
}

/// Output of a scan: ranked candidates in ranking order and one diagnostic
/// per universe symbol in universe order.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub summary: ScanSummary,
    pub ranked: Vec<RankedRecord>,
    pub diagnostics: Vec<DiagnosticRecord>,
}

impl ScanResult {
    /// Get the top N candidates.
    pub fn top(&self, n: usize) -> &[RankedRecord] {
        &self.ranked[..n.min(self.ranked.len())]
    }

    pub fn diagnostic(&self, symbol: &str) -> Option<&DiagnosticRecord> {
        self.diagnostics.iter().find(|d| d.symbol == symbol)
    }
}

// ============================================================================
// Scan Engine
// ============================================================================

/// The scan engine.
///
/// Per symbol:
/// 1. Resolve the instrument token
/// 2. Fetch the `[start, scan_date]` window through the cache, pausing after
///    lookups that reached the provider
/// 3. Require `min_bars` bars
/// 4. Upsert the series into the durable store (failure is logged)
/// 5. Apply the price floor, then the traded-value floor
/// 6. Compute features, score, and emit the ranked record
pub struct ScanEngine<P: HistoricalProvider + ?Sized> {
    config: ScanConfig,
    provider: Arc<P>,
    cache: SeriesCache<P>,
    store: Option<Arc<dyn OhlcvStore>>,
    scorer: Arc<dyn Scorer>,
}

impl<P: HistoricalProvider + ?Sized> ScanEngine<P> {
    /// Create an engine scoring with [`ScoringModel`] from `config.scoring`.
    pub fn new(config: ScanConfig, provider: Arc<P>, cache_dir: impl Into<PathBuf>) -> Self {
        let scorer = Arc::new(ScoringModel::new(config.scoring.clone()));
        let cache = SeriesCache::new(cache_dir, provider.clone());
        Self {
            config,
            provider,
            cache,
            store: None,
            scorer,
        }
    }

    /// Upsert every fetched series into `store`.
    pub fn with_store(mut self, store: Arc<dyn OhlcvStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn cache(&self) -> &SeriesCache<P> {
        &self.cache
    }

    /// Requested history window ending on `scan_date`.
    pub fn window(&self, scan_date: NaiveDate) -> (NaiveDate, NaiveDate) {
        let start = scan_date - ChronoDuration::days(i64::from(self.config.history_days));
        (start, scan_date)
    }

    /// Scan `universe` as of `scan_date`.
    ///
    /// Up to `workers` symbols are in flight at once. Diagnostics come back
    /// in universe order and ranked records in ranking order, whatever the
    /// completion order was.
    pub async fn run(
        &self,
        universe: &[String],
        instruments: &InstrumentMap,
        scan_date: NaiveDate,
    ) -> ScanResult {
        let started_at = Utc::now();
        let scan_id = format!("scan_{}", started_at.format("%Y%m%d_%H%M%S"));
        let (start, end) = self.window(scan_date);
        let workers = self.config.workers.max(1);

        info!(
            scan_id = %scan_id,
            provider = self.provider.name(),
            symbols = universe.len(),
            workers,
            %start,
            %end,
            "Starting universe scan"
        );

        let mut done = 0usize;
        let total = universe.len();
        let outcomes: Vec<SymbolOutcome> = stream::iter(universe)
            .map(|symbol| self.scan_symbol(symbol, instruments, start, end))
            .buffered(workers)
            .inspect(|_| {
                done += 1;
                if done % PROGRESS_EVERY == 0 {
                    info!(done, total, "Scan progress");
                }
            })
            .collect()
            .await;

        let mut reasons: BTreeMap<ScanReason, usize> = BTreeMap::new();
        let mut ranked = Vec::new();
        let mut diagnostics = Vec::with_capacity(outcomes.len());
        let mut tight_boxes = 0;
        for outcome in outcomes {
            *reasons.entry(outcome.diagnostic.reason).or_insert(0) += 1;
            if outcome.tight_box {
                tight_boxes += 1;
            }
            if let Some(record) = outcome.ranked {
                ranked.push(record);
            }
            diagnostics.push(outcome.diagnostic);
        }
        ranked.sort_by(ranking_order);

        let completed_at = Utc::now();
        let duration_secs = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let summary = ScanSummary {
            scan_id,
            scan_date,
            total_symbols: universe.len(),
            ranked_symbols: ranked.len(),
            tight_boxes,
            reasons,
            started_at,
            completed_at,
            duration_secs,
        };

        info!(
            scan_id = %summary.scan_id,
            ranked = summary.ranked_symbols,
            fetch_failed = summary.count(ScanReason::FetchFailed),
            duration = format!("{:.1}s", duration_secs),
            "Universe scan complete"
        );

        ScanResult {
            summary,
            ranked,
            diagnostics,
        }
    }

    /// Take one symbol from token lookup to its terminal reason.
    pub async fn scan_symbol(
        &self,
        symbol: &str,
        instruments: &InstrumentMap,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SymbolOutcome {
        let diag = DiagnosticRecord::new(symbol);

        let Some(token) = instruments.get(symbol) else {
            debug!(symbol, "Not in instrument map");
            return diag.reject(ScanError::Validation(symbol.to_string()));
        };

        let lookup = self.cache.lookup(symbol, token, start, end).await;
        if lookup.went_upstream {
            self.pace().await;
        }

        let series = match lookup.result {
            Ok(series) => series,
            Err(e) => {
                if e.is_run_wide() {
                    warn!(symbol, error = %e, "Fetch failed");
                } else {
                    debug!(symbol, error = %e, "Fetch failed");
                }
                return diag.reject(ScanError::Provider(e));
            }
        };

        self.evaluate(diag, &series).await
    }

    async fn evaluate(&self, mut diag: DiagnosticRecord, series: &Series) -> SymbolOutcome {
        let symbol = series.symbol();
        let filters = &self.config.filters;
        diag.bars = Some(series.len());

        let last = match series.last() {
            Some(last) if series.len() >= filters.min_bars => *last,
            _ => {
                return diag.reject(ScanError::InsufficientData {
                    bars: series.len(),
                    required: filters.min_bars.max(1),
                })
            }
        };

        self.store_series(series).await;

        let tv20 = traded_value_cr(series, TRADED_VALUE_WINDOW);
        diag.close = Some(round_to(last.close, 2));
        diag.tv20_cr = tv20.map(|v| round_to(v, 2));

        if last.close < filters.price_floor {
            return diag.reject(ScanError::BelowPriceFloor {
                close: last.close,
                floor: filters.price_floor,
            });
        }

        let tv20 = tv20.unwrap_or(0.0);
        if tv20 < filters.min_traded_value_cr {
            return diag.reject(ScanError::BelowTradedValue {
                tv20_cr: tv20,
                floor: filters.min_traded_value_cr,
            });
        }

        let Some(snapshot) = FeatureSnapshot::compute(series, self.config.box_len) else {
            return diag.reject(ScanError::InsufficientData {
                bars: 0,
                required: filters.min_bars.max(1),
            });
        };

        let score = self.scorer.score(&snapshot.metrics);
        let ranked = RankedRecord::new(symbol, score, &snapshot, tv20);
        let tight_box = is_tight_box(snapshot.metrics.box_span_frac, self.config.box_max_span);

        debug!(symbol, score = ranked.score, box_span_pct = ranked.box_span_pct, tight_box, "Ranked");

        SymbolOutcome {
            diagnostic: diag.accept(&ranked),
            ranked: Some(ranked),
            tight_box,
        }
    }

    async fn store_series(&self, series: &Series) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.upsert(series).await {
            warn!(symbol = series.symbol(), error = %e, "Failed to store OHLCV rows");
        }
    }

    async fn pace(&self) {
        if self.provider.is_offline() {
            return;
        }
        if let Ok(delay) = Duration::try_from_secs_f64(self.config.pause_secs) {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
