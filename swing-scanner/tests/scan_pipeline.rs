//! End-to-end scan tests against a synthetic provider.
//!
//! Each symbol's bars are a pure function of the bar's distance from the
//! scan date, so incremental fetches stay consistent across runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;

use swing_common::config::ScanConfig;
use swing_scanner::data::{
    Bar, HistoricalProvider, InstrumentMap, Interval, OhlcvStore, ProviderError, ScanMeta, Series,
    SqliteStore, StorageError,
};
use swing_scanner::screener::{
    MetricsRecord, ScanEngine, ScanReason, ScanReport, ScoringModel, Scorer,
};

fn scan_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 28).unwrap()
}

// ============================================================================
// Synthetic Provider
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Shape {
    /// Liquid but trades at 50
    Penny,
    /// Above the price floor, 3 cr of daily turnover
    Illiquid,
    /// Long uptrend into a ±2 box
    Coiled,
    /// Same trend into a ±60 box, too wide to count as tight
    Loose,
    /// Only 100 bars of history
    Young,
    /// Every fetch fails
    Broken,
}

impl Shape {
    fn bar(self, date: NaiveDate, age: i64) -> Option<Bar> {
        let (close, volume) = match self {
            Self::Penny => (50.0, 1_000_000),
            Self::Illiquid => (500.0, 60_000),
            Self::Coiled => (trend_then_box(age, 2.0), 1_000_000),
            Self::Loose => (trend_then_box(age, 60.0), 1_000_000),
            Self::Young if age < 100 => (900.0, 1_000_000),
            Self::Young | Self::Broken => return None,
        };
        Some(Bar {
            date,
            open: close,
            high: close * 1.005,
            low: close * 0.995,
            close,
            volume,
        })
    }
}

/// Rising one point per bar, then the last 12 bars alternate around 800.
fn trend_then_box(age: i64, swing: f64) -> f64 {
    if age < 12 {
        if age % 2 == 0 {
            800.0 + swing
        } else {
            800.0 - swing
        }
    } else {
        800.0 - (age - 11) as f64
    }
}

struct SyntheticProvider {
    shapes: HashMap<u64, Shape>,
    calls: AtomicU32,
}

impl SyntheticProvider {
    fn new(shapes: &[(u64, Shape)]) -> Self {
        Self {
            shapes: shapes.iter().copied().collect(),
            calls: AtomicU32::new(0),
        }
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl HistoricalProvider for SyntheticProvider {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    async fn instruments(&self) -> Result<InstrumentMap, ProviderError> {
        Ok(InstrumentMap::new())
    }

    async fn historical_bars(
        &self,
        token: u64,
        _symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        _interval: Interval,
    ) -> Result<Vec<Bar>, ProviderError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let shape = self
            .shapes
            .get(&token)
            .copied()
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("token {}", token)))?;
        if matches!(shape, Shape::Broken) {
            return Err(ProviderError::Network("connection reset".into()));
        }
        Ok(from
            .iter_days()
            .take_while(|d| *d <= to)
            .filter_map(|d| shape.bar(d, (scan_date() - d).num_days()))
            .collect())
    }
}

/// Scorer that counts invocations.
struct CountingScorer {
    calls: AtomicU32,
}

impl Scorer for CountingScorer {
    fn score(&self, _metrics: &MetricsRecord) -> f64 {
        self.calls.fetch_add(1, Ordering::Relaxed);
        0.5
    }
}

/// Store whose every write and read fails.
struct FailingStore {
    upserts: AtomicU32,
}

impl FailingStore {
    fn error() -> StorageError {
        StorageError::Corrupt {
            location: "ohlc.db".into(),
            reason: "disk image is malformed".into(),
        }
    }
}

#[async_trait]
impl OhlcvStore for FailingStore {
    async fn upsert(&self, _series: &Series) -> Result<usize, StorageError> {
        self.upserts.fetch_add(1, Ordering::Relaxed);
        Err(Self::error())
    }

    async fn read_range(
        &self,
        _symbol: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Series, StorageError> {
        Err(Self::error())
    }

    async fn distinct_dates(&self) -> Result<Vec<NaiveDate>, StorageError> {
        Err(Self::error())
    }

    async fn symbols_on_date(&self, _date: NaiveDate) -> Result<Vec<String>, StorageError> {
        Err(Self::error())
    }

    async fn record_scan(&self, _meta: &ScanMeta) -> Result<(), StorageError> {
        Err(Self::error())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

const SHAPES: [(&str, u64, Shape); 6] = [
    ("PENNY", 1, Shape::Penny),
    ("THIN", 2, Shape::Illiquid),
    ("COIL", 3, Shape::Coiled),
    ("LOOSE", 4, Shape::Loose),
    ("YOUNG", 5, Shape::Young),
    ("BROKEN", 6, Shape::Broken),
];

fn test_config() -> ScanConfig {
    ScanConfig {
        pause_secs: 0.0,
        workers: 4,
        ..ScanConfig::default()
    }
}

fn setup() -> (Arc<SyntheticProvider>, InstrumentMap, Vec<String>) {
    let shapes: Vec<(u64, Shape)> = SHAPES.iter().map(|(_, t, s)| (*t, *s)).collect();
    let provider = Arc::new(SyntheticProvider::new(&shapes));

    let mut instruments = InstrumentMap::new();
    for (symbol, token, _) in SHAPES {
        instruments.insert(symbol, token);
    }

    let mut universe: Vec<String> = SHAPES.iter().map(|(s, _, _)| s.to_string()).collect();
    universe.push("MISSING".into());

    (provider, instruments, universe)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_every_symbol_gets_one_reason() {
    let cache = tempfile::tempdir().unwrap();
    let (provider, instruments, universe) = setup();
    let engine = ScanEngine::new(test_config(), provider.clone(), cache.path());

    let result = engine.run(&universe, &instruments, scan_date()).await;

    let reasons: Vec<_> = result.diagnostics.iter().map(|d| (d.symbol.as_str(), d.reason)).collect();
    assert_eq!(
        reasons,
        vec![
            ("PENNY", ScanReason::BelowPriceFloor),
            ("THIN", ScanReason::BelowTradedValue),
            ("COIL", ScanReason::Ranked),
            ("LOOSE", ScanReason::Ranked),
            ("YOUNG", ScanReason::InsufficientHistory),
            ("BROKEN", ScanReason::FetchFailed),
            ("MISSING", ScanReason::NotFoundInInstruments),
        ]
    );

    assert_eq!(result.summary.total_symbols, 7);
    assert_eq!(result.summary.ranked_symbols, 2);
    assert_eq!(result.summary.count(ScanReason::FetchFailed), 1);
    let counted: usize = result.summary.reasons.values().sum();
    assert_eq!(counted, universe.len());

    // The missing symbol never reaches the provider
    assert_eq!(provider.call_count(), 6);
}

#[tokio::test]
async fn test_price_floor_checked_before_traded_value() {
    let cache = tempfile::tempdir().unwrap();
    let (provider, instruments, _) = setup();
    let engine = ScanEngine::new(test_config(), provider, cache.path());

    let result = engine.run(&["PENNY".to_string()], &instruments, scan_date()).await;

    let diag = result.diagnostic("PENNY").unwrap();
    assert_eq!(diag.reason, ScanReason::BelowPriceFloor);
    assert_eq!(diag.close, Some(50.0));
    // Turnover passes on its own, so only the price floor can have rejected it
    assert_eq!(diag.tv20_cr, Some(5.0));
}

#[tokio::test]
async fn test_tight_box_outranks_loose_box() {
    let cache = tempfile::tempdir().unwrap();
    let (provider, instruments, universe) = setup();
    let engine = ScanEngine::new(test_config(), provider, cache.path());

    let result = engine.run(&universe, &instruments, scan_date()).await;

    let order: Vec<_> = result.ranked.iter().map(|r| r.symbol.as_str()).collect();
    assert_eq!(order, vec!["COIL", "LOOSE"]);

    let coil = &result.ranked[0];
    assert!(coil.uptrend);
    assert!(coil.within_20pct_high);
    assert!(coil.box_span_pct < 3.0);
    assert_eq!(coil.vol5_to_vol50, Some(1.0));
    assert!(coil.tv20_cr > 75.0);
    assert_eq!(result.summary.tight_boxes, 1);

    let model = ScoringModel::new(test_config().scoring);
    let diag = result.diagnostic("COIL").unwrap();
    assert_eq!(diag.score, Some(coil.score));
    assert!(coil.score > model.config().bonus_uptrend + model.config().bonus_near_high);
}

#[tokio::test]
async fn test_rejected_symbols_are_never_scored() {
    let cache = tempfile::tempdir().unwrap();
    let (provider, instruments, _) = setup();
    let scorer = Arc::new(CountingScorer {
        calls: AtomicU32::new(0),
    });
    let engine =
        ScanEngine::new(test_config(), provider, cache.path()).with_scorer(scorer.clone());

    let universe: Vec<String> = ["YOUNG", "PENNY", "THIN", "BROKEN", "MISSING"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let result = engine.run(&universe, &instruments, scan_date()).await;

    assert!(result.ranked.is_empty());
    assert_eq!(scorer.calls.load(Ordering::Relaxed), 0);

    let young = result.diagnostic("YOUNG").unwrap();
    assert_eq!(young.reason, ScanReason::InsufficientHistory);
    assert_eq!(young.bars, Some(100));
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let cache = tempfile::tempdir().unwrap();
    let (provider, instruments, universe) = setup();
    let engine = ScanEngine::new(test_config(), provider.clone(), cache.path());

    let first = engine.run(&universe, &instruments, scan_date()).await;
    let after_first = provider.call_count();

    let second = engine.run(&universe, &instruments, scan_date()).await;

    // Only the symbol with nothing cached goes back upstream
    assert_eq!(provider.call_count(), after_first + 1);
    assert_eq!(first.ranked, second.ranked);
}

#[tokio::test]
async fn test_store_and_report_outputs() {
    let cache = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let db = tempfile::tempdir().unwrap();
    let (provider, instruments, universe) = setup();

    let store = Arc::new(SqliteStore::open(db.path().join("ohlc.db")).unwrap());
    let engine = ScanEngine::new(test_config(), provider, cache.path()).with_store(store.clone());

    let result = engine.run(&universe, &instruments, scan_date()).await;
    let report = ScanReport::new(&result);
    let paths = report.write_all(out.path()).unwrap();
    report.record_to_store(store.as_ref()).await;

    // Series are stored once they clear the history check
    let stored = store.symbols_on_date(scan_date()).await.unwrap();
    assert_eq!(stored, vec!["COIL", "LOOSE", "PENNY", "THIN"]);

    let scans = store.recent_scans(5).await.unwrap();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].ranked_symbols, 2);

    assert!(paths.dir.ends_with("2024-06-28"));
    let ranked = std::fs::read_to_string(&paths.ranked).unwrap();
    let symbols: Vec<_> = ranked
        .lines()
        .skip(1)
        .map(|l| l.split(',').next().unwrap())
        .collect();
    assert_eq!(symbols, vec!["COIL", "LOOSE"]);

    let debug = std::fs::read_to_string(&paths.diagnostics).unwrap();
    assert_eq!(debug.lines().count(), universe.len() + 1);
    assert!(debug.contains("MISSING,not_found_in_instruments"));
}

#[tokio::test]
async fn test_backdated_scan_ignores_later_cached_bars() {
    let cache = tempfile::tempdir().unwrap();
    let (provider, instruments, _) = setup();
    let engine = ScanEngine::new(test_config(), provider.clone(), cache.path());
    let coil = vec!["COIL".to_string()];

    let current = engine.run(&coil, &instruments, scan_date()).await;
    assert_eq!(current.ranked[0].close, 800.0 + 2.0);
    let after_warm = provider.call_count();

    let earlier = NaiveDate::from_ymd_opt(2024, 6, 14).unwrap();
    let backdated = engine.run(&coil, &instruments, earlier).await;

    // Served from the warm cache, cut off at the earlier date
    assert_eq!(provider.call_count(), after_warm);
    let diag = backdated.diagnostic("COIL").unwrap();
    assert_eq!(diag.reason, ScanReason::Ranked);
    assert_eq!(diag.close, Some(797.0));
    assert_eq!(diag.bars, Some(587));
    assert_eq!(backdated.ranked[0].close, 797.0);
}

#[tokio::test]
async fn test_failing_store_does_not_reject_symbols() {
    let cache = tempfile::tempdir().unwrap();
    let (provider, instruments, _) = setup();
    let store = Arc::new(FailingStore {
        upserts: AtomicU32::new(0),
    });
    let engine = ScanEngine::new(test_config(), provider, cache.path()).with_store(store.clone());

    let universe = vec!["COIL".to_string(), "PENNY".to_string()];
    let result = engine.run(&universe, &instruments, scan_date()).await;

    assert_eq!(store.upserts.load(Ordering::Relaxed), 2);
    assert_eq!(result.diagnostic("COIL").unwrap().reason, ScanReason::Ranked);
    assert_eq!(result.diagnostic("PENNY").unwrap().reason, ScanReason::BelowPriceFloor);
    assert_eq!(result.ranked.len(), 1);
}

#[tokio::test]
async fn test_cache_hits_skip_the_request_pause() {
    let cache = tempfile::tempdir().unwrap();
    let (provider, instruments, _) = setup();
    let universe: Vec<String> = ["COIL", "LOOSE", "PENNY"].iter().map(|s| s.to_string()).collect();

    ScanEngine::new(test_config(), provider.clone(), cache.path())
        .run(&universe, &instruments, scan_date())
        .await;
    let after_warm = provider.call_count();

    let paced = ScanConfig {
        pause_secs: 0.5,
        workers: 1,
        ..ScanConfig::default()
    };
    let engine = ScanEngine::new(paced, provider.clone(), cache.path());

    let started = Instant::now();
    let result = engine.run(&universe, &instruments, scan_date()).await;

    assert_eq!(provider.call_count(), after_warm);
    assert_eq!(result.ranked.len(), 2);
    assert!(started.elapsed() < Duration::from_millis(400));
}
