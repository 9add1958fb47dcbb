//! Incremental per-symbol series cache.
//!
//! Each symbol's full fetched history lives in one CSV file under the cache
//! directory. A fetch serves the cached bars and asks the upstream provider
//! only for the dates after the last cached one, so a daily re-scan costs
//! O(days since last run) per symbol instead of the full window.
//!
//! Cache files only grow: new bars are merged in and the file is replaced
//! atomically with a superset of its previous contents.

use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::provider::{HistoricalProvider, ProviderError};
use super::store::StorageError;
use super::{Bar, Interval, Series};

/// Result of one cache lookup.
#[derive(Debug)]
pub struct Lookup {
    pub result: Result<Series, ProviderError>,
    /// The provider was called, successfully or not
    pub went_upstream: bool,
}

impl Lookup {
    fn cached(series: Series) -> Self {
        Self {
            result: Ok(series),
            went_upstream: false,
        }
    }

    fn upstream(result: Result<Series, ProviderError>) -> Self {
        Self {
            result,
            went_upstream: true,
        }
    }
}

/// File-per-symbol series cache in front of a [`HistoricalProvider`].
pub struct SeriesCache<P: HistoricalProvider + ?Sized> {
    dir: PathBuf,
    provider: Arc<P>,
    /// One lock per symbol so concurrent scans never interleave writes
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<P: HistoricalProvider + ?Sized> SeriesCache<P> {
    pub fn new(dir: impl Into<PathBuf>, provider: Arc<P>) -> Self {
        Self {
            dir: dir.into(),
            provider,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Cache file for `symbol`.
    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", sanitize_symbol(symbol)))
    }

    /// Return the series for `symbol` covering `[start, end]`.
    ///
    /// 1. A cache ending on or after `end` is served without a network call.
    /// 2. Otherwise only `[last cached + 1 day, end]` (or `[start, end]` on a
    ///    cold cache) is requested, merged, and persisted.
    /// 3. An empty upstream result serves the cache unchanged.
    /// 4. An upstream error serves the cache when it holds any bars, and
    ///    surfaces the error only when there is nothing to fall back on.
    ///
    /// The returned series never holds bars outside `[start, end]`, even when
    /// the file on disk extends past `end`. A failure to persist the merged
    /// series is logged; the merged series is still returned for this run.
    pub async fn fetch(
        &self,
        symbol: &str,
        token: u64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Series, ProviderError> {
        self.lookup(symbol, token, start, end).await.result
    }

    /// Like [`SeriesCache::fetch`], also reporting whether the provider was
    /// called.
    pub async fn lookup(&self, symbol: &str, token: u64, start: NaiveDate, end: NaiveDate) -> Lookup {
        let lock = self.symbol_lock(symbol).await;
        let _guard = lock.lock().await;

        let cached = match self.load(symbol) {
            Ok(series) => series,
            Err(e) => {
                warn!(symbol, error = %e, "Unreadable cache entry, refetching");
                Series::empty(symbol)
            }
        };

        let fetch_from = match cached.last_date() {
            Some(last) if last >= end => {
                debug!(symbol, %last, "Cache hit");
                return Lookup::cached(cached.range(start, end));
            }
            Some(last) => last.succ_opt().unwrap_or(last),
            None => start,
        };

        if fetch_from > end {
            return Lookup::cached(cached.range(start, end));
        }

        let fresh = match self
            .provider
            .historical_bars(token, symbol, fetch_from, end, Interval::Day)
            .await
        {
            Ok(bars) => bars,
            Err(e) if !cached.is_empty() => {
                if matches!(e, ProviderError::Unavailable(_)) {
                    debug!(symbol, error = %e, "Serving cached series");
                } else {
                    warn!(symbol, error = %e, cached_bars = cached.len(), "Fetch failed, serving stale cache");
                }
                return Lookup::upstream(Ok(cached.range(start, end)));
            }
            Err(e) => return Lookup::upstream(Err(e)),
        };

        if fresh.is_empty() {
            debug!(symbol, %fetch_from, %end, "No new bars upstream");
            return Lookup::upstream(Ok(cached.range(start, end)));
        }

        let fetched = fresh.len();
        let merged = cached.merge(fresh);
        if let Err(e) = self.persist(&merged) {
            warn!(symbol, error = %e, "Failed to persist cache entry, using in-memory series");
        }

        debug!(symbol, fetched, total = merged.len(), %fetch_from, %end, "Cache extended");
        Lookup::upstream(Ok(merged.range(start, end)))
    }

    /// Read the persisted series (empty when no file exists).
    pub fn load(&self, symbol: &str) -> Result<Series, StorageError> {
        let path = self.path_for(symbol);
        if !path.exists() {
            return Ok(Series::empty(symbol));
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let mut bars = Vec::new();
        for row in reader.deserialize::<Bar>() {
            bars.push(row.map_err(|e| StorageError::Corrupt {
                location: path.display().to_string(),
                reason: e.to_string(),
            })?);
        }
        Ok(Series::new(symbol, bars))
    }

    /// Write the full series to its cache file via a temp file and rename.
    pub fn persist(&self, series: &Series) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir)?;

        let path = self.path_for(series.symbol());
        let tmp = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            for bar in series.bars() {
                writer.serialize(bar)?;
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    async fn symbol_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// File-system safe name for a ticker.
pub fn sanitize_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| match c {
            '/' | '\\' | ' ' | ':' => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_support::{bar, day};
    use crate::data::InstrumentMap;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Provider returning one bar per calendar day in the requested range.
    struct DailyProvider {
        calls: AtomicU32,
        requests: std::sync::Mutex<Vec<(NaiveDate, NaiveDate)>>,
        fail: bool,
    }

    impl DailyProvider {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicU32::new(0),
                requests: std::sync::Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl HistoricalProvider for DailyProvider {
        fn name(&self) -> &'static str {
            "daily"
        }

        async fn instruments(&self) -> Result<InstrumentMap, ProviderError> {
            Ok(InstrumentMap::new())
        }

        async fn historical_bars(
            &self,
            _token: u64,
            _symbol: &str,
            from: NaiveDate,
            to: NaiveDate,
            _interval: Interval,
        ) -> Result<Vec<Bar>, ProviderError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.requests.lock().unwrap().push((from, to));
            if self.fail {
                return Err(ProviderError::Network("connection reset".into()));
            }
            Ok(from.iter_days().take_while(|d| *d <= to).map(|d| bar(d, 100.0)).collect())
        }
    }

    #[test]
    fn test_sanitize_symbol() {
        assert_eq!(sanitize_symbol("M&M"), "M&M");
        assert_eq!(sanitize_symbol("NIFTY 50"), "NIFTY_50");
        assert_eq!(sanitize_symbol("A/B"), "A_B");
    }

    #[tokio::test]
    async fn test_cold_fetch_persists_file() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(DailyProvider::new(false));
        let cache = SeriesCache::new(dir.path(), provider.clone());

        let series = cache.fetch("INFY", 1, day(2024, 1, 1), day(2024, 1, 10)).await.unwrap();
        assert_eq!(series.len(), 10);
        assert!(cache.path_for("INFY").exists());
        assert!(!cache.path_for("INFY").with_extension("csv.tmp").exists());

        let reloaded = cache.load("INFY").unwrap();
        assert_eq!(reloaded, series);
    }

    #[tokio::test]
    async fn test_stale_cache_served_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let warm = SeriesCache::new(dir.path(), Arc::new(DailyProvider::new(false)));
        warm.fetch("TCS", 1, day(2024, 1, 1), day(2024, 1, 5)).await.unwrap();

        let failing = Arc::new(DailyProvider::new(true));
        let cache = SeriesCache::new(dir.path(), failing.clone());
        let series = cache.fetch("TCS", 1, day(2024, 1, 1), day(2024, 1, 8)).await.unwrap();

        assert_eq!(series.len(), 5);
        assert_eq!(failing.calls.load(Ordering::Relaxed), 1);
        assert_eq!(failing.requests.lock().unwrap()[0], (day(2024, 1, 6), day(2024, 1, 8)));
    }

    #[tokio::test]
    async fn test_error_on_empty_cache_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SeriesCache::new(dir.path(), Arc::new(DailyProvider::new(true)));

        let err = cache.fetch("TCS", 1, day(2024, 1, 1), day(2024, 1, 8)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
        assert!(!cache.path_for("TCS").exists());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(DailyProvider::new(false));
        let cache = SeriesCache::new(dir.path(), provider.clone());
        std::fs::write(cache.path_for("SBIN"), "date,open\nnot-a-date,1\n").unwrap();

        let series = cache.fetch("SBIN", 1, day(2024, 1, 1), day(2024, 1, 3)).await.unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(provider.requests.lock().unwrap()[0], (day(2024, 1, 1), day(2024, 1, 3)));
    }
}
