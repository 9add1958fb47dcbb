//! Durable OHLCV store using SQLite.
//!
//! Provides persistent storage for:
//! - Daily bars, keyed by (symbol, date)
//! - Scan run metadata, one row per scan date
//!
//! The scanner depends only on the [`OhlcvStore`] trait. Re-upserting a bar
//! for an existing (symbol, date) replaces it instead of adding a row.

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Bar, Series};

const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// Storage Error
// ============================================================================

/// Errors from the series cache files and the durable store.
///
/// Never fatal to a scan: callers log these and carry on with in-memory data.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt data in {location}: {reason}")]
    Corrupt { location: String, reason: String },
}

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
-- Daily bars
CREATE TABLE IF NOT EXISTS daily_ohlc (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume INTEGER NOT NULL,
    traded_value REAL NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(symbol, date)
);

CREATE INDEX IF NOT EXISTS idx_daily_ohlc_symbol_date
ON daily_ohlc(symbol, date);

CREATE INDEX IF NOT EXISTS idx_daily_ohlc_date
ON daily_ohlc(date);

-- Scan runs
CREATE TABLE IF NOT EXISTS scan_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_date TEXT NOT NULL UNIQUE,
    scan_id TEXT NOT NULL,
    total_symbols INTEGER NOT NULL,
    ranked_symbols INTEGER NOT NULL,
    scan_duration_seconds REAL NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
"#;

// ============================================================================
// Store Contract
// ============================================================================

/// Metadata of one completed scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanMeta {
    pub scan_id: String,
    pub scan_date: NaiveDate,
    pub total_symbols: usize,
    pub ranked_symbols: usize,
    pub duration_secs: f64,
}

/// Append/update store for daily bars keyed by (symbol, date).
#[async_trait]
pub trait OhlcvStore: Send + Sync {
    /// Insert or replace every bar of `series`. Returns rows written.
    async fn upsert(&self, series: &Series) -> Result<usize, StorageError>;

    /// Bars of `symbol` with `start <= date <= end`.
    async fn read_range(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Series, StorageError>;

    /// Every date with at least one bar, ascending.
    async fn distinct_dates(&self) -> Result<Vec<NaiveDate>, StorageError>;

    /// Symbols with a bar on `date`, sorted.
    async fn symbols_on_date(&self, date: NaiveDate) -> Result<Vec<String>, StorageError>;

    /// Record (or replace) the metadata row for a scan date.
    async fn record_scan(&self, meta: &ScanMeta) -> Result<(), StorageError>;
}

// ============================================================================
// SQLite Store
// ============================================================================

/// SQLite-backed [`OhlcvStore`].
pub struct SqliteStore {
    /// rusqlite::Connection is Send but not Sync, hence the Mutex
    db: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(CREATE_TABLES_SQL)?;

        info!(db_path = %db_path.display(), "Initialized OHLCV store");

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Most recent scan rows, newest first.
    pub async fn recent_scans(&self, limit: usize) -> Result<Vec<ScanMeta>, StorageError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT scan_id, scan_date, total_symbols, ranked_symbols, scan_duration_seconds
             FROM scan_results ORDER BY scan_date DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ScanMeta {
                scan_id: row.get(0)?,
                scan_date: parse_date_column(row, 1)?,
                total_symbols: row.get::<_, i64>(2)?.max(0) as usize,
                ranked_symbols: row.get::<_, i64>(3)?.max(0) as usize,
                duration_secs: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn row_to_bar(row: &rusqlite::Row) -> rusqlite::Result<Bar> {
        Ok(Bar {
            date: parse_date_column(row, 0)?,
            open: row.get(1)?,
            high: row.get(2)?,
            low: row.get(3)?,
            close: row.get(4)?,
            volume: row.get::<_, i64>(5)?.max(0) as u64,
        })
    }
}

fn parse_date_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[async_trait]
impl OhlcvStore for SqliteStore {
    async fn upsert(&self, series: &Series) -> Result<usize, StorageError> {
        if series.is_empty() {
            return Ok(0);
        }

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT OR REPLACE INTO daily_ohlc
                (symbol, date, open, high, low, close, volume, traded_value)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;
            for bar in series.bars() {
                count += stmt.execute(params![
                    series.symbol(),
                    bar.date.format(DATE_FORMAT).to_string(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    i64::try_from(bar.volume).unwrap_or(i64::MAX),
                    bar.traded_value(),
                ])?;
            }
        }
        tx.commit()?;

        debug!(symbol = series.symbol(), count, "Upserted bars");
        Ok(count)
    }

    async fn read_range(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Series, StorageError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT date, open, high, low, close, volume FROM daily_ohlc
             WHERE symbol = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY date ASC",
        )?;
        let bars = stmt
            .query_map(
                params![
                    symbol,
                    start.format(DATE_FORMAT).to_string(),
                    end.format(DATE_FORMAT).to_string()
                ],
                Self::row_to_bar,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Series::new(symbol, bars))
    }

    async fn distinct_dates(&self) -> Result<Vec<NaiveDate>, StorageError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT DISTINCT date FROM daily_ohlc ORDER BY date ASC")?;
        let dates = stmt
            .query_map([], |row| parse_date_column(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(dates)
    }

    async fn symbols_on_date(&self, date: NaiveDate) -> Result<Vec<String>, StorageError> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare("SELECT symbol FROM daily_ohlc WHERE date = ?1 ORDER BY symbol ASC")?;
        let symbols = stmt
            .query_map(params![date.format(DATE_FORMAT).to_string()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(symbols)
    }

    async fn record_scan(&self, meta: &ScanMeta) -> Result<(), StorageError> {
        let db = self.db.lock().await;
        db.execute(
            r#"
            INSERT OR REPLACE INTO scan_results
            (scan_date, scan_id, total_symbols, ranked_symbols, scan_duration_seconds)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                meta.scan_date.format(DATE_FORMAT).to_string(),
                meta.scan_id,
                meta.total_symbols as i64,
                meta.ranked_symbols as i64,
                meta.duration_secs,
            ],
        )?;
        debug!(scan_id = %meta.scan_id, "Recorded scan metadata");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_support::{day, series_from};
    use tempfile::tempdir;

    fn create_test_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("data").join("ohlc.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_upsert_and_read_range() {
        let (_dir, store) = create_test_store();
        let series = series_from("INFY", day(2024, 1, 1), 10, |i| 1500.0 + i as f64);

        assert_eq!(store.upsert(&series).await.unwrap(), 10);

        let window = store
            .read_range("INFY", day(2024, 1, 3), day(2024, 1, 5))
            .await
            .unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window.bars()[0].close, 1502.0);
        assert_eq!(window.bars()[0].volume, 100_000);
    }

    #[tokio::test]
    async fn test_upsert_same_dates_does_not_duplicate() {
        let (_dir, store) = create_test_store();
        let first = series_from("TCS", day(2024, 1, 1), 5, |_| 3500.0);
        let second = series_from("TCS", day(2024, 1, 1), 5, |_| 3600.0);

        store.upsert(&first).await.unwrap();
        store.upsert(&second).await.unwrap();

        let all = store
            .read_range("TCS", day(2023, 1, 1), day(2025, 1, 1))
            .await
            .unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.bars().iter().all(|b| b.close == 3600.0));
    }

    #[tokio::test]
    async fn test_distinct_dates_and_symbols_on_date() {
        let (_dir, store) = create_test_store();
        store
            .upsert(&series_from("TCS", day(2024, 1, 2), 2, |_| 3500.0))
            .await
            .unwrap();
        store
            .upsert(&series_from("INFY", day(2024, 1, 1), 2, |_| 1500.0))
            .await
            .unwrap();

        let dates = store.distinct_dates().await.unwrap();
        assert_eq!(dates, vec![day(2024, 1, 1), day(2024, 1, 2), day(2024, 1, 3)]);

        let symbols = store.symbols_on_date(day(2024, 1, 2)).await.unwrap();
        assert_eq!(symbols, vec!["INFY".to_string(), "TCS".to_string()]);
    }

    #[test]
    fn test_record_scan_replaces_same_date() {
        let (_dir, store) = create_test_store();
        let mut meta = ScanMeta {
            scan_id: "scan_20240102_153000".into(),
            scan_date: day(2024, 1, 2),
            total_symbols: 500,
            ranked_symbols: 120,
            duration_secs: 64.5,
        };

        tokio_test::block_on(store.record_scan(&meta)).unwrap();
        meta.ranked_symbols = 118;
        tokio_test::block_on(store.record_scan(&meta)).unwrap();

        let scans = tokio_test::block_on(store.recent_scans(10)).unwrap();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].ranked_symbols, 118);
    }
}
