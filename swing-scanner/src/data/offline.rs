//! Offline provider backed by the persisted instrument map.
//!
//! Every bar request fails with `Unavailable`, so the series cache serves
//! whatever it already holds. Used for backtests and re-runs without
//! network access.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::PathBuf;

use super::provider::{HistoricalProvider, ProviderError};
use super::{Bar, InstrumentMap, Interval};

pub struct OfflineProvider {
    instruments_path: PathBuf,
}

impl OfflineProvider {
    pub fn new(instruments_path: impl Into<PathBuf>) -> Self {
        Self {
            instruments_path: instruments_path.into(),
        }
    }
}

#[async_trait]
impl HistoricalProvider for OfflineProvider {
    fn name(&self) -> &'static str {
        "offline"
    }

    fn is_offline(&self) -> bool {
        true
    }

    async fn instruments(&self) -> Result<InstrumentMap, ProviderError> {
        InstrumentMap::load_csv(&self.instruments_path).map_err(|e| {
            ProviderError::DataNotAvailable(format!(
                "{:#} (run one online scan to create it)",
                e
            ))
        })
    }

    async fn historical_bars(
        &self,
        _token: u64,
        symbol: &str,
        _from: NaiveDate,
        _to: NaiveDate,
        _interval: Interval,
    ) -> Result<Vec<Bar>, ProviderError> {
        Err(ProviderError::Unavailable(format!(
            "offline mode, no upstream fetch for {}",
            symbol
        )))
    }
}
