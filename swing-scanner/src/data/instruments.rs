//! Ticker → instrument token mapping.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use super::provider::{HistoricalProvider, ProviderError};

/// Equity instruments are the only ones the scanner addresses.
const EQUITY_TYPE: &str = "EQ";

/// Mapping from human-readable ticker to the provider's opaque token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentMap {
    tokens: HashMap<String, u64>,
}

/// Row of the persisted instrument map.
#[derive(Debug, Serialize, Deserialize)]
struct InstrumentRow {
    symbol: String,
    instrument_token: u64,
}

/// Subset of the Kite instrument master columns.
#[derive(Debug, Deserialize)]
struct KiteInstrumentRow {
    instrument_token: u64,
    tradingsymbol: String,
    #[serde(default)]
    instrument_type: String,
    #[serde(default)]
    segment: String,
}

impl InstrumentMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: impl Into<String>, token: u64) {
        self.tokens.insert(symbol.into(), token);
    }

    pub fn get(&self, symbol: &str) -> Option<u64> {
        self.tokens.get(symbol).copied()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Parse the Kite instrument master CSV, keeping equities of `segment`.
    ///
    /// Rows that fail to parse are skipped; the master carries derivative rows
    /// with columns equities never use.
    pub fn from_kite_csv(text: &str, segment: &str) -> Result<Self, ProviderError> {
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let headers = reader
            .headers()
            .map_err(|e| ProviderError::Internal(format!("Invalid instrument master: {}", e)))?
            .clone();
        if !headers.iter().any(|h| h == "tradingsymbol") {
            return Err(ProviderError::Internal(
                "Instrument master has no tradingsymbol column".into(),
            ));
        }

        let mut map = Self::new();
        for row in reader.deserialize::<KiteInstrumentRow>().flatten() {
            if row.segment == segment && row.instrument_type == EQUITY_TYPE {
                map.insert(row.tradingsymbol, row.instrument_token);
            }
        }
        Ok(map)
    }

    /// Load a map previously written by [`InstrumentMap::save_csv`].
    pub fn load_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open instrument map {}", path.display()))?;
        let mut map = Self::new();
        for row in reader.deserialize::<InstrumentRow>() {
            let row = row.with_context(|| format!("Malformed row in {}", path.display()))?;
            map.insert(row.symbol, row.instrument_token);
        }
        Ok(map)
    }

    /// Persist the map as `symbol,instrument_token` rows, sorted by symbol.
    pub fn save_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create instrument map {}", path.display()))?;

        let mut entries: Vec<_> = self.tokens.iter().collect();
        entries.sort();
        for (symbol, token) in entries {
            writer.serialize(InstrumentRow {
                symbol: symbol.clone(),
                instrument_token: *token,
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Load instruments from the provider and keep a copy at `persist_to`.
///
/// The copy is what offline runs resolve tokens from. Failing to write it
/// is logged and does not fail the run.
pub async fn resolve_instruments<P>(provider: &P, persist_to: &Path) -> Result<InstrumentMap>
where
    P: HistoricalProvider + ?Sized,
{
    let map = provider
        .instruments()
        .await
        .with_context(|| format!("Failed to load instruments from {}", provider.name()))?;

    info!(provider = provider.name(), count = map.len(), "Loaded instrument map");

    if !provider.is_offline() {
        if let Err(e) = map.save_csv(persist_to) {
            warn!(path = %persist_to.display(), error = %e, "Failed to persist instrument map");
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "\
instrument_token,exchange_token,tradingsymbol,name,last_price,expiry,strike,tick_size,lot_size,instrument_type,segment,exchange
408065,1594,INFY,INFOSYS,0,,0,0.05,1,EQ,NSE,NSE
2953217,11536,TCS,TATA CONSULTANCY SERV LT,0,,0,0.05,1,EQ,NSE,NSE
12345678,48225,NIFTY24JANFUT,,0,2024-01-25,0,0.05,50,FUT,NFO-FUT,NFO
256265,1001,NIFTY 50,NIFTY 50,0,,0,0,0,EQ,INDICES,NSE
";

    #[test]
    fn test_from_kite_csv_keeps_nse_equities() {
        let map = InstrumentMap::from_kite_csv(MASTER, "NSE").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("INFY"), Some(408065));
        assert_eq!(map.get("TCS"), Some(2953217));
        assert_eq!(map.get("NIFTY 50"), None);
        assert_eq!(map.get("NIFTY24JANFUT"), None);
    }

    #[test]
    fn test_from_kite_csv_rejects_foreign_body() {
        let err = InstrumentMap::from_kite_csv("status,message\nerror,bad", "NSE").unwrap_err();
        assert!(matches!(err, ProviderError::Internal(_)));
    }

    #[test]
    fn test_save_and_load_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("instruments.csv");

        let mut map = InstrumentMap::new();
        map.insert("INFY", 408065);
        map.insert("M&M", 519937);
        map.save_csv(&path).unwrap();

        let loaded = InstrumentMap::load_csv(&path).unwrap();
        assert_eq!(loaded, map);
    }
}
