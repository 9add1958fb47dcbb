//! Kite Connect adapter for NSE daily bars.
//!
//! # API Documentation
//! <https://kite.trade/docs/connect/v3/historical/>
//!
//! # Endpoints
//! - `GET /instruments/{exchange}`: instrument master, gzipped CSV
//! - `GET /instruments/historical/{token}/{interval}`: OHLCV candles as JSON
//!
//! # Authentication
//! Every request carries `Authorization: token {api_key}:{access_token}`.
//! Obtaining the access token (the daily login flow) happens outside the
//! scanner; this adapter only reads the resulting tokens file.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use swing_common::config::KiteConfig;
use swing_common::error::{Error as CommonError, Result as CommonResult, ResultExt};

use super::provider::{HistoricalProvider, ProviderError};
use super::{Bar, InstrumentMap, Interval};

// ============================================================================
// Constants
// ============================================================================

/// API version header value
const KITE_VERSION: &str = "3";

/// Retry hint reported on 429 when the response has no Retry-After header
const RATE_LIMIT_RETRY_SECS: u64 = 1;

// ============================================================================
// Credentials
// ============================================================================

/// API key plus the day's access token.
#[derive(Clone)]
pub struct KiteCredentials {
    pub api_key: String,
    pub access_token: String,
}

impl std::fmt::Debug for KiteCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiteCredentials")
            .field("api_key", &self.api_key)
            .field("access_token", &"***")
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokensFile {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl KiteCredentials {
    /// Load credentials from the tokens file with `KITE_API_KEY` and
    /// `KITE_ACCESS_TOKEN` as fallbacks.
    pub fn load(path: &Path) -> CommonResult<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Like [`KiteCredentials::load`] with an explicit environment lookup.
    pub fn load_with<F>(path: &Path, lookup: F) -> CommonResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = if path.exists() {
            let content = std::fs::read_to_string(path)
                .context(format!("reading {}", path.display()))?;
            serde_json::from_str::<TokensFile>(&content)
                .context(format!("parsing {}", path.display()))?
        } else {
            TokensFile::default()
        };

        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let api_key = non_empty(file.api_key)
            .or_else(|| non_empty(lookup("KITE_API_KEY")))
            .ok_or_else(|| {
                CommonError::Auth(format!("no api_key in {} or KITE_API_KEY", path.display()))
            })?;
        let access_token = non_empty(file.access_token)
            .or_else(|| non_empty(lookup("KITE_ACCESS_TOKEN")))
            .ok_or_else(|| {
                CommonError::Auth(format!(
                    "no access_token in {} or KITE_ACCESS_TOKEN; run the login flow first",
                    path.display()
                ))
            })?;

        Ok(Self {
            api_key,
            access_token,
        })
    }

    fn authorization(&self) -> String {
        format!("token {}:{}", self.api_key, self.access_token)
    }
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct KiteEnvelope<T> {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CandleData {
    #[serde(default)]
    candles: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct KiteErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
}

// ============================================================================
// Adapter
// ============================================================================

/// Kite Connect adapter.
pub struct KiteAdapter {
    base_url: String,
    exchange: String,
    credentials: KiteCredentials,
    client: reqwest::Client,
}

impl KiteAdapter {
    /// Create an adapter from config and loaded credentials.
    pub fn new(credentials: KiteCredentials, config: &KiteConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            exchange: config.exchange.clone(),
            credentials,
            client,
        }
    }

    /// Load credentials from `config.tokens_path` and build the adapter.
    ///
    /// Missing credentials abort the run before any symbol is processed.
    pub fn from_config(config: &KiteConfig) -> CommonResult<Self> {
        let path = swing_common::config::expand_path(&config.tokens_path);
        let credentials = KiteCredentials::load(&path).context("loading Kite credentials")?;
        Ok(Self::new(credentials, config))
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, ProviderError> {
        debug!(url = %url, "Kite request");

        let response = self
            .client
            .get(url)
            .header("X-Kite-Version", KITE_VERSION)
            .header("Authorization", self.credentials.authorization())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Network("Request timeout".into())
                } else if e.is_connect() {
                    ProviderError::Network("Connection failed".into())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .or(Some(RATE_LIMIT_RETRY_SECS));
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<KiteErrorBody>(&body)
            .ok()
            .map(|b| {
                format!(
                    "{}: {}",
                    b.error_type.unwrap_or_else(|| "Error".into()),
                    b.message.unwrap_or_default()
                )
            })
            .unwrap_or(body);

        Err(match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                ProviderError::Auth(detail)
            }
            s if s.is_server_error() => ProviderError::Unavailable(format!("HTTP {}: {}", s, detail)),
            s => ProviderError::Internal(format!("HTTP {}: {}", s, detail)),
        })
    }

    /// Parse `[timestamp, open, high, low, close, volume, (oi)]` candle rows.
    fn parse_candles(symbol: &str, rows: &[Vec<serde_json::Value>]) -> Result<Vec<Bar>, ProviderError> {
        let mut bars = Vec::with_capacity(rows.len());

        for row in rows {
            if row.len() < 6 {
                return Err(ProviderError::Internal(format!(
                    "Short candle row for {}: {} fields",
                    symbol,
                    row.len()
                )));
            }

            let stamp = row[0].as_str().unwrap_or_default();
            let date = stamp
                .get(..10)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                .ok_or_else(|| ProviderError::Internal(format!("Invalid candle timestamp: {}", stamp)))?;

            let num = |i: usize| {
                row[i].as_f64().ok_or_else(|| {
                    ProviderError::Internal(format!("Non-numeric candle field {} for {}", i, symbol))
                })
            };

            bars.push(Bar {
                date,
                open: num(1)?,
                high: num(2)?,
                low: num(3)?,
                close: num(4)?,
                volume: num(5)?.max(0.0).round() as u64,
            });
        }

        Ok(bars)
    }
}

// ============================================================================
// HistoricalProvider Implementation
// ============================================================================

#[async_trait]
impl HistoricalProvider for KiteAdapter {
    fn name(&self) -> &'static str {
        "kite"
    }

    async fn instruments(&self) -> Result<InstrumentMap, ProviderError> {
        let url = format!("{}/instruments/{}", self.base_url, self.exchange);
        let text = self
            .get(&url)
            .await?
            .text()
            .await
            .map_err(|e| ProviderError::Network(format!("Failed to read instrument master: {}", e)))?;

        let map = InstrumentMap::from_kite_csv(&text, &self.exchange)?;
        if map.is_empty() {
            return Err(ProviderError::DataNotAvailable(format!(
                "no {} equities in instrument master",
                self.exchange
            )));
        }
        Ok(map)
    }

    async fn historical_bars(
        &self,
        token: u64,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        interval: Interval,
    ) -> Result<Vec<Bar>, ProviderError> {
        if from > to {
            return Err(ProviderError::InvalidRequest(format!(
                "from {} is after to {}",
                from, to
            )));
        }

        let url = format!(
            "{}/instruments/historical/{}/{}?from={}&to={}",
            self.base_url,
            token,
            interval.as_str(),
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );

        let envelope: KiteEnvelope<CandleData> = self
            .get(&url)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Internal(format!("Failed to parse response: {}", e)))?;

        if envelope.status != "success" {
            return Err(ProviderError::Internal(
                envelope.message.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }

        let candles = envelope.data.map(|d| d.candles).unwrap_or_default();
        let bars = Self::parse_candles(symbol, &candles)?;
        debug!(symbol, token, count = bars.len(), %from, %to, "Fetched candles from Kite");
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup_none(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_credentials_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, r#"{"api_key": "abc", "access_token": "xyz"}"#).unwrap();

        let creds = KiteCredentials::load_with(&path, lookup_none).unwrap();
        assert_eq!(creds.api_key, "abc");
        assert_eq!(creds.authorization(), "token abc:xyz");
        assert!(!format!("{:?}", creds).contains("xyz"));
    }

    #[test]
    fn test_credentials_env_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, r#"{"access_token": "xyz"}"#).unwrap();

        let creds = KiteCredentials::load_with(&path, |k| {
            (k == "KITE_API_KEY").then(|| "env-key".to_string())
        })
        .unwrap();
        assert_eq!(creds.api_key, "env-key");
    }

    #[test]
    fn test_missing_access_token_is_auth_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");

        let err = KiteCredentials::load_with(&path, |k| {
            (k == "KITE_API_KEY").then(|| "env-key".to_string())
        })
        .unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn test_parse_candles() {
        let rows: Vec<Vec<serde_json::Value>> = vec![
            vec![json!("2024-01-02T00:00:00+0530"), json!(1510.0), json!(1525.5), json!(1502.0), json!(1520.25), json!(4125000)],
            vec![json!("2024-01-03T00:00:00+0530"), json!(1520.0), json!(1531.0), json!(1511.0), json!(1515.0), json!(3980000), json!(0)],
        ];
        let bars = KiteAdapter::parse_candles("INFY", &rows).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[0].volume, 4_125_000);
        assert_eq!(bars[1].close, 1515.0);
    }

    #[test]
    fn test_parse_candles_rejects_short_row() {
        let rows = vec![vec![json!("2024-01-02T00:00:00+0530"), json!(1.0)]];
        assert!(matches!(
            KiteAdapter::parse_candles("INFY", &rows),
            Err(ProviderError::Internal(_))
        ));
    }
}
