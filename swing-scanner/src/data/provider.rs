//! Upstream historical data abstraction.
//!
//! Defines the `HistoricalProvider` trait the scanner fetches bars through,
//! so the Kite adapter, the offline provider, and test doubles are
//! interchangeable.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;

use super::{Bar, InstrumentMap, Interval};

// ============================================================================
// Provider Error
// ============================================================================

/// Errors specific to data providers.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Network error (connection failed, timeout)
    Network(String),
    /// Authentication error (invalid or expired access token)
    Auth(String),
    /// Rate limit exceeded
    RateLimited { retry_after_secs: Option<u64> },
    /// Data not available for the requested instrument/range
    DataNotAvailable(String),
    /// Provider is temporarily unavailable (or disabled, as in offline mode)
    Unavailable(String),
    /// Invalid request parameters
    InvalidRequest(String),
    /// Internal provider error
    Internal(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Auth(msg) => write!(f, "Authentication error: {}", msg),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after_secs {
                    write!(f, ", retry after {} seconds", secs)?;
                }
                Ok(())
            }
            Self::DataNotAvailable(msg) => write!(f, "Data not available: {}", msg),
            Self::Unavailable(msg) => write!(f, "Provider unavailable: {}", msg),
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    /// Transient failures that a later run may not hit.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Unavailable(_)
        )
    }

    /// Failures that will hit every symbol in the run, not just this one.
    pub fn is_run_wide(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Unavailable(_))
    }
}

// ============================================================================
// Historical Provider Trait
// ============================================================================

/// Trait for upstream daily-bar providers.
///
/// Failures are never retried by the scanner. A failed fetch disqualifies
/// only the symbol it was for.
#[async_trait]
pub trait HistoricalProvider: Send + Sync {
    /// Provider name for logging (e.g. "kite", "offline")
    fn name(&self) -> &'static str;

    /// True when the provider never reaches the network.
    ///
    /// Offline providers skip fetch pacing and do not overwrite the
    /// persisted instrument map.
    fn is_offline(&self) -> bool {
        false
    }

    /// Load the ticker → instrument token map.
    async fn instruments(&self) -> Result<InstrumentMap, ProviderError>;

    /// Fetch bars for one instrument with `from <= date <= to`.
    ///
    /// # Arguments
    /// * `token` - Provider-assigned instrument token
    /// * `symbol` - Ticker, used for logging and error messages only
    /// * `from` - First date requested (inclusive)
    /// * `to` - Last date requested (inclusive)
    /// * `interval` - Bar interval
    async fn historical_bars(
        &self,
        token: u64,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        interval: Interval,
    ) -> Result<Vec<Bar>, ProviderError>;
}
