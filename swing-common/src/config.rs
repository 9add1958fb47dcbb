//! Configuration management for the swing scanner.
//!
//! The scanner reads a single JSON file (`~/.swingscan/config.json`, or the
//! path in `SWING_CONFIG`). Every field has a default, so a missing file is a
//! valid configuration.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! ## Scan
//! - `UNIVERSE_PATH` → scan.universe_path
//! - `HISTORY_DAYS` → scan.history_days
//! - `BOX_LEN` → scan.box_len
//! - `BOX_SPAN` → scan.box_max_span
//! - `TOP_N` → scan.top_n
//! - `PAUSE_SECS` → scan.pause_secs
//! - `SCAN_WORKERS` → scan.workers
//!
//! ## Filters
//! - `PRICE_FLOOR` → scan.filters.price_floor
//! - `MIN_DV_CR` → scan.filters.min_traded_value_cr
//! - `MIN_BARS` → scan.filters.min_bars
//!
//! ## Scoring
//! - `BOX_CAP`, `ATR_CAP`, `VOL_CAP`, `PIVOT_TOL` → scan.scoring caps
//! - `W_BOX`, `W_ATR`, `W_VOL`, `W_PIVOT` → scan.scoring weights
//! - `BONUS_UPTREND`, `BONUS_NEARHIGH` → scan.scoring bonuses
//!
//! ## Paths
//! - `CACHE_DIR` → storage.cache_dir
//! - `OUT_DIR` → storage.out_dir
//! - `DB_PATH` → storage.db_path
//! - `KITE_TOKENS_PATH` → kite.tokens_path
//!
//! ## Logging
//! - `SWING_LOG_LEVEL` → observability.log_level

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Error;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".swingscan"),
        |dirs| dirs.home_dir().join(".swingscan"),
    )
}

/// Get the configuration file path.
///
/// `SWING_CONFIG` takes precedence over the default location.
pub fn config_path() -> PathBuf {
    std::env::var("SWING_CONFIG")
        .map(|p| expand_path(&p))
        .unwrap_or_else(|_| config_dir().join("config.json"))
}

/// Expand a leading `~` to the home directory. `$VAR` references are kept
/// literally.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Upstream market data provider (Kite Connect)
    #[serde(default)]
    pub kite: KiteConfig,

    /// Cache, database, and output locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Scanner tunables
    #[serde(default)]
    pub scan: ScanConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Apply process environment overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Values that fail to parse are ignored and the existing value is kept.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let scan = &mut self.scan;
        if let Some(path) = lookup("UNIVERSE_PATH") {
            scan.universe_path = path;
        }
        override_parsed(&lookup, "HISTORY_DAYS", &mut scan.history_days);
        override_parsed(&lookup, "BOX_LEN", &mut scan.box_len);
        override_parsed(&lookup, "BOX_SPAN", &mut scan.box_max_span);
        override_parsed(&lookup, "TOP_N", &mut scan.top_n);
        override_parsed(&lookup, "PAUSE_SECS", &mut scan.pause_secs);
        override_parsed(&lookup, "SCAN_WORKERS", &mut scan.workers);

        let filters = &mut scan.filters;
        override_parsed(&lookup, "PRICE_FLOOR", &mut filters.price_floor);
        override_parsed(&lookup, "MIN_DV_CR", &mut filters.min_traded_value_cr);
        override_parsed(&lookup, "MIN_BARS", &mut filters.min_bars);

        let scoring = &mut scan.scoring;
        override_parsed(&lookup, "BOX_CAP", &mut scoring.box_cap);
        override_parsed(&lookup, "ATR_CAP", &mut scoring.atr_cap);
        override_parsed(&lookup, "VOL_CAP", &mut scoring.vol_cap);
        override_parsed(&lookup, "PIVOT_TOL", &mut scoring.pivot_tolerance);
        override_parsed(&lookup, "W_BOX", &mut scoring.w_box);
        override_parsed(&lookup, "W_ATR", &mut scoring.w_atr);
        override_parsed(&lookup, "W_VOL", &mut scoring.w_vol);
        override_parsed(&lookup, "W_PIVOT", &mut scoring.w_pivot);
        override_parsed(&lookup, "BONUS_UPTREND", &mut scoring.bonus_uptrend);
        override_parsed(&lookup, "BONUS_NEARHIGH", &mut scoring.bonus_near_high);

        if let Some(dir) = lookup("CACHE_DIR") {
            self.storage.cache_dir = dir;
        }
        if let Some(dir) = lookup("OUT_DIR") {
            self.storage.out_dir = dir;
        }
        if let Some(path) = lookup("DB_PATH") {
            self.storage.db_path = path;
        }
        if let Some(path) = lookup("KITE_TOKENS_PATH") {
            self.kite.tokens_path = path;
        }
        if let Some(level) = lookup("SWING_LOG_LEVEL") {
            self.observability.log_level = level;
        }
    }

    /// Reject configurations the scanner cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let scoring = &self.scan.scoring;
        for (name, cap) in [
            ("box_cap", scoring.box_cap),
            ("atr_cap", scoring.atr_cap),
            ("vol_cap", scoring.vol_cap),
            ("pivot_tolerance", scoring.pivot_tolerance),
        ] {
            if !(cap > 0.0) || !cap.is_finite() {
                return Err(Error::Config(format!("{name} must be positive, got {cap}")));
            }
        }
        if self.scan.box_len == 0 {
            return Err(Error::Config("box_len must be at least 1".into()));
        }
        if self.scan.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.scan.pause_secs < 0.0 {
            return Err(Error::Config("pause_secs cannot be negative".into()));
        }
        Ok(())
    }
}

fn override_parsed<T, F>(lookup: &F, key: &str, target: &mut T)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable override"),
        }
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets pinned to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Provider
// ============================================================================

/// Kite Connect provider configuration.
///
/// Credentials are never stored here; the tokens file is written by the
/// login flow, which lives outside the scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KiteConfig {
    /// Path to the tokens file holding `api_key` and `access_token`
    #[serde(default = "default_tokens_path")]
    pub tokens_path: String,

    /// REST API base URL
    #[serde(default = "default_kite_base_url")]
    pub base_url: String,

    /// Exchange whose instrument master is loaded
    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// HTTP timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for KiteConfig {
    fn default() -> Self {
        Self {
            tokens_path: default_tokens_path(),
            base_url: default_kite_base_url(),
            exchange: default_exchange(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_tokens_path() -> String {
    "tokens.json".into()
}

fn default_kite_base_url() -> String {
    "https://api.kite.trade".into()
}

fn default_exchange() -> String {
    "NSE".into()
}

fn default_timeout_secs() -> u64 {
    30
}

// ============================================================================
// Storage
// ============================================================================

/// Locations of the series cache, the OHLCV database, and result files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one CSV per symbol plus the instrument map
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Root directory for dated scan outputs
    #[serde(default = "default_out_dir")]
    pub out_dir: String,

    /// SQLite database for the durable OHLCV store
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            out_dir: default_out_dir(),
            db_path: default_db_path(),
        }
    }
}

impl StorageConfig {
    pub fn cache_dir(&self) -> PathBuf {
        expand_path(&self.cache_dir)
    }

    pub fn out_dir(&self) -> PathBuf {
        expand_path(&self.out_dir)
    }

    pub fn db_path(&self) -> PathBuf {
        expand_path(&self.db_path)
    }
}

fn default_cache_dir() -> String {
    "cache".into()
}

fn default_out_dir() -> String {
    "out".into()
}

fn default_db_path() -> String {
    "data/ohlc.db".into()
}

// ============================================================================
// Scan
// ============================================================================

/// Scanner tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Newline-delimited list of tickers
    #[serde(default = "default_universe_path")]
    pub universe_path: String,

    /// Calendar days of history requested on a cold cache
    #[serde(default = "default_history_days")]
    pub history_days: u32,

    /// Consolidation window length in bars
    #[serde(default = "default_box_len")]
    pub box_len: usize,

    /// Span fraction under which a box counts as tight
    #[serde(default = "default_box_max_span")]
    pub box_max_span: f64,

    /// Rows shown in the console summary
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Delay after each upstream fetch, in seconds
    #[serde(default = "default_pause_secs")]
    pub pause_secs: f64,

    /// Concurrent symbol workers (1 = sequential)
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub filters: FilterConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            universe_path: default_universe_path(),
            history_days: default_history_days(),
            box_len: default_box_len(),
            box_max_span: default_box_max_span(),
            top_n: default_top_n(),
            pause_secs: default_pause_secs(),
            workers: default_workers(),
            filters: FilterConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

fn default_universe_path() -> String {
    "data/universe_nifty500.txt".into()
}

fn default_history_days() -> u32 {
    600
}

fn default_box_len() -> usize {
    12
}

fn default_box_max_span() -> f64 {
    0.10
}

fn default_top_n() -> usize {
    50
}

fn default_pause_secs() -> f64 {
    0.12
}

fn default_workers() -> usize {
    1
}

/// Liquidity and history gates applied before scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Minimum last close, in currency units
    #[serde(default = "default_price_floor")]
    pub price_floor: f64,

    /// Minimum 20-bar average traded value, in crore
    #[serde(default = "default_min_traded_value_cr")]
    pub min_traded_value_cr: f64,

    /// Minimum bars required for the 200-bar feature windows
    #[serde(default = "default_min_bars")]
    pub min_bars: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            price_floor: default_price_floor(),
            min_traded_value_cr: default_min_traded_value_cr(),
            min_bars: default_min_bars(),
        }
    }
}

fn default_price_floor() -> f64 {
    100.0
}

fn default_min_traded_value_cr() -> f64 {
    5.0
}

fn default_min_bars() -> usize {
    220
}

/// Weights, caps, and bonuses of the composite score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Box span fraction at or above which the box sub-score is 0
    #[serde(default = "default_box_cap")]
    pub box_cap: f64,
    /// ATR ratio at or above which the ATR sub-score is 0
    #[serde(default = "default_ratio_cap")]
    pub atr_cap: f64,
    /// Volume ratio at or above which the volume sub-score is 0
    #[serde(default = "default_ratio_cap")]
    pub vol_cap: f64,
    /// Pivot distance at or above which the pivot sub-score is 0
    #[serde(default = "default_pivot_tolerance")]
    pub pivot_tolerance: f64,

    #[serde(default = "default_w_box")]
    pub w_box: f64,
    #[serde(default = "default_w_atr")]
    pub w_atr: f64,
    #[serde(default = "default_w_vol")]
    pub w_vol: f64,
    #[serde(default = "default_w_pivot")]
    pub w_pivot: f64,

    #[serde(default = "default_bonus")]
    pub bonus_uptrend: f64,
    #[serde(default = "default_bonus")]
    pub bonus_near_high: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            box_cap: default_box_cap(),
            atr_cap: default_ratio_cap(),
            vol_cap: default_ratio_cap(),
            pivot_tolerance: default_pivot_tolerance(),
            w_box: default_w_box(),
            w_atr: default_w_atr(),
            w_vol: default_w_vol(),
            w_pivot: default_w_pivot(),
            bonus_uptrend: default_bonus(),
            bonus_near_high: default_bonus(),
        }
    }
}

fn default_box_cap() -> f64 {
    0.12
}

fn default_ratio_cap() -> f64 {
    1.20
}

fn default_pivot_tolerance() -> f64 {
    0.03
}

fn default_w_box() -> f64 {
    0.30
}

fn default_w_atr() -> f64 {
    0.25
}

fn default_w_vol() -> f64 {
    0.20
}

fn default_w_pivot() -> f64 {
    0.25
}

fn default_bonus() -> f64 {
    0.05
}

// ============================================================================
// Tests
// ============================================================================
