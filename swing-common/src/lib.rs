//! Swing Common - configuration, error types, and logging shared by the
//! swing scanner crates.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    Config, FilterConfig, KiteConfig, ObservabilityConfig, ScanConfig, ScoringConfig,
    StorageConfig,
};
pub use error::{Error, Result, ResultExt};
