//! Result sinks for a completed scan.
//!
//! Writes, per scan date, under `<out_dir>/<YYYY-MM-DD>/`:
//! - `todays_scan.csv`: ranked candidates in ranking order
//! - `debug_checks.csv`: one row per universe symbol with its reason
//! - `scan_summary.json`: counts and timing
//!
//! and renders the console top-N table.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::data::OhlcvStore;

use super::engine::{RankedRecord, ScanResult};

pub const RANKED_FILE: &str = "todays_scan.csv";
pub const DIAGNOSTICS_FILE: &str = "debug_checks.csv";
pub const SUMMARY_FILE: &str = "scan_summary.json";

/// Paths written by [`ScanReport::write_all`].
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub dir: PathBuf,
    pub ranked: PathBuf,
    pub diagnostics: PathBuf,
    pub summary: PathBuf,
}

/// Report writer for scan results.
pub struct ScanReport<'a> {
    result: &'a ScanResult,
}

impl<'a> ScanReport<'a> {
    pub fn new(result: &'a ScanResult) -> Self {
        Self { result }
    }

    /// Dated output directory under `out_root`.
    pub fn dated_dir(&self, out_root: &Path) -> PathBuf {
        out_root.join(self.result.summary.scan_date.format("%Y-%m-%d").to_string())
    }

    /// Write every file sink. An unwritable output directory fails the run.
    pub fn write_all(&self, out_root: &Path) -> Result<ReportPaths> {
        let dir = self.dated_dir(out_root);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

        let paths = ReportPaths {
            ranked: dir.join(RANKED_FILE),
            diagnostics: dir.join(DIAGNOSTICS_FILE),
            summary: dir.join(SUMMARY_FILE),
            dir,
        };

        self.write_ranked(&paths.ranked)?;
        self.write_diagnostics(&paths.diagnostics)?;
        self.write_summary(&paths.summary)?;

        info!(
            dir = %paths.dir.display(),
            ranked = self.result.ranked.len(),
            diagnostics = self.result.diagnostics.len(),
            "Wrote scan outputs"
        );
        Ok(paths)
    }

    /// Ranked CSV. The header is written even when nothing ranked.
    pub fn write_ranked(&self, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writer.write_record(RANKED_HEADER)?;
        for record in &self.result.ranked {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Diagnostic CSV in universe order.
    pub fn write_diagnostics(&self, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writer.write_record(DIAGNOSTICS_HEADER)?;
        for record in &self.result.diagnostics {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_summary(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.result.summary)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Record run metadata in the durable store. Failure is logged only.
    pub async fn record_to_store(&self, store: &dyn OhlcvStore) {
        let meta = self.result.summary.to_meta();
        if let Err(e) = store.record_scan(&meta).await {
            warn!(scan_id = %meta.scan_id, error = %e, "Failed to record scan metadata");
        }
    }

    /// Console table of the top `n` candidates.
    pub fn console_table(&self, n: usize) -> String {
        let top = self.result.top(n);
        let mut out = String::new();

        let _ = writeln!(out, "{}", self.result.summary.line());
        if top.is_empty() {
            let _ = writeln!(out, "No candidates ranked.");
            return out;
        }

        let _ = writeln!(
            out,
            "{:>3}  {:<14} {:>7} {:>10} {:>10} {:>7} {:>7} {:>6} {:>6} {:>8}  {}",
            "#", "symbol", "score", "close", "pivot", "box%", "pivot%", "atr", "vol", "tv20cr", "tags"
        );
        for (i, r) in top.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>3}  {:<14} {:>7.4} {:>10.2} {:>10.2} {:>7.2} {:>7.2} {:>6.2} {:>6} {:>8.2}  {}",
                i + 1,
                r.symbol,
                r.score,
                r.close,
                r.pivot,
                r.box_span_pct,
                r.dist_to_pivot_pct,
                r.atr_ratio,
                r.vol5_to_vol50.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v)),
                r.tv20_cr,
                tags(r)
            );
        }
        out
    }
}

const RANKED_HEADER: [&str; 13] = [
    "symbol",
    "score",
    "close",
    "pivot",
    "dist_to_pivot_pct",
    "box_span_pct",
    "atr_ratio",
    "vol5_to_vol50",
    "uptrend",
    "within_20pct_high",
    "nr7_today",
    "inside_today",
    "tv20_cr",
];

const DIAGNOSTICS_HEADER: [&str; 16] = [
    "symbol",
    "reason",
    "detail",
    "bars",
    "close",
    "tv20_cr",
    "score",
    "pivot",
    "dist_to_pivot_pct",
    "box_span_pct",
    "atr_ratio",
    "vol5_to_vol50",
    "uptrend",
    "within_20pct_high",
    "nr7_today",
    "inside_today",
];

fn tags(r: &RankedRecord) -> String {
    let mut tags = Vec::new();
    if r.uptrend {
        tags.push("UP");
    }
    if r.within_20pct_high {
        tags.push("NEARHI");
    }
    if r.nr7_today {
        tags.push("NR7");
    }
    if r.inside_today {
        tags.push("IN");
    }
    tags.join(",")
}
