//! Composite setup score.
//!
//! Each of the four metrics maps to a sub-score in [0, 1] where a lower raw
//! value scores higher: `1 − min(value, cap) / cap`, clamped. The composite
//! is the weighted sum plus flat bonuses for an uptrend and for trading near
//! the yearly high. It is a ranking statistic and is not normalised, so it
//! can exceed 1.

use serde::{Deserialize, Serialize};
use swing_common::config::ScoringConfig;

use super::features::{MetricsRecord, SENTINEL};

/// Anything that turns a metrics record into a ranking score.
pub trait Scorer: Send + Sync {
    fn score(&self, metrics: &MetricsRecord) -> f64;
}

/// Per-component view of a score, for debug output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub box_score: f64,
    pub atr_score: f64,
    pub vol_score: f64,
    pub pivot_score: f64,
    pub bonus: f64,
    pub total: f64,
}

/// Weighted-sum scoring model with immutable weights and caps.
#[derive(Debug, Clone)]
pub struct ScoringModel {
    config: ScoringConfig,
}

impl ScoringModel {
    /// Caps must be positive; `Config::validate` enforces that upstream.
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// `clamp01(1 − min(value, cap) / cap)`. Non-finite values score 0.
    pub fn sub_score(value: f64, cap: f64) -> f64 {
        if !value.is_finite() || cap <= 0.0 {
            return 0.0;
        }
        (1.0 - value.min(cap) / cap).clamp(0.0, 1.0)
    }

    pub fn breakdown(&self, m: &MetricsRecord) -> ScoreBreakdown {
        let c = &self.config;

        let box_score = Self::sub_score(m.box_span_frac, c.box_cap);
        let atr_score = Self::sub_score(m.atr_ratio.unwrap_or(SENTINEL), c.atr_cap);
        let vol_score = Self::sub_score(m.vol_ratio.unwrap_or(SENTINEL), c.vol_cap);
        let pivot_score = Self::sub_score(m.dist_to_pivot, c.pivot_tolerance);

        let mut bonus = 0.0;
        if m.uptrend {
            bonus += c.bonus_uptrend;
        }
        if m.within_20pct_high {
            bonus += c.bonus_near_high;
        }

        let total = c.w_box * box_score
            + c.w_atr * atr_score
            + c.w_vol * vol_score
            + c.w_pivot * pivot_score
            + bonus;

        ScoreBreakdown {
            box_score,
            atr_score,
            vol_score,
            pivot_score,
            bonus,
            total,
        }
    }
}

impl Scorer for ScoringModel {
    fn score(&self, metrics: &MetricsRecord) -> f64 {
        self.breakdown(metrics).total
    }
}
