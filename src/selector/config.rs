//! Regime classifier and agent selector configuration

use serde::{Deserialize, Serialize};

/// Regime classification thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Vol ratio threshold: short/long > this → HighVol
    #[serde(default = "default_high_vol_ratio")]
    pub high_vol_ratio: f64,

    /// Vol ratio threshold: short/long < this → LowVol
    #[serde(default = "default_low_vol_ratio")]
    pub low_vol_ratio: f64,

    /// Vol ratio at or above which volatility is reported as Extreme
    #[serde(default = "default_extreme_vol_ratio")]
    pub extreme_vol_ratio: f64,

    /// Minimum momentum/volatility ratio (0.0-1.0) to declare Trending
    #[serde(default = "default_trend_threshold")]
    pub trend_threshold: f64,

    /// Number of consecutive same-regime readings before transition
    #[serde(default = "default_confirmation_count")]
    pub confirmation_count: u32,
}

fn default_high_vol_ratio() -> f64 {
    1.5
}
fn default_low_vol_ratio() -> f64 {
    0.7
}
fn default_extreme_vol_ratio() -> f64 {
    2.5
}
fn default_trend_threshold() -> f64 {
    0.65
}
fn default_confirmation_count() -> u32 {
    2
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            high_vol_ratio: default_high_vol_ratio(),
            low_vol_ratio: default_low_vol_ratio(),
            extreme_vol_ratio: default_extreme_vol_ratio(),
            trend_threshold: default_trend_threshold(),
            confirmation_count: default_confirmation_count(),
        }
    }
}

/// Agent selection thresholds and rolling-window sizes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Risk score above which the constrained policy may be forced
    #[serde(default = "default_override_risk")]
    pub override_risk: f64,

    /// Constraint need that must accompany `override_risk`
    #[serde(default = "default_override_constraint_need")]
    pub override_constraint_need: f64,

    /// Volatility score above which the constrained policy is forced
    #[serde(default = "default_override_volatility")]
    pub override_volatility: f64,

    /// Stability score above which (with trend) the baseline policy is forced
    #[serde(default = "default_override_stability")]
    pub override_stability: f64,

    /// Trend score that must accompany `override_stability`
    #[serde(default = "default_override_trend")]
    pub override_trend: f64,

    /// Confidence assigned to hard overrides
    #[serde(default = "default_override_confidence")]
    pub override_confidence: f64,

    /// Number of past selections kept for frequency statistics
    #[serde(default = "default_selection_window")]
    pub selection_window: usize,

    /// Number of past confidences kept for the rolling average
    #[serde(default = "default_confidence_window")]
    pub confidence_window: usize,

    /// Number of trade returns kept per policy
    #[serde(default = "default_performance_window")]
    pub performance_window: usize,
}

fn default_override_risk() -> f64 {
    0.8
}
fn default_override_constraint_need() -> f64 {
    0.7
}
fn default_override_volatility() -> f64 {
    0.9
}
fn default_override_stability() -> f64 {
    0.8
}
fn default_override_trend() -> f64 {
    0.8
}
fn default_override_confidence() -> f64 {
    0.9
}
fn default_selection_window() -> usize {
    100
}
fn default_confidence_window() -> usize {
    50
}
fn default_performance_window() -> usize {
    100
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            override_risk: default_override_risk(),
            override_constraint_need: default_override_constraint_need(),
            override_volatility: default_override_volatility(),
            override_stability: default_override_stability(),
            override_trend: default_override_trend(),
            override_confidence: default_override_confidence(),
            selection_window: default_selection_window(),
            confidence_window: default_confidence_window(),
            performance_window: default_performance_window(),
        }
    }
}

impl SelectorConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (name, v) in [
            ("override_risk", self.override_risk),
            ("override_constraint_need", self.override_constraint_need),
            ("override_volatility", self.override_volatility),
            ("override_stability", self.override_stability),
            ("override_trend", self.override_trend),
            ("override_confidence", self.override_confidence),
        ] {
            if !(0.0..=1.0).contains(&v) {
                errors.push(format!("selector.{name} must be within [0, 1], got {v}"));
            }
        }
        if self.selection_window == 0 || self.confidence_window == 0 || self.performance_window == 0 {
            errors.push("selector windows must be positive".to_string());
        }
        errors
    }
}
