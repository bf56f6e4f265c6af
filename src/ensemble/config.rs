use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ensemble inference parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// Stochastic passes per policy for uncertainty estimation
    #[serde(default = "default_passes")]
    pub uncertainty_passes: usize,

    /// Inference dropout rate used by the stochastic passes
    #[serde(default = "default_dropout")]
    pub dropout_rate: f64,

    /// RNG seed; equal inputs and seed give equal uncertainty
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Epistemic inflation per fully-missing ensemble
    #[serde(default = "default_missing_member_penalty")]
    pub missing_member_penalty: f64,

    /// Minimum selector confidence for its policy to become authoritative
    #[serde(default = "default_authority_threshold")]
    pub authority_threshold: f64,

    /// Total uncertainty above which reasoning flags the tick and intensity is cut
    #[serde(default = "default_high_uncertainty")]
    pub high_uncertainty: f64,

    #[serde(default = "default_sl_atr")]
    pub sl_atr_multiplier: f64,

    #[serde(default = "default_tp_atr")]
    pub tp_atr_multiplier: f64,

    #[serde(default = "default_min_rr")]
    pub min_risk_reward: f64,

    #[serde(default = "default_max_rr")]
    pub max_risk_reward: f64,
}

fn default_passes() -> usize {
    8
}
fn default_dropout() -> f64 {
    0.1
}
fn default_seed() -> u64 {
    0x5eed
}
fn default_missing_member_penalty() -> f64 {
    0.1
}
fn default_authority_threshold() -> f64 {
    0.6
}
fn default_high_uncertainty() -> f64 {
    0.6
}
fn default_sl_atr() -> f64 {
    1.5
}
fn default_tp_atr() -> f64 {
    3.0
}
fn default_min_rr() -> f64 {
    1.5
}
fn default_max_rr() -> f64 {
    3.0
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            uncertainty_passes: default_passes(),
            dropout_rate: default_dropout(),
            seed: default_seed(),
            missing_member_penalty: default_missing_member_penalty(),
            authority_threshold: default_authority_threshold(),
            high_uncertainty: default_high_uncertainty(),
            sl_atr_multiplier: default_sl_atr(),
            tp_atr_multiplier: default_tp_atr(),
            min_risk_reward: default_min_rr(),
            max_risk_reward: default_max_rr(),
        }
    }
}

impl EnsembleConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.uncertainty_passes == 0 {
            errors.push("ensemble.uncertainty_passes must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            errors.push(format!(
                "ensemble.dropout_rate must be within [0, 1), got {}",
                self.dropout_rate
            ));
        }
        if !(0.0..=1.0).contains(&self.authority_threshold) {
            errors.push("ensemble.authority_threshold must be within [0, 1]".to_string());
        }
        if self.sl_atr_multiplier <= 0.0 || self.tp_atr_multiplier <= 0.0 {
            errors.push("ensemble ATR multipliers must be positive".to_string());
        }
        if self.min_risk_reward <= 0.0 || self.min_risk_reward > self.max_risk_reward {
            errors.push("ensemble.min_risk_reward must be positive and <= max_risk_reward".to_string());
        }
        errors
    }
}

/// Policy model locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default)]
    pub baseline_path: Option<PathBuf>,

    #[serde(default)]
    pub constrained_path: Option<PathBuf>,

    /// Overrides the threshold stored in the constrained model file
    #[serde(default)]
    pub constraint_threshold: Option<f64>,
}

impl ModelsConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.baseline_path.is_none() && self.constrained_path.is_none() {
            errors.push("models: at least one policy path is required".to_string());
        }
        if let Some(t) = self.constraint_threshold {
            if !(0.0..=1.0).contains(&t) {
                errors.push(format!("models.constraint_threshold {t} outside [0, 1]"));
            }
        }
        errors
    }
}
