//! Market regime classification
//!
//! Classifies the current market into one of four regimes:
//! - HighVol: short-term vol significantly exceeds long-term (spike)
//! - LowVol: short-term vol is well below long-term (quiet)
//! - Trending: strong directional momentum relative to volatility
//! - Ranging: neither trending nor vol-anomalous
//!
//! Callers with an external regime feed can build a `RegimeSnapshot`
//! directly; otherwise `RegimeClassifier` derives one from vol/momentum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::RegimeConfig;

/// Market regime classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketRegime {
    HighVol,
    LowVol,
    Trending,
    Ranging,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketRegime::HighVol => write!(f, "HighVol"),
            MarketRegime::LowVol => write!(f, "LowVol"),
            MarketRegime::Trending => write!(f, "Trending"),
            MarketRegime::Ranging => write!(f, "Ranging"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Sideways,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendStrength {
    Weak,
    Moderate,
    Strong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MomentumState {
    Accelerating,
    Steady,
    Decelerating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityLevel {
    Low,
    Normal,
    High,
    Extreme,
}

/// Point-in-time regime reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub regime: MarketRegime,
    pub trend_direction: TrendDirection,
    pub trend_strength: TrendStrength,
    pub momentum: MomentumState,
    /// Market stability (0.0 = chaotic, 1.0 = calm)
    pub stability: f64,
    pub volatility: VolatilityLevel,
    /// Confidence in the classification (0.0-1.0)
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "Utc::now")]
    pub computed_at: DateTime<Utc>,
}

fn default_confidence() -> f64 {
    0.5
}

impl Default for RegimeSnapshot {
    fn default() -> Self {
        Self {
            regime: MarketRegime::Ranging,
            trend_direction: TrendDirection::Sideways,
            trend_strength: TrendStrength::Weak,
            momentum: MomentumState::Steady,
            stability: 0.5,
            volatility: VolatilityLevel::Normal,
            confidence: default_confidence(),
            computed_at: Utc::now(),
        }
    }
}

impl RegimeSnapshot {
    pub fn is_volatile(&self) -> bool {
        self.volatility >= VolatilityLevel::High
    }
}

/// Raw inputs for one classification tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeInputs {
    pub vol_short: f64,
    pub vol_long: f64,
    /// Signed price change over the trend window
    pub momentum: f64,
    /// Momentum of the previous window, when known
    #[serde(default)]
    pub prev_momentum: Option<f64>,
}

/// Stateful classifier; requires consecutive confirmations before transitioning
pub struct RegimeClassifier {
    config: RegimeConfig,
    current_regime: MarketRegime,
    candidate_regime: MarketRegime,
    candidate_count: u32,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self {
            config,
            current_regime: MarketRegime::Ranging,
            candidate_regime: MarketRegime::Ranging,
            candidate_count: 0,
        }
    }

    /// Current confirmed regime
    pub fn current(&self) -> MarketRegime {
        self.current_regime
    }

    /// Feed one reading. Returns (snapshot, changed).
    pub fn observe(&mut self, inputs: RegimeInputs) -> (RegimeSnapshot, bool) {
        let raw = classify(&self.config, inputs);

        let changed = if raw.regime == self.candidate_regime {
            self.candidate_count += 1;
            if self.candidate_count >= self.config.confirmation_count
                && self.candidate_regime != self.current_regime
            {
                let old = self.current_regime;
                self.current_regime = self.candidate_regime;
                debug!(
                    old = %old,
                    new = %self.current_regime,
                    confidence = raw.confidence,
                    "regime transition confirmed"
                );
                true
            } else {
                false
            }
        } else {
            self.candidate_regime = raw.regime;
            self.candidate_count = 1;
            false
        };

        let snapshot = RegimeSnapshot {
            regime: self.current_regime,
            ..raw
        };
        (snapshot, changed)
    }
}

/// Unconfirmed classification of a single reading.
///
/// Priority: HighVol > Trending > LowVol > Ranging.
pub fn classify(config: &RegimeConfig, inputs: RegimeInputs) -> RegimeSnapshot {
    let vol_ratio = if inputs.vol_long > 0.0 {
        Some(inputs.vol_short / inputs.vol_long)
    } else {
        None
    };

    // absolute momentum normalized by short-term volatility
    let trend_score = if inputs.vol_short > 0.0 {
        (inputs.momentum.abs() / inputs.vol_short).min(1.0)
    } else {
        0.0
    };

    let (regime, confidence) = match vol_ratio {
        Some(ratio) if ratio > config.high_vol_ratio => (
            MarketRegime::HighVol,
            ((ratio - config.high_vol_ratio) / config.high_vol_ratio).clamp(0.5, 1.0),
        ),
        Some(_) if trend_score > config.trend_threshold => (
            MarketRegime::Trending,
            ((trend_score - config.trend_threshold) / (1.0 - config.trend_threshold))
                .clamp(0.5, 1.0),
        ),
        Some(ratio) if ratio < config.low_vol_ratio => (
            MarketRegime::LowVol,
            ((config.low_vol_ratio - ratio) / config.low_vol_ratio).clamp(0.5, 1.0),
        ),
        _ => (MarketRegime::Ranging, 0.5),
    };

    let volatility = match vol_ratio {
        Some(r) if r >= config.extreme_vol_ratio => VolatilityLevel::Extreme,
        Some(r) if r > config.high_vol_ratio => VolatilityLevel::High,
        Some(r) if r < config.low_vol_ratio => VolatilityLevel::Low,
        _ => VolatilityLevel::Normal,
    };

    let trend_strength = if trend_score > config.trend_threshold {
        TrendStrength::Strong
    } else if trend_score > config.trend_threshold / 2.0 {
        TrendStrength::Moderate
    } else {
        TrendStrength::Weak
    };

    let trend_direction = if trend_strength == TrendStrength::Weak {
        TrendDirection::Sideways
    } else if inputs.momentum > 0.0 {
        TrendDirection::Up
    } else {
        TrendDirection::Down
    };

    let momentum = match inputs.prev_momentum {
        Some(prev) if inputs.momentum.abs() > prev.abs() * 1.1 => MomentumState::Accelerating,
        Some(prev) if inputs.momentum.abs() < prev.abs() * 0.9 => MomentumState::Decelerating,
        _ => MomentumState::Steady,
    };

    // distance of the vol ratio from 1.0 (balanced) maps to instability
    let stability = vol_ratio
        .map(|r| (1.0 - (r - 1.0).abs()).clamp(0.0, 1.0))
        .unwrap_or(0.5);

    RegimeSnapshot {
        regime,
        trend_direction,
        trend_strength,
        momentum,
        stability,
        volatility,
        confidence,
        computed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(vol_short: f64, vol_long: f64, momentum: f64) -> RegimeInputs {
        RegimeInputs {
            vol_short,
            vol_long,
            momentum,
            prev_momentum: None,
        }
    }

    #[test]
    fn regime_display() {
        assert_eq!(MarketRegime::HighVol.to_string(), "HighVol");
        assert_eq!(MarketRegime::Trending.to_string(), "Trending");
    }

    #[test]
    fn classify_priorities() {
        let cfg = RegimeConfig::default();

        let spike = classify(&cfg, inputs(3.0, 1.0, 0.1));
        assert_eq!(spike.regime, MarketRegime::HighVol);
        assert_eq!(spike.volatility, VolatilityLevel::Extreme);

        let trend = classify(&cfg, inputs(1.0, 1.0, -0.9));
        assert_eq!(trend.regime, MarketRegime::Trending);
        assert_eq!(trend.trend_direction, TrendDirection::Down);
        assert_eq!(trend.trend_strength, TrendStrength::Strong);

        let quiet = classify(&cfg, inputs(0.5, 1.0, 0.0));
        assert_eq!(quiet.regime, MarketRegime::LowVol);
        assert_eq!(quiet.volatility, VolatilityLevel::Low);

        let flat = classify(&cfg, inputs(1.0, 1.0, 0.0));
        assert_eq!(flat.regime, MarketRegime::Ranging);
        assert!((flat.stability - 1.0).abs() < 1e-12);
    }

    #[test]
    fn missing_long_vol_defaults_to_ranging() {
        let snap = classify(&RegimeConfig::default(), inputs(1.0, 0.0, 0.0));
        assert_eq!(snap.regime, MarketRegime::Ranging);
        assert_eq!(snap.volatility, VolatilityLevel::Normal);
    }

    #[test]
    fn transition_requires_confirmation() {
        let mut classifier = RegimeClassifier::new(RegimeConfig::default());

        let (snap, changed) = classifier.observe(inputs(3.0, 1.0, 0.0));
        assert!(!changed);
        assert_eq!(snap.regime, MarketRegime::Ranging);

        let (snap, changed) = classifier.observe(inputs(3.0, 1.0, 0.0));
        assert!(changed);
        assert_eq!(snap.regime, MarketRegime::HighVol);
        assert_eq!(classifier.current(), MarketRegime::HighVol);
    }

    #[test]
    fn momentum_state_from_previous_window() {
        let cfg = RegimeConfig::default();
        let snap = classify(
            &cfg,
            RegimeInputs {
                vol_short: 1.0,
                vol_long: 1.0,
                momentum: 0.5,
                prev_momentum: Some(0.2),
            },
        );
        assert_eq!(snap.momentum, MomentumState::Accelerating);
    }
}
