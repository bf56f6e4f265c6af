//! Regime-based agent selection
//!
//! Scores market conditions from the regime snapshot, blends them with each
//! policy's historical performance, and names the policy that should be
//! authoritative for this tick. Hard overrides take precedence over scores.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::SelectorConfig;
use super::performance::{AgentPerformanceMetrics, PerformanceBook, TradeOutcome};
use super::regime::{
    MarketRegime, MomentumState, RegimeSnapshot, TrendStrength, VolatilityLevel,
};
use crate::domain::PolicyKind;

/// Market-condition scores, each clamped to [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketConditionScores {
    pub risk_level: f64,
    pub trend_strength: f64,
    pub volatility_level: f64,
    pub market_stability: f64,
    pub profit_potential: f64,
    pub risk_reward_ratio: f64,
}

impl MarketConditionScores {
    pub fn from_regime(regime: &RegimeSnapshot) -> Self {
        let volatility_level: f64 = match regime.volatility {
            VolatilityLevel::Low => 0.2,
            VolatilityLevel::Normal => 0.4,
            VolatilityLevel::High => 0.7,
            VolatilityLevel::Extreme => 1.0,
        };

        let trend_strength: f64 = match regime.trend_strength {
            TrendStrength::Weak => 0.2,
            TrendStrength::Moderate => 0.5,
            TrendStrength::Strong => 0.8,
        } + match regime.momentum {
            MomentumState::Accelerating => 0.1,
            MomentumState::Steady => 0.0,
            MomentumState::Decelerating => -0.1,
        };

        let risk_level: f64 = match regime.regime {
            MarketRegime::HighVol => 0.6,
            MarketRegime::Trending => 0.4,
            MarketRegime::Ranging => 0.3,
            MarketRegime::LowVol => 0.2,
        } + match regime.volatility {
            VolatilityLevel::Extreme => 0.3,
            VolatilityLevel::High => 0.1,
            _ => 0.0,
        };

        let profit_potential: f64 = match regime.regime {
            MarketRegime::Trending => 0.5,
            MarketRegime::HighVol => 0.4,
            MarketRegime::Ranging => 0.3,
            MarketRegime::LowVol => 0.2,
        } + if regime.trend_strength == TrendStrength::Strong {
            0.2
        } else {
            0.0
        };

        let risk_level = risk_level.clamp(0.0, 1.0);
        let profit_potential = profit_potential.clamp(0.0, 1.0);
        let risk_reward_ratio = if risk_level + profit_potential > 0.0 {
            profit_potential / (risk_level + profit_potential)
        } else {
            0.5
        };

        Self {
            risk_level,
            trend_strength: trend_strength.clamp(0.0, 1.0),
            volatility_level,
            market_stability: regime.stability.clamp(0.0, 1.0),
            profit_potential,
            risk_reward_ratio: risk_reward_ratio.clamp(0.0, 1.0),
        }
    }
}

/// Selector verdict for one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDecision {
    pub agent: PolicyKind,
    pub confidence: f64,
    pub reasoning: String,
    pub risk_assessment: String,
    pub expected_return: f64,
    pub expected_risk: f64,
    pub scores: MarketConditionScores,
    pub baseline_score: f64,
    pub constrained_score: f64,
    /// Set when a hard override decided the selection
    pub override_rule: Option<String>,
}

#[derive(Debug, Default)]
struct SelectionHistory {
    selections: VecDeque<PolicyKind>,
    confidences: VecDeque<f64>,
}

pub struct AgentSelector {
    config: SelectorConfig,
    book: Arc<PerformanceBook>,
    history: Mutex<SelectionHistory>,
}

impl AgentSelector {
    pub fn new(config: SelectorConfig, book: Arc<PerformanceBook>) -> Self {
        Self {
            config,
            book,
            history: Mutex::new(SelectionHistory::default()),
        }
    }

    pub fn performance_book(&self) -> &Arc<PerformanceBook> {
        &self.book
    }

    /// Selection using the metrics currently held in the performance book.
    pub fn select(&self, regime: &RegimeSnapshot, constraint_need: f64) -> AgentDecision {
        let baseline = self.book.metrics(PolicyKind::Baseline);
        let constrained = self.book.metrics(PolicyKind::Constrained);
        self.select_agent(regime, &baseline, &constrained, constraint_need)
    }

    pub fn select_agent(
        &self,
        regime: &RegimeSnapshot,
        perf_baseline: &AgentPerformanceMetrics,
        perf_constrained: &AgentPerformanceMetrics,
        constraint_need: f64,
    ) -> AgentDecision {
        let cfg = &self.config;
        let scores = MarketConditionScores::from_regime(regime);
        let constraint_need = constraint_need.clamp(0.0, 1.0);

        let baseline_hist = historical_score(perf_baseline, regime.regime);
        let constrained_hist = historical_score(perf_constrained, MarketRegime::HighVol);

        // moderate volatility peaks at 0.5
        let moderate_vol = 1.0 - (scores.volatility_level - 0.5).abs() * 2.0;
        let baseline_score = (0.3 * scores.market_stability
            + 0.25 * scores.trend_strength
            + 0.15 * moderate_vol.max(0.0)
            + 0.3 * baseline_hist)
            .clamp(0.0, 1.0);
        let constrained_score = (0.3 * scores.risk_level
            + 0.2 * scores.volatility_level
            + 0.25 * constraint_need
            + 0.25 * constrained_hist)
            .clamp(0.0, 1.0);

        let override_rule = if scores.risk_level > cfg.override_risk
            && constraint_need > cfg.override_constraint_need
        {
            Some((PolicyKind::Constrained, "high risk with constraint need"))
        } else if scores.volatility_level > cfg.override_volatility {
            Some((PolicyKind::Constrained, "extreme volatility"))
        } else if scores.market_stability > cfg.override_stability
            && scores.trend_strength > cfg.override_trend
        {
            Some((PolicyKind::Baseline, "stable trending market"))
        } else {
            None
        };

        let (agent, confidence, reasoning) = match override_rule {
            Some((agent, rule)) => (
                agent,
                cfg.override_confidence,
                format!("override: {rule} in {} regime", regime.regime),
            ),
            None => {
                let agent = if constrained_score > baseline_score {
                    PolicyKind::Constrained
                } else {
                    PolicyKind::Baseline
                };
                let margin = (baseline_score - constrained_score).abs();
                (
                    agent,
                    (0.5 + margin).min(1.0),
                    format!(
                        "{agent} scored higher in {} regime (baseline {baseline_score:.2}, constrained {constrained_score:.2})",
                        regime.regime
                    ),
                )
            }
        };

        let chosen = match agent {
            PolicyKind::Baseline => perf_baseline,
            PolicyKind::Constrained => perf_constrained,
        };
        let chosen_regime = chosen.in_regime(regime.regime);
        let expected_return = chosen_regime
            .map(|r| r.average_return)
            .unwrap_or(chosen.average_return);
        let chosen_stability = chosen_regime
            .map(|r| r.stability_score)
            .unwrap_or(chosen.stability_score);
        let expected_risk = (scores.risk_level * (1.0 - 0.5 * chosen_stability)).clamp(0.0, 1.0);

        let risk_assessment = if scores.risk_level > 0.7 {
            "high"
        } else if scores.risk_level > 0.4 {
            "moderate"
        } else {
            "low"
        }
        .to_string();

        self.remember(agent, confidence);

        debug!(
            agent = %agent,
            confidence,
            baseline_score,
            constrained_score,
            regime = %regime.regime,
            "agent selected"
        );

        AgentDecision {
            agent,
            confidence,
            reasoning,
            risk_assessment,
            expected_return,
            expected_risk,
            scores,
            baseline_score,
            constrained_score,
            override_rule: override_rule.map(|(_, rule)| rule.to_string()),
        }
    }

    /// Feed a closed trade back into the performance book.
    pub fn record_outcome(&self, outcome: TradeOutcome) {
        debug!(
            policy = %outcome.policy,
            regime = %outcome.regime,
            return_value = outcome.return_value,
            "trade outcome recorded"
        );
        self.book.record(outcome);
    }

    /// Share of each policy among the last `selection_window` selections.
    pub fn agent_selection_frequency(&self) -> HashMap<PolicyKind, f64> {
        let history = self.lock_history();
        let total = history.selections.len();
        let mut freq = HashMap::new();
        if total == 0 {
            return freq;
        }
        for kind in &history.selections {
            *freq.entry(*kind).or_insert(0.0) += 1.0;
        }
        for v in freq.values_mut() {
            *v /= total as f64;
        }
        freq
    }

    /// Mean confidence over the last `confidence_window` selections.
    pub fn average_confidence(&self) -> f64 {
        let history = self.lock_history();
        if history.confidences.is_empty() {
            return 0.0;
        }
        history.confidences.iter().sum::<f64>() / history.confidences.len() as f64
    }

    fn remember(&self, agent: PolicyKind, confidence: f64) {
        let mut history = self.lock_history();
        history.selections.push_back(agent);
        while history.selections.len() > self.config.selection_window {
            history.selections.pop_front();
        }
        history.confidences.push_back(confidence);
        while history.confidences.len() > self.config.confidence_window {
            history.confidences.pop_front();
        }
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, SelectionHistory> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Sharpe (normalized -3..+3 → 0..1) and stability in `regime`, falling back to overall.
fn historical_score(perf: &AgentPerformanceMetrics, regime: MarketRegime) -> f64 {
    let (sharpe, stability) = perf
        .in_regime(regime)
        .map(|r| (r.sharpe_ratio, r.stability_score))
        .unwrap_or((perf.sharpe_ratio, perf.stability_score));
    let sharpe_norm = ((sharpe + 3.0) / 6.0).clamp(0.0, 1.0);
    0.5 * sharpe_norm + 0.5 * stability.clamp(0.0, 1.0)
}
