//! Decision-side domain types: feature vectors, policy verdicts and the final
//! trading action handed to the risk gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TradegateError};

/// Number of discrete actions every policy scores.
pub const ACTION_COUNT: usize = 3;

/// Action index layout shared by every policy head: [HOLD, BUY, SELL]
pub const ACTION_HOLD: usize = 0;
pub const ACTION_BUY: usize = 1;
pub const ACTION_SELL: usize = 2;

/// One decision tick's market state as an ordered float array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(TradegateError::Validation(
                "feature vector must not be empty".to_string(),
            ));
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(TradegateError::Validation(format!(
                "feature[{idx}] is not finite"
            )));
        }
        Ok(Self { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

impl Direction {
    pub fn from_action_index(index: usize) -> Option<Self> {
        match index {
            ACTION_HOLD => Some(Direction::Hold),
            ACTION_BUY => Some(Direction::Buy),
            ACTION_SELL => Some(Direction::Sell),
            _ => None,
        }
    }

    pub fn action_index(&self) -> usize {
        match self {
            Direction::Hold => ACTION_HOLD,
            Direction::Buy => ACTION_BUY,
            Direction::Sell => ACTION_SELL,
        }
    }

    /// +1 for long, -1 for short, 0 for flat
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
            Direction::Hold => 0.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
            Direction::Hold => write!(f, "HOLD"),
        }
    }
}

/// Which policy family produced an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Unconstrained actor-critic policy
    Baseline,
    /// Actor-critic policy with a constraint-cost head
    Constrained,
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyKind::Baseline => write!(f, "baseline"),
            PolicyKind::Constrained => write!(f, "constrained"),
        }
    }
}

/// One policy's raw verdict for a tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyOutput {
    pub policy_id: String,
    pub kind: PolicyKind,
    pub action_index: usize,
    /// Probability of `action_index` under the policy
    pub action_probability: f64,
    /// Full action distribution ([HOLD, BUY, SELL])
    pub probabilities: Vec<f64>,
    pub state_value: f64,
    /// Only present for constrained policies
    pub constraint_violation_probability: Option<f64>,
}

/// Uncertainty decomposition from repeated stochastic passes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyEstimate {
    pub epistemic: f64,
    pub aleatoric: f64,
    pub total: f64,
    pub confidence: f64,
    /// Raw (natural-log) entropy of the averaged distribution
    pub entropy: f64,
    /// Policies that contributed samples
    pub ensemble_size: usize,
    /// Stochastic passes per policy
    pub passes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    RiskLimit,
    PositionLimit,
    DrawdownLimit,
    VolatilityLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A safety-limit breach attached to an action for one decision cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    #[serde(rename = "type")]
    pub constraint_type: ConstraintType,
    pub severity: Severity,
    pub message: String,
    pub value: f64,
    pub limit: f64,
    pub recommended_action: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Extreme,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Extreme => write!(f, "extreme"),
        }
    }
}

/// Final decision for one tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingAction {
    pub symbol: String,
    pub direction: Direction,
    /// Position intensity in [0, 1]; zero for HOLD
    pub intensity: f64,
    pub confidence: f64,
    pub entry_price: f64,
    /// Absolute stop-loss price (None for HOLD)
    pub stop_loss: Option<f64>,
    /// Absolute take-profit price (None for HOLD)
    pub take_profit: Option<f64>,
    /// Expected reward in R multiples (reward per unit of risk)
    pub expected_reward: f64,
    pub risk_level: RiskLevel,
    pub value_estimate: f64,
    pub reasoning: String,
    pub uncertainty: UncertaintyEstimate,
    pub constraints: Vec<ConstraintViolation>,
    /// Policy whose output was authoritative; None when the blended vote stands
    pub authoritative_policy: Option<PolicyKind>,
    pub timestamp: DateTime<Utc>,
}

impl TradingAction {
    pub fn is_actionable(&self) -> bool {
        self.direction != Direction::Hold
    }

    /// Highest severity among attached constraints
    pub fn max_constraint_severity(&self) -> Option<Severity> {
        self.constraints.iter().map(|c| c.severity).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_vector_rejects_non_finite() {
        assert!(FeatureVector::new(vec![1.0, f64::NAN]).is_err());
        assert!(FeatureVector::new(vec![]).is_err());
        assert_eq!(FeatureVector::new(vec![0.5, 1.5]).unwrap().len(), 2);
    }

    #[test]
    fn direction_index_mapping() {
        assert_eq!(Direction::from_action_index(ACTION_BUY), Some(Direction::Buy));
        assert_eq!(Direction::from_action_index(ACTION_SELL), Some(Direction::Sell));
        assert_eq!(Direction::from_action_index(ACTION_HOLD), Some(Direction::Hold));
        assert_eq!(Direction::from_action_index(7), None);
        assert_eq!(Direction::Sell.action_index(), ACTION_SELL);
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Critical > Severity::High);
    }

    #[test]
    fn direction_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Direction::Buy).unwrap(), "\"BUY\"");
    }
}
