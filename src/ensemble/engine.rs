//! Ensemble inference: vote, uncertainty, constraint surfacing, finalize.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::action_builder::{build_action, Verdict};
use super::config::{EnsembleConfig, ModelsConfig};
use super::uncertainty::{estimate_uncertainty, Membership, UncertaintyParams};
use crate::domain::{
    ConstraintType, ConstraintViolation, Direction, FeatureVector, MarketContext, PolicyKind,
    PolicyOutput, Severity, TradingAction, UncertaintyEstimate, ACTION_COUNT,
};
use crate::error::{Result, TradegateError};
use crate::policy::{BaselinePolicy, ConstrainedPolicy, Policy, PolicyModelFile};
use crate::selector::AgentDecision;

/// Violation probability above which a constraint is reported as high severity
const HIGH_SEVERITY_PROBABILITY: f64 = 0.8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsemblePrediction {
    pub action: TradingAction,
    pub uncertainty: UncertaintyEstimate,
    pub constraints: Vec<ConstraintViolation>,
    /// Outputs of the policies that succeeded, in registration order
    pub outputs: Vec<PolicyOutput>,
    /// Accumulated vote weight per action index
    pub votes: [f64; ACTION_COUNT],
    /// Ids of policies that failed this tick
    pub failed: Vec<String>,
}

impl EnsemblePrediction {
    pub fn output_of(&self, kind: PolicyKind) -> Option<&PolicyOutput> {
        self.outputs.iter().find(|o| o.kind == kind)
    }

    /// Highest violation probability reported by any constrained policy
    pub fn constraint_need(&self) -> f64 {
        self.outputs
            .iter()
            .filter_map(|o| o.constraint_violation_probability)
            .fold(0.0, f64::max)
    }
}

pub struct EnsembleEngine {
    policies: Vec<Arc<dyn Policy>>,
    config: EnsembleConfig,
}

impl EnsembleEngine {
    pub fn new(config: EnsembleConfig) -> Self {
        Self {
            policies: Vec::new(),
            config,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.register(policy);
        self
    }

    pub fn register(&mut self, policy: Arc<dyn Policy>) {
        info!(policy = policy.id(), kind = %policy.kind(), "policy registered");
        self.policies.push(policy);
    }

    /// Loads the configured model files. A file that fails to load is logged
    /// and skipped; at least one policy must remain.
    pub fn from_models(models: &ModelsConfig, config: EnsembleConfig) -> Result<Self> {
        let mut engine = Self::new(config);
        let dropout = engine.config.dropout_rate;

        if let Some(path) = &models.baseline_path {
            match PolicyModelFile::load(path) {
                Ok(model) => engine.register(Arc::new(BaselinePolicy::from_model(
                    "baseline", model, dropout,
                ))),
                Err(e) => warn!(path = %path.display(), error = %e, "baseline model not loaded"),
            }
        }

        if let Some(path) = &models.constrained_path {
            let loaded = PolicyModelFile::load(path).and_then(|model| {
                ConstrainedPolicy::from_model(
                    "constrained",
                    model,
                    dropout,
                    models.constraint_threshold,
                )
            });
            match loaded {
                Ok(policy) => engine.register(Arc::new(policy)),
                Err(e) => warn!(path = %path.display(), error = %e, "constrained model not loaded"),
            }
        }

        if engine.policies.is_empty() {
            return Err(TradegateError::Model("no policy model could be loaded".to_string()));
        }
        Ok(engine)
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    pub fn predict(&self, features: &FeatureVector, ctx: &MarketContext) -> Result<EnsemblePrediction> {
        let mut survivors: Vec<Arc<dyn Policy>> = Vec::with_capacity(self.policies.len());
        let mut outputs: Vec<PolicyOutput> = Vec::with_capacity(self.policies.len());
        let mut constraints = Vec::new();
        let mut failed = Vec::new();

        for policy in &self.policies {
            match policy.get_action(features) {
                Ok(output) => {
                    if let (Some(p), Some(checker)) = (
                        output.constraint_violation_probability,
                        policy.constraint_checker(),
                    ) {
                        if let Some(v) = constraint_violation(&output.policy_id, p, checker.threshold()) {
                            constraints.push(v);
                        }
                    }
                    survivors.push(Arc::clone(policy));
                    outputs.push(output);
                }
                Err(e) => {
                    warn!(policy = policy.id(), error = %e, "policy failed, excluded from vote");
                    failed.push(policy.id().to_string());
                }
            }
        }

        if outputs.is_empty() {
            return Err(TradegateError::NoPredictionAvailable(format!(
                "all {} policies failed for {}",
                self.policies.len(),
                ctx.symbol
            )));
        }

        let (winner, votes) = weighted_vote(&outputs, ctx);
        let voters: Vec<&PolicyOutput> = outputs.iter().filter(|o| o.action_index == winner).collect();
        let confidence =
            voters.iter().map(|o| o.action_probability).sum::<f64>() / voters.len() as f64;
        let value_estimate =
            outputs.iter().map(|o| o.state_value).sum::<f64>() / outputs.len() as f64;

        let fallback: Vec<Vec<f64>> = outputs.iter().map(|o| o.probabilities.clone()).collect();
        let uncertainty = estimate_uncertainty(
            features,
            &survivors,
            &fallback,
            UncertaintyParams {
                passes: self.config.uncertainty_passes,
                seed: self.config.seed,
                missing_member_penalty: self.config.missing_member_penalty,
            },
            Membership {
                registered: self.policies.len(),
                failed: failed.len(),
            },
        );

        let direction = Direction::from_action_index(winner).unwrap_or(Direction::Hold);
        let verdict = Verdict {
            direction,
            confidence,
            value_estimate,
            authoritative_policy: None,
        };
        let action = build_action(&verdict, uncertainty, constraints.clone(), ctx, &self.config);

        debug!(
            symbol = %ctx.symbol,
            direction = %direction,
            confidence,
            epistemic = uncertainty.epistemic,
            constraints = constraints.len(),
            failed = failed.len(),
            "ensemble prediction"
        );

        Ok(EnsemblePrediction {
            action,
            uncertainty,
            constraints,
            outputs,
            votes,
            failed,
        })
    }

    /// Applies the selector's verdict. The named policy becomes authoritative
    /// only when it produced an output and the selection is confident enough.
    pub fn finalize(
        &self,
        prediction: &EnsemblePrediction,
        decision: &AgentDecision,
        ctx: &MarketContext,
    ) -> TradingAction {
        let selected = prediction.output_of(decision.agent);

        match selected {
            Some(output) if decision.confidence >= self.config.authority_threshold => {
                let verdict = Verdict {
                    direction: Direction::from_action_index(output.action_index)
                        .unwrap_or(Direction::Hold),
                    confidence: output.action_probability,
                    value_estimate: output.state_value,
                    authoritative_policy: Some(output.kind),
                };
                build_action(
                    &verdict,
                    prediction.uncertainty,
                    prediction.constraints.clone(),
                    ctx,
                    &self.config,
                )
            }
            _ => {
                debug!(
                    agent = %decision.agent,
                    confidence = decision.confidence,
                    "blended vote stands"
                );
                prediction.action.clone()
            }
        }
    }
}

/// Each policy adds its winning probability to its action index. Ties go to
/// the index whose voters have the higher regime stability, then to the
/// lowest index.
pub fn weighted_vote(outputs: &[PolicyOutput], ctx: &MarketContext) -> (usize, [f64; ACTION_COUNT]) {
    let mut votes = [0.0; ACTION_COUNT];
    let mut stability = [f64::NEG_INFINITY; ACTION_COUNT];

    for o in outputs {
        if o.action_index < ACTION_COUNT {
            votes[o.action_index] += o.action_probability;
            stability[o.action_index] = stability[o.action_index].max(ctx.stability_of(o.kind));
        }
    }

    let best = votes.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let winner = (0..ACTION_COUNT)
        .filter(|&i| stability[i].is_finite() && (votes[i] - best).abs() < 1e-12)
        .fold(None, |acc: Option<usize>, i| match acc {
            Some(j) if stability[j] >= stability[i] => Some(j),
            _ => Some(i),
        })
        .unwrap_or(0);

    (winner, votes)
}

/// Violation report when `probability` exceeds `threshold`
pub fn constraint_violation(
    policy_id: &str,
    probability: f64,
    threshold: f64,
) -> Option<ConstraintViolation> {
    if probability <= threshold {
        return None;
    }
    let severity = if probability > HIGH_SEVERITY_PROBABILITY {
        Severity::High
    } else {
        Severity::Medium
    };
    Some(ConstraintViolation {
        constraint_type: ConstraintType::RiskLimit,
        severity,
        message: format!(
            "{policy_id} violation probability {probability:.2} exceeds {threshold:.2}"
        ),
        value: probability,
        limit: threshold,
        recommended_action: match severity {
            Severity::High | Severity::Critical => "hold or close exposure",
            _ => "reduce position size",
        }
        .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::RegimeSnapshot;
    use std::collections::HashMap;

    fn output(kind: PolicyKind, probs: [f64; 3]) -> PolicyOutput {
        let (action_index, action_probability) = crate::policy::argmax(&probs);
        PolicyOutput {
            policy_id: kind.to_string(),
            kind,
            action_index,
            action_probability,
            probabilities: probs.to_vec(),
            state_value: 0.0,
            constraint_violation_probability: None,
        }
    }

    fn ctx(stability: &[(PolicyKind, f64)]) -> MarketContext {
        MarketContext {
            symbol: "EUR_USD".into(),
            price: 1.1,
            atr: 0.001,
            regime: RegimeSnapshot::default(),
            sentiment: 0.0,
            stability_scores: stability.iter().cloned().collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn vote_accumulates_winning_probabilities() {
        let outputs = vec![
            output(PolicyKind::Baseline, [0.3, 0.7, 0.0]),
            output(PolicyKind::Constrained, [0.1, 0.0, 0.9]),
        ];
        let (winner, votes) = weighted_vote(&outputs, &ctx(&[]));
        assert_eq!(winner, 2);
        assert!((votes[1] - 0.7).abs() < 1e-12);
    }

    #[test]
    fn tie_goes_to_more_stable_voter() {
        let outputs = vec![
            output(PolicyKind::Baseline, [0.2, 0.6, 0.2]),
            output(PolicyKind::Constrained, [0.2, 0.2, 0.6]),
        ];
        let c = ctx(&[(PolicyKind::Baseline, 0.3), (PolicyKind::Constrained, 0.9)]);
        assert_eq!(weighted_vote(&outputs, &c).0, 2);

        let c = ctx(&[(PolicyKind::Baseline, 0.9), (PolicyKind::Constrained, 0.3)]);
        assert_eq!(weighted_vote(&outputs, &c).0, 1);
    }

    #[test]
    fn full_tie_prefers_lowest_index() {
        let outputs = vec![
            output(PolicyKind::Baseline, [0.2, 0.6, 0.2]),
            output(PolicyKind::Constrained, [0.2, 0.2, 0.6]),
        ];
        assert_eq!(weighted_vote(&outputs, &ctx(&[])).0, 1);
    }

    #[test]
    fn constraint_severity_bands() {
        assert!(constraint_violation("c", 0.5, 0.5).is_none());
        assert_eq!(constraint_violation("c", 0.6, 0.5).unwrap().severity, Severity::Medium);
        let v = constraint_violation("c", 0.9, 0.5).unwrap();
        assert_eq!(v.severity, Severity::High);
        assert_eq!(v.constraint_type, ConstraintType::RiskLimit);
    }
}
