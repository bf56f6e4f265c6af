use rand::RngCore;

use super::model_file::{violation_probability, ActorCritic, PolicyModelFile};
use super::traits::{ConstraintCheck, Policy};
use crate::domain::{FeatureVector, PolicyKind};
use crate::error::{Result, TradegateError};
use crate::ml::DenseNetwork;

pub const DEFAULT_CONSTRAINT_THRESHOLD: f64 = 0.5;

/// Actor-critic policy with a constraint-cost head
#[derive(Debug, Clone)]
pub struct ConstrainedPolicy {
    id: String,
    net: ActorCritic,
    cost: DenseNetwork,
    threshold: f64,
}

impl ConstrainedPolicy {
    pub fn new(
        id: impl Into<String>,
        net: ActorCritic,
        cost: DenseNetwork,
        threshold: f64,
    ) -> Result<Self> {
        let id = id.into();
        if cost.input_dim != net.input_dim() || cost.output_dim() != 1 {
            return Err(TradegateError::Model(format!(
                "{id}: cost head shape does not match actor"
            )));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(TradegateError::Model(format!(
                "{id}: threshold {threshold} outside [0, 1]"
            )));
        }
        Ok(Self {
            id,
            net,
            cost,
            threshold,
        })
    }

    /// `threshold` overrides the file's `constraint_threshold` when given.
    pub fn from_model(
        id: impl Into<String>,
        model: PolicyModelFile,
        dropout_rate: f64,
        threshold: Option<f64>,
    ) -> Result<Self> {
        let id = id.into();
        let cost = model
            .cost
            .ok_or_else(|| TradegateError::Model(format!("{id}: model file has no cost head")))?;
        let threshold = threshold
            .or(model.constraint_threshold)
            .unwrap_or(DEFAULT_CONSTRAINT_THRESHOLD);
        Self::new(
            id,
            ActorCritic::new(model.actor, model.critic, dropout_rate),
            cost,
            threshold,
        )
    }
}

impl Policy for ConstrainedPolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Constrained
    }

    fn input_dim(&self) -> usize {
        self.net.input_dim()
    }

    fn action_probabilities(&self, features: &FeatureVector) -> Result<Vec<f64>> {
        self.net.probabilities(features)
    }

    fn stochastic_action_probabilities(
        &self,
        features: &FeatureVector,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>> {
        self.net.stochastic_probabilities(features, rng)
    }

    fn state_value(&self, features: &FeatureVector) -> Result<f64> {
        self.net.value(features)
    }

    fn constraint_checker(&self) -> Option<&dyn ConstraintCheck> {
        Some(self)
    }
}

impl ConstraintCheck for ConstrainedPolicy {
    fn constraint_violation_probability(&self, features: &FeatureVector) -> Result<f64> {
        violation_probability(&self.cost, features)
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::model_file::fixtures::*;

    fn policy(cost_logit: f64) -> ConstrainedPolicy {
        ConstrainedPolicy::new(
            "constrained-v1",
            ActorCritic::new(constant_actor(2, [1.0, 0.0, 0.0]), constant_scalar(2, -0.2), 0.1),
            constant_scalar(2, cost_logit),
            0.5,
        )
        .unwrap()
    }

    #[test]
    fn exposes_violation_probability() {
        let x = FeatureVector::new(vec![0.0, 0.0]).unwrap();
        let out = policy(0.0).get_action(&x).unwrap();
        assert_eq!(out.kind, PolicyKind::Constrained);
        assert!((out.constraint_violation_probability.unwrap() - 0.5).abs() < 1e-12);

        let checker = policy(3.0);
        let checker = checker.constraint_checker().unwrap();
        assert!(checker.constraint_violation_probability(&x).unwrap() > checker.threshold());
    }

    #[test]
    fn model_without_cost_head_is_rejected() {
        let model = PolicyModelFile {
            actor: constant_actor(2, [0.0; 3]),
            critic: constant_scalar(2, 0.0),
            cost: None,
            constraint_threshold: None,
            metadata: serde_json::Value::Null,
        };
        assert!(ConstrainedPolicy::from_model("c", model, 0.1, None).is_err());
    }

    #[test]
    fn threshold_override_wins_over_file() {
        let model = PolicyModelFile {
            actor: constant_actor(2, [0.0; 3]),
            critic: constant_scalar(2, 0.0),
            cost: Some(constant_scalar(2, 0.0)),
            constraint_threshold: Some(0.3),
            metadata: serde_json::Value::Null,
        };
        let p = ConstrainedPolicy::from_model("c", model.clone(), 0.1, Some(0.7)).unwrap();
        assert_eq!(p.threshold(), 0.7);
        let p = ConstrainedPolicy::from_model("c", model, 0.1, None).unwrap();
        assert_eq!(p.threshold(), 0.3);
    }
}
