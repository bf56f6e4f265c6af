use rand::RngCore;

use super::model_file::{ActorCritic, PolicyModelFile};
use super::traits::Policy;
use crate::domain::{FeatureVector, PolicyKind};
use crate::error::Result;

/// Unconstrained actor-critic policy
#[derive(Debug, Clone)]
pub struct BaselinePolicy {
    id: String,
    net: ActorCritic,
}

impl BaselinePolicy {
    pub fn new(id: impl Into<String>, net: ActorCritic) -> Self {
        Self { id: id.into(), net }
    }

    /// Any cost head in the file is ignored.
    pub fn from_model(id: impl Into<String>, model: PolicyModelFile, dropout_rate: f64) -> Self {
        Self::new(id, ActorCritic::new(model.actor, model.critic, dropout_rate))
    }
}

impl Policy for BaselinePolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Baseline
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ACTION_BUY;
    use crate::policy::model_file::fixtures::*;

    #[test]
    fn baseline_has_no_constraint_head() {
        let policy = BaselinePolicy::new(
            "baseline-v1",
            ActorCritic::new(constant_actor(3, [0.0, 2.0, 0.0]), constant_scalar(3, 0.1), 0.1),
        );
        let x = FeatureVector::new(vec![0.1, 0.2, 0.3]).unwrap();
        let out = policy.get_action(&x).unwrap();

        assert_eq!(out.action_index, ACTION_BUY);
        assert!(out.constraint_violation_probability.is_none());
        assert!(policy.constraint_checker().is_none());
    }

    #[test]
    fn wrong_feature_length_is_a_model_error() {
        let policy = BaselinePolicy::new(
            "baseline-v1",
            ActorCritic::new(constant_actor(3, [0.0; 3]), constant_scalar(3, 0.0), 0.1),
        );
        let x = FeatureVector::new(vec![0.1]).unwrap();
        assert!(policy.get_action(&x).is_err());
    }
}
