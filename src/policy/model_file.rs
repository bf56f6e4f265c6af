//! JSON policy model files
//!
//! ```json
//! {
//!   "actor":  { "input_dim": 16, "layers": [...] },   // 3 logits
//!   "critic": { "input_dim": 16, "layers": [...] },   // 1 value
//!   "cost":   { "input_dim": 16, "layers": [...] },   // optional, 1 logit
//!   "constraint_threshold": 0.5
//! }
//! ```

use std::path::Path;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::domain::{FeatureVector, ACTION_COUNT};
use crate::error::{Result, TradegateError};
use crate::ml::{sigmoid, softmax, DenseNetwork};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyModelFile {
    pub actor: DenseNetwork,
    pub critic: DenseNetwork,
    /// Constraint-cost head (logit); required for constrained policies
    #[serde(default)]
    pub cost: Option<DenseNetwork>,
    #[serde(default)]
    pub constraint_threshold: Option<f64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl PolicyModelFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let model: Self = serde_json::from_str(&content)?;
        model
            .validate()
            .map_err(|e| TradegateError::Model(format!("{}: {e}", path.display())))?;
        Ok(model)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        self.actor.validate().map_err(|e| format!("actor: {e}"))?;
        self.critic.validate().map_err(|e| format!("critic: {e}"))?;

        if self.actor.output_dim() != ACTION_COUNT {
            return Err(format!(
                "actor output_dim {} != {ACTION_COUNT}",
                self.actor.output_dim()
            ));
        }
        if self.critic.output_dim() != 1 {
            return Err(format!("critic output_dim {} != 1", self.critic.output_dim()));
        }
        if self.critic.input_dim != self.actor.input_dim {
            return Err(format!(
                "critic input_dim {} != actor input_dim {}",
                self.critic.input_dim, self.actor.input_dim
            ));
        }

        if let Some(cost) = &self.cost {
            cost.validate().map_err(|e| format!("cost: {e}"))?;
            if cost.output_dim() != 1 {
                return Err(format!("cost output_dim {} != 1", cost.output_dim()));
            }
            if cost.input_dim != self.actor.input_dim {
                return Err(format!(
                    "cost input_dim {} != actor input_dim {}",
                    cost.input_dim, self.actor.input_dim
                ));
            }
        }
        if let Some(t) = self.constraint_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(format!("constraint_threshold {t} outside [0, 1]"));
            }
        }
        Ok(())
    }
}

/// Actor (softmax over logits) plus critic (scalar value)
#[derive(Debug, Clone)]
pub struct ActorCritic {
    actor: DenseNetwork,
    critic: DenseNetwork,
    dropout_rate: f64,
}

impl ActorCritic {
    pub fn new(actor: DenseNetwork, critic: DenseNetwork, dropout_rate: f64) -> Self {
        Self {
            actor,
            critic,
            dropout_rate,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.actor.input_dim
    }

    pub fn probabilities(&self, features: &FeatureVector) -> Result<Vec<f64>> {
        Ok(softmax(&self.actor.forward(features.as_slice())?))
    }

    pub fn stochastic_probabilities(
        &self,
        features: &FeatureVector,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>> {
        let logits = self
            .actor
            .forward_with_dropout(features.as_slice(), self.dropout_rate, rng)?;
        Ok(softmax(&logits))
    }

    pub fn value(&self, features: &FeatureVector) -> Result<f64> {
        self.critic.forward_scalar(features.as_slice())
    }
}

/// Sigmoid over a cost-head logit
pub fn violation_probability(cost: &DenseNetwork, features: &FeatureVector) -> Result<f64> {
    Ok(sigmoid(cost.forward_scalar(features.as_slice())?))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::ml::{Activation, DenseLayer, DenseNetwork};

    /// Single linear layer: out[i] = sum(w[i] * x) + b[i]
    pub fn linear(input_dim: usize, weights: Vec<Vec<f64>>, bias: Vec<f64>) -> DenseNetwork {
        DenseNetwork {
            input_dim,
            input_mean: None,
            input_std: None,
            layers: vec![DenseLayer {
                weights,
                bias,
                activation: Activation::Linear,
            }],
            metadata: serde_json::json!({}),
        }
    }

    /// Actor whose logits are the bias; independent of features
    pub fn constant_actor(input_dim: usize, logits: [f64; 3]) -> DenseNetwork {
        linear(input_dim, vec![vec![0.0; input_dim]; 3], logits.to_vec())
    }

    pub fn constant_scalar(input_dim: usize, value: f64) -> DenseNetwork {
        linear(input_dim, vec![vec![0.0; input_dim]], vec![value])
    }
}
