//! Dense neural network inference (CPU-only).
//!
//! Small MLPs loaded from JSON serve as policy actors, critics and
//! constraint-cost heads. Two forward modes:
//! - deterministic (`forward`) for the voting pass
//! - inference dropout (`forward_with_dropout`) for uncertainty sampling
//!
//! Shapes are validated at load time so a malformed model fails fast and
//! the ensemble can carry on without it.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, TradegateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Tanh,
    Sigmoid,
}

impl Default for Activation {
    fn default() -> Self {
        Self::Linear
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    /// Weights shape: [out_dim][in_dim]
    pub weights: Vec<Vec<f64>>,
    /// Bias shape: [out_dim]
    pub bias: Vec<f64>,
    #[serde(default)]
    pub activation: Activation,
}

impl DenseLayer {
    fn out_dim(&self) -> usize {
        self.weights.len()
    }

    fn apply(&self, x: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| {
                let sum = row.iter().zip(x).fold(*b, |acc, (w, v)| acc + w * v);
                apply_activation(sum, self.activation)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseNetwork {
    /// Expected input dimension.
    pub input_dim: usize,

    /// Optional z-score normalization.
    #[serde(default)]
    pub input_mean: Option<Vec<f64>>,
    #[serde(default)]
    pub input_std: Option<Vec<f64>>,

    pub layers: Vec<DenseLayer>,

    /// Free-form metadata (version, training run, etc).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl DenseNetwork {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let model: Self = serde_json::from_str(&content)?;
        model.validate().map_err(TradegateError::Model)?;
        Ok(model)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.input_dim == 0 {
            return Err("input_dim must be > 0".to_string());
        }
        if self.layers.is_empty() {
            return Err("layers must not be empty".to_string());
        }

        match (&self.input_mean, &self.input_std) {
            (Some(mean), Some(std)) => {
                for (name, v) in [("input_mean", mean), ("input_std", std)] {
                    if v.len() != self.input_dim {
                        return Err(format!(
                            "{name} length {} != input_dim {}",
                            v.len(),
                            self.input_dim
                        ));
                    }
                }
                if std.iter().any(|v| !v.is_finite() || *v <= 0.0) {
                    return Err("input_std must be finite and > 0".to_string());
                }
            }
            (None, None) => {}
            _ => return Err("input_mean and input_std must be provided together".to_string()),
        }

        let mut expected_in = self.input_dim;
        for (idx, layer) in self.layers.iter().enumerate() {
            if layer.out_dim() == 0 {
                return Err(format!("layer[{idx}] has no outputs"));
            }
            if layer.bias.len() != layer.out_dim() {
                return Err(format!(
                    "layer[{idx}] bias len {} != out_dim {}",
                    layer.bias.len(),
                    layer.out_dim()
                ));
            }
            if let Some(r) = layer.weights.iter().position(|row| row.len() != expected_in) {
                return Err(format!(
                    "layer[{idx}] weights row {r} len {} != expected in_dim {expected_in}",
                    layer.weights[r].len()
                ));
            }
            let finite = layer
                .weights
                .iter()
                .flatten()
                .chain(layer.bias.iter())
                .all(|v| v.is_finite());
            if !finite {
                return Err(format!("layer[{idx}] contains non-finite parameters"));
            }
            expected_in = layer.out_dim();
        }
        Ok(())
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map(|l| l.out_dim()).unwrap_or(0)
    }

    /// Deterministic forward pass.
    pub fn forward(&self, input: &[f64]) -> Result<Vec<f64>> {
        let mut x = self.normalize(input)?;
        for layer in &self.layers {
            x = layer.apply(&x);
        }
        Ok(x)
    }

    /// Forward pass with inverted dropout on every hidden layer output.
    ///
    /// The output layer is never dropped. `rate` is clamped to [0, 0.95].
    pub fn forward_with_dropout(
        &self,
        input: &[f64],
        rate: f64,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>> {
        let rate = rate.clamp(0.0, 0.95);
        let keep = 1.0 - rate;
        let last = self.layers.len().saturating_sub(1);

        let mut x = self.normalize(input)?;
        for (idx, layer) in self.layers.iter().enumerate() {
            x = layer.apply(&x);
            if idx < last && rate > 0.0 {
                for v in x.iter_mut() {
                    *v = if rng.gen::<f64>() < rate { 0.0 } else { *v / keep };
                }
            }
        }
        Ok(x)
    }

    pub fn forward_scalar(&self, input: &[f64]) -> Result<f64> {
        let out = self.forward(input)?;
        match out.as_slice() {
            [v] => Ok(*v),
            _ => Err(TradegateError::Model(format!(
                "forward_scalar expects output_dim=1, got {}",
                out.len()
            ))),
        }
    }

    fn normalize(&self, input: &[f64]) -> Result<Vec<f64>> {
        if input.len() != self.input_dim {
            return Err(TradegateError::Model(format!(
                "input dim mismatch: got {}, expected {}",
                input.len(),
                self.input_dim
            )));
        }

        let mut x = input.to_vec();
        if let (Some(mean), Some(std)) = (&self.input_mean, &self.input_std) {
            for ((v, m), s) in x.iter_mut().zip(mean).zip(std) {
                *v = (*v - m) / s.max(1e-12);
            }
        }
        Ok(x)
    }
}

fn apply_activation(x: f64, act: Activation) -> f64 {
    match act {
        Activation::Linear => x,
        Activation::Relu => x.max(0.0),
        Activation::Tanh => x.tanh(),
        Activation::Sigmoid => sigmoid(x),
    }
}

pub fn sigmoid(x: f64) -> f64 {
    // Numerically-stable sigmoid.
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

/// Max-shifted softmax. Returns a uniform distribution for degenerate input.
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if !sum.is_finite() || sum <= 0.0 {
        return vec![1.0 / logits.len() as f64; logits.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}

/// Shannon entropy in nats.
pub fn entropy(probs: &[f64]) -> f64 {
    probs
        .iter()
        .filter(|p| **p > 0.0)
        .map(|p| -p * p.ln())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn two_layer() -> DenseNetwork {
        DenseNetwork {
            input_dim: 2,
            input_mean: None,
            input_std: None,
            layers: vec![
                DenseLayer {
                    weights: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
                    bias: vec![0.0, 0.0, 0.0],
                    activation: Activation::Relu,
                },
                DenseLayer {
                    weights: vec![vec![1.0, 1.0, 1.0]],
                    bias: vec![0.0],
                    activation: Activation::Linear,
                },
            ],
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn forward_scalar_sigmoid() {
        let net = DenseNetwork {
            input_dim: 2,
            input_mean: None,
            input_std: None,
            layers: vec![DenseLayer {
                weights: vec![vec![1.0, 2.0]],
                bias: vec![0.0],
                activation: Activation::Sigmoid,
            }],
            metadata: serde_json::json!({}),
        };
        net.validate().unwrap();

        let p0 = net.forward_scalar(&[0.0, 0.0]).unwrap();
        assert!((p0 - 0.5).abs() < 1e-12);

        let p1 = net.forward_scalar(&[1.0, 0.0]).unwrap();
        assert!(p1 > 0.5);
    }

    #[test]
    fn validates_shapes() {
        let mut bad = two_layer();
        bad.input_dim = 3;
        assert!(bad.validate().is_err());

        let mut bad_norm = two_layer();
        bad_norm.input_mean = Some(vec![0.0, 0.0]);
        assert!(bad_norm.validate().is_err());
    }

    #[test]
    fn zero_dropout_matches_deterministic_pass() {
        let net = two_layer();
        let mut rng = StdRng::seed_from_u64(7);
        let a = net.forward(&[1.0, 2.0]).unwrap();
        let b = net.forward_with_dropout(&[1.0, 2.0], 0.0, &mut rng).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn dropout_perturbs_hidden_activations() {
        let net = two_layer();
        let mut rng = StdRng::seed_from_u64(11);
        let outputs: Vec<f64> = (0..32)
            .map(|_| net.forward_with_dropout(&[1.0, 2.0], 0.5, &mut rng).unwrap()[0])
            .collect();
        let first = outputs[0];
        assert!(outputs.iter().any(|o| (o - first).abs() > 1e-9));
    }

    #[test]
    fn rejects_wrong_input_len() {
        assert!(two_layer().forward(&[1.0]).is_err());
    }

    #[test]
    fn softmax_and_entropy() {
        let p = softmax(&[0.0, 0.0, 0.0]);
        assert!(p.iter().all(|v| (v - 1.0 / 3.0).abs() < 1e-12));
        assert!((entropy(&p) - 3f64.ln()).abs() < 1e-12);

        let peaked = softmax(&[10.0, 0.0, 0.0]);
        assert!(peaked[0] > 0.99);
        assert!(entropy(&peaked) < 0.01);
    }
}
