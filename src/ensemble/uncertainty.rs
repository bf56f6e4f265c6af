//! Uncertainty decomposition from repeated stochastic passes.
//!
//! Deterministic for a given (features, policies, passes, seed).

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::domain::{FeatureVector, UncertaintyEstimate, ACTION_COUNT};
use crate::ml::entropy;
use crate::policy::Policy;

#[derive(Debug, Clone, Copy)]
pub struct UncertaintyParams {
    pub passes: usize,
    pub seed: u64,
    pub missing_member_penalty: f64,
}

/// Membership of the ensemble for this tick
#[derive(Debug, Clone, Copy)]
pub struct Membership {
    pub registered: usize,
    pub failed: usize,
}

/// Runs every surviving policy `passes` times with inference dropout.
///
/// `fallback` distributions (the deterministic outputs) are used when no
/// stochastic pass succeeds.
pub fn estimate_uncertainty(
    features: &FeatureVector,
    policies: &[Arc<dyn Policy>],
    fallback: &[Vec<f64>],
    params: UncertaintyParams,
    membership: Membership,
) -> UncertaintyEstimate {
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut samples: Vec<Vec<f64>> = Vec::with_capacity(policies.len() * params.passes);

    for policy in policies {
        for _ in 0..params.passes {
            match policy.stochastic_action_probabilities(features, &mut rng) {
                Ok(p) if p.len() == ACTION_COUNT && p.iter().all(|v| v.is_finite()) => {
                    samples.push(p)
                }
                Ok(_) => debug!(policy = policy.id(), "discarding malformed stochastic sample"),
                Err(e) => debug!(policy = policy.id(), error = %e, "stochastic pass failed"),
            }
        }
    }

    if samples.is_empty() {
        samples = fallback.to_vec();
    }

    let mut estimate = decompose(&samples);
    estimate.ensemble_size = policies.len();
    estimate.passes = params.passes;

    if membership.failed > 0 && membership.registered > 0 {
        let missing = membership.failed as f64 / membership.registered as f64;
        estimate.epistemic += params.missing_member_penalty * missing;
    }
    estimate.total = estimate.epistemic + estimate.aleatoric;
    estimate.confidence = (1.0 - estimate.epistemic).clamp(0.0, 1.0);
    estimate
}

/// Epistemic = mean per-action variance across samples;
/// aleatoric = entropy of the mean distribution normalized by ln(ACTION_COUNT).
pub fn decompose(samples: &[Vec<f64>]) -> UncertaintyEstimate {
    let n = samples.len();
    if n == 0 {
        let max_entropy = (ACTION_COUNT as f64).ln();
        return UncertaintyEstimate {
            epistemic: 1.0,
            aleatoric: 1.0,
            total: 2.0,
            confidence: 0.0,
            entropy: max_entropy,
            ensemble_size: 0,
            passes: 0,
        };
    }

    let mut mean = vec![0.0; ACTION_COUNT];
    for s in samples {
        for (m, v) in mean.iter_mut().zip(s) {
            *m += v / n as f64;
        }
    }

    let variance_sum: f64 = (0..ACTION_COUNT)
        .map(|a| samples.iter().map(|s| (s[a] - mean[a]).powi(2)).sum::<f64>() / n as f64)
        .sum();
    let epistemic = variance_sum / ACTION_COUNT as f64;

    let raw_entropy = entropy(&mean);
    let aleatoric = raw_entropy / (ACTION_COUNT as f64).ln();

    UncertaintyEstimate {
        epistemic,
        aleatoric,
        total: epistemic + aleatoric,
        confidence: (1.0 - epistemic).clamp(0.0, 1.0),
        entropy: raw_entropy,
        ensemble_size: 0,
        passes: 0,
    }
}
