use rand::RngCore;

use crate::domain::{FeatureVector, PolicyKind, PolicyOutput, ACTION_COUNT};
use crate::error::{Result, TradegateError};

/// A learned policy mapping a feature vector to an action distribution.
///
/// Inference is synchronous and CPU-bound; callers run it on the blocking pool.
pub trait Policy: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> PolicyKind;

    fn input_dim(&self) -> usize;

    /// Deterministic action distribution ([HOLD, BUY, SELL])
    fn action_probabilities(&self, features: &FeatureVector) -> Result<Vec<f64>>;

    /// Action distribution with inference dropout, driven by `rng`
    fn stochastic_action_probabilities(
        &self,
        features: &FeatureVector,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>>;

    fn state_value(&self, features: &FeatureVector) -> Result<f64>;

    /// Constraint-cost capability, present only on constrained policies
    fn constraint_checker(&self) -> Option<&dyn ConstraintCheck> {
        None
    }

    fn get_action(&self, features: &FeatureVector) -> Result<PolicyOutput> {
        if features.len() != self.input_dim() {
            return Err(TradegateError::Model(format!(
                "{}: feature length {} != input_dim {}",
                self.id(),
                features.len(),
                self.input_dim()
            )));
        }

        let probabilities = self.action_probabilities(features)?;
        check_distribution(self.id(), &probabilities)?;

        let (action_index, action_probability) = argmax(&probabilities);

        let state_value = self.state_value(features)?;
        if !state_value.is_finite() {
            return Err(TradegateError::Model(format!(
                "{}: state value is not finite",
                self.id()
            )));
        }

        let constraint_violation_probability = match self.constraint_checker() {
            Some(checker) => {
                let p = checker.constraint_violation_probability(features)?;
                if !(0.0..=1.0).contains(&p) {
                    return Err(TradegateError::Model(format!(
                        "{}: violation probability {p} outside [0, 1]",
                        self.id()
                    )));
                }
                Some(p)
            }
            None => None,
        };

        Ok(PolicyOutput {
            policy_id: self.id().to_string(),
            kind: self.kind(),
            action_index,
            action_probability,
            probabilities,
            state_value,
            constraint_violation_probability,
        })
    }
}

/// Constraint-cost head of a constrained policy
pub trait ConstraintCheck: Send + Sync {
    fn constraint_violation_probability(&self, features: &FeatureVector) -> Result<f64>;

    /// Probability above which a violation is reported
    fn threshold(&self) -> f64;
}

/// Index and value of the largest entry; the lowest index wins ties.
pub fn argmax(values: &[f64]) -> (usize, f64) {
    values
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
}

pub(crate) fn check_distribution(policy_id: &str, probs: &[f64]) -> Result<()> {
    if probs.len() != ACTION_COUNT {
        return Err(TradegateError::Model(format!(
            "{policy_id}: expected {ACTION_COUNT} action probabilities, got {}",
            probs.len()
        )));
    }
    if probs.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(TradegateError::Model(format!(
            "{policy_id}: action probabilities must be finite and non-negative"
        )));
    }
    let sum: f64 = probs.iter().sum();
    if (sum - 1.0).abs() > 1e-6 {
        return Err(TradegateError::Model(format!(
            "{policy_id}: action probabilities sum to {sum}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_prefers_lowest_index_on_tie() {
        assert_eq!(argmax(&[0.4, 0.4, 0.2]), (0, 0.4));
        assert_eq!(argmax(&[0.1, 0.2, 0.7]), (2, 0.7));
    }

    #[test]
    fn distribution_checks() {
        assert!(check_distribution("p", &[0.3, 0.7, 0.0]).is_ok());
        assert!(check_distribution("p", &[0.5, 0.5]).is_err());
        assert!(check_distribution("p", &[0.5, 0.6, 0.0]).is_err());
        assert!(check_distribution("p", &[f64::NAN, 0.5, 0.5]).is_err());
    }
}
