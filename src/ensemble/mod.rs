//! Ensemble inference engine

pub mod action_builder;
pub mod config;
pub mod engine;
pub mod uncertainty;

pub use action_builder::{build_action, protective_levels, Verdict};
pub use config::{EnsembleConfig, ModelsConfig};
pub use engine::{constraint_violation, weighted_vote, EnsembleEngine, EnsemblePrediction};
pub use uncertainty::{decompose, estimate_uncertainty, Membership, UncertaintyParams};
