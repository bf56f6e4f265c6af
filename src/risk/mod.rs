pub mod account;
pub mod gate;

pub use account::{AccountBook, AccountState};
pub use gate::{RiskAssessment, RiskConfig, RiskGate, RiskViolation};
