//! Risk gate
//!
//! Synchronous, read-only validation of a trade command against account
//! limits. Every violated rule yields one warning; any violation blocks.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::account::{AccountBook, AccountState};
use crate::domain::{CommandAction, ConstraintViolation, Severity, TradeCommand};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Largest single order (lots)
    #[serde(default = "default_max_lot_size")]
    pub max_lot_size: Decimal,

    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: u32,

    /// Lots that may be opened per day
    #[serde(default = "default_max_daily_risk")]
    pub max_daily_risk: Decimal,

    /// Realized daily loss (account currency) at which new entries stop
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: Decimal,

    /// Constraints at or above this severity block the command
    #[serde(default = "default_hard_severity")]
    pub hard_severity: Severity,
}

fn default_max_lot_size() -> Decimal {
    Decimal::ONE
}
fn default_max_concurrent_positions() -> u32 {
    5
}
fn default_max_daily_risk() -> Decimal {
    Decimal::from(5)
}
fn default_daily_loss_limit() -> Decimal {
    Decimal::from(500)
}
fn default_hard_severity() -> Severity {
    Severity::High
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_lot_size: default_max_lot_size(),
            max_concurrent_positions: default_max_concurrent_positions(),
            max_daily_risk: default_max_daily_risk(),
            daily_loss_limit: default_daily_loss_limit(),
            hard_severity: default_hard_severity(),
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_lot_size <= Decimal::ZERO {
            errors.push("risk.max_lot_size must be positive".to_string());
        }
        if self.max_concurrent_positions == 0 {
            errors.push("risk.max_concurrent_positions must be positive".to_string());
        }
        if self.max_daily_risk <= Decimal::ZERO {
            errors.push("risk.max_daily_risk must be positive".to_string());
        }
        if self.daily_loss_limit <= Decimal::ZERO {
            errors.push("risk.daily_loss_limit must be positive".to_string());
        }
        errors
    }
}

/// A violated rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RiskViolation {
    ExceedsMaxLot { limit: Decimal, requested: Decimal },
    TooManyPositions { limit: u32, current: u32 },
    DailyRiskExceeded { limit: Decimal, used: Decimal, requested: Decimal },
    DailyLossExceeded { limit: Decimal, current: Decimal },
    BlockingConstraint { severity: Severity, message: String },
}

impl std::fmt::Display for RiskViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskViolation::ExceedsMaxLot { limit, requested } => {
                write!(f, "Lot size {} exceeds max {}", requested, limit)
            }
            RiskViolation::TooManyPositions { limit, current } => {
                write!(f, "Open positions {} at max {}", current, limit)
            }
            RiskViolation::DailyRiskExceeded {
                limit,
                used,
                requested,
            } => write!(
                f,
                "Daily risk {} + {} lots exceeds {}",
                used, requested, limit
            ),
            RiskViolation::DailyLossExceeded { limit, current } => {
                write!(f, "Daily loss {} reached limit {}", current, limit)
            }
            RiskViolation::BlockingConstraint { severity, message } => {
                write!(f, "Blocking {} constraint: {}", severity, message)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub should_execute: bool,
    pub warnings: Vec<String>,
    pub violations: Vec<RiskViolation>,
}

impl RiskAssessment {
    pub fn summary(&self) -> String {
        self.warnings.join("; ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct RiskGate {
    config: RiskConfig,
}

impl RiskGate {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Closing commands reduce exposure and skip the position/daily-risk rules.
    pub fn assess(
        &self,
        candidate: &TradeCommand,
        constraints: &[ConstraintViolation],
        account: &AccountState,
    ) -> RiskAssessment {
        let cfg = &self.config;
        let opening = candidate.action != CommandAction::Close;
        let mut violations = Vec::new();

        if candidate.lot_size > cfg.max_lot_size {
            violations.push(RiskViolation::ExceedsMaxLot {
                limit: cfg.max_lot_size,
                requested: candidate.lot_size,
            });
        }

        let positions = account.committed_positions();
        if opening && positions >= cfg.max_concurrent_positions {
            violations.push(RiskViolation::TooManyPositions {
                limit: cfg.max_concurrent_positions,
                current: positions,
            });
        }

        let used = account.committed_risk();
        if opening && used + candidate.lot_size > cfg.max_daily_risk {
            violations.push(RiskViolation::DailyRiskExceeded {
                limit: cfg.max_daily_risk,
                used,
                requested: candidate.lot_size,
            });
        }

        if opening && account.daily_loss() >= cfg.daily_loss_limit {
            violations.push(RiskViolation::DailyLossExceeded {
                limit: cfg.daily_loss_limit,
                current: account.daily_loss(),
            });
        }

        for c in constraints.iter().filter(|c| c.severity >= cfg.hard_severity) {
            violations.push(RiskViolation::BlockingConstraint {
                severity: c.severity,
                message: c.message.clone(),
            });
        }

        let warnings: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
        let should_execute = violations.is_empty();

        if should_execute {
            debug!(
                account = %candidate.account_id,
                symbol = %candidate.symbol,
                lot = %candidate.lot_size,
                "risk gate passed"
            );
        } else {
            warn!(
                account = %candidate.account_id,
                symbol = %candidate.symbol,
                lot = %candidate.lot_size,
                reasons = %warnings.join("; "),
                "risk gate blocked command"
            );
        }

        RiskAssessment {
            should_execute,
            warnings,
            violations,
        }
    }

    /// `assess` against the live book. An admitted opening command reserves
    /// its exposure under the same entry lock the check read from.
    pub fn admit(
        &self,
        candidate: &TradeCommand,
        constraints: &[ConstraintViolation],
        book: &AccountBook,
    ) -> RiskAssessment {
        book.reserve_with(&candidate.account_id, |state| {
            let assessment = self.assess(candidate, constraints, state);
            let hold = (assessment.should_execute && candidate.action != CommandAction::Close)
                .then_some(candidate.lot_size);
            (assessment, hold)
        })
    }
}
