//! Regime-based selection of the authoritative policy

pub mod agent;
pub mod config;
pub mod performance;
pub mod regime;

pub use agent::{AgentDecision, AgentSelector, MarketConditionScores};
pub use config::{RegimeConfig, SelectorConfig};
pub use performance::{AgentPerformanceMetrics, PerformanceBook, RegimePerformance, TradeOutcome};
pub use regime::{
    classify, MarketRegime, MomentumState, RegimeClassifier, RegimeInputs, RegimeSnapshot,
    TrendDirection, TrendStrength, VolatilityLevel,
};
