//! Ensemble trading decision and execution core.
//!
//! Policy models vote on each market tick, an agent selector picks the
//! policy suited to the current regime, and approved commands are routed to
//! remote execution agents over HTTP or WebSocket with correlated callbacks.

pub mod callback;
pub mod cli;
pub mod config;
pub mod connection;
pub mod coordination;
pub mod dispatch;
pub mod domain;
pub mod ensemble;
pub mod error;
pub mod ml;
pub mod pipeline;
pub mod policy;
pub mod risk;
pub mod runtime;
pub mod selector;
pub mod services;
pub mod transport;

pub use config::AppConfig;
pub use coordination::{GracefulShutdown, ShutdownPhase};
pub use dispatch::{CommandHandle, Dispatcher};
pub use domain::{CommandResult, Direction, TradeCommand, TradingAction};
pub use error::{Result, TradegateError};
pub use pipeline::{DecisionPipeline, DecisionTick, TickOutcome};
pub use runtime::TradeGate;
