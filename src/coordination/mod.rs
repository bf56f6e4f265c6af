//! Process coordination: phased shutdown and signal handling.

pub mod shutdown;

pub use shutdown::{
    install_signal_handlers, GracefulShutdown, ShutdownConfig, ShutdownPhase, ShutdownReport,
};
