//! Per-account transport sessions: lifecycle, heartbeats, reconnects.

pub mod manager;
pub mod registry;
pub mod state;

pub use manager::ConnectionManager;
pub use registry::ConnectionRegistry;
pub use state::{Connection, ConnectionState, ReconnectPolicy};
