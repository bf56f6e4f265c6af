//! Command dispatch: correlation, parking, transmission, deadlines.

pub mod dispatcher;
pub mod pending;
pub mod queue;

pub use dispatcher::{CommandHandle, Dispatcher};
pub use pending::{DecisionTag, PendingTable, ResolvedCommand};
pub use queue::{CommandQueue, QueueStats, QueuedCommand};
