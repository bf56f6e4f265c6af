//! Inbound result correlation and outcome feedback.

pub mod correlator;
pub mod handlers;

pub use correlator::{Attribution, CallbackCorrelator};
pub use handlers::{InboundHandler, LoggingHandler};
