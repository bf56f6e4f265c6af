use thiserror::Error;

/// Main error type for the decision and execution core
#[derive(Error, Debug)]
pub enum TradegateError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transport timeout: {0}")]
    TransportTimeout(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Inference errors
    #[error("Model error: {0}")]
    Model(String),

    #[error("No prediction available: {0}")]
    NoPredictionAvailable(String),

    // Command lifecycle errors
    #[error("Command timeout: {0}")]
    CommandTimeout(String),

    #[error("Risk rejection: {0}")]
    RiskRejection(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Callback mismatch: {0}")]
    CallbackMismatch(String),

    #[error("Queue full: {0}")]
    QueueFull(String),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl TradegateError {
    /// Whether a retry with backoff could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TradegateError::Connection(_)
            | TradegateError::TransportTimeout(_)
            | TradegateError::WebSocket(_) => true,
            TradegateError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().map_or(false, |s| s.is_server_error())
            }
            TradegateError::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Stable error code placed on failed command results.
    pub fn code(&self) -> &'static str {
        match self {
            TradegateError::Config(_) | TradegateError::InvalidConfig(_) => "ConfigError",
            TradegateError::Http(_)
            | TradegateError::HttpStatus { .. }
            | TradegateError::WebSocket(_)
            | TradegateError::Connection(_)
            | TradegateError::TransportTimeout(_) => "ConnectionError",
            TradegateError::Json(_) => "SerializationError",
            TradegateError::Model(_) => "ModelError",
            TradegateError::NoPredictionAvailable(_) => "NoPredictionAvailable",
            TradegateError::CommandTimeout(_) => "CommandTimeout",
            TradegateError::RiskRejection(_) => "RiskRejection",
            TradegateError::ConstraintViolation(_) => "ConstraintViolation",
            TradegateError::CallbackMismatch(_) => "CallbackMismatch",
            TradegateError::QueueFull(_) => "QueueFull",
            TradegateError::InvalidStateTransition { .. } => "InvalidState",
            TradegateError::Validation(_) => "ValidationError",
            TradegateError::Io(_) | TradegateError::Internal(_) => "InternalError",
            TradegateError::Cancelled => "Cancelled",
        }
    }
}

/// Result type alias for TradegateError
pub type Result<T> = std::result::Result<T, TradegateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(TradegateError::Connection("reset".into()).is_transient());
        assert!(TradegateError::TransportTimeout("ping".into()).is_transient());
        assert!(TradegateError::HttpStatus {
            status: 503,
            body: String::new()
        }
        .is_transient());

        assert!(!TradegateError::HttpStatus {
            status: 400,
            body: String::new()
        }
        .is_transient());
        assert!(!TradegateError::Validation("lot".into()).is_transient());
        assert!(!TradegateError::RiskRejection("max lot".into()).is_transient());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            TradegateError::CommandTimeout("abc".into()).code(),
            "CommandTimeout"
        );
        assert_eq!(TradegateError::RiskRejection("x".into()).code(), "RiskRejection");
        assert_eq!(TradegateError::Connection("x".into()).code(), "ConnectionError");
    }
}
