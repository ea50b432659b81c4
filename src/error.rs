use thiserror::Error;

/// Main error type for the coordination engine
#[derive(Error, Debug)]
pub enum SwarmError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Protocol errors (malformed or unknown inbound message; connection survives)
    #[error("{0}")]
    Protocol(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Authentication errors (fatal to the connection attempt)
    #[error("Authentication error: {0}")]
    Auth(String),

    // Lookup errors
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Prediction not found: {0}")]
    PredictionNotFound(String),

    // Resolution state machine errors
    #[error("Prediction already resolved: {0}")]
    AlreadyResolved(uuid::Uuid),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for SwarmError
pub type Result<T> = std::result::Result<T, SwarmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_render_without_prefix() {
        let err = SwarmError::Protocol("Unknown message type: ping".to_string());
        assert_eq!(err.to_string(), "Unknown message type: ping");
    }
}
