//! Error types for Switchboard operations
//!
//! Two families live here. [`SwitchboardError`] is the crate error and is only
//! ever returned for configuration problems or malformed caller input.
//! [`Incident`] describes non-fatal conditions that were absorbed while serving
//! a request; incidents are logged and reported back on the response instead of
//! being raised.

use serde::{Deserialize, Serialize};

/// Result type for Switchboard operations
pub type Result<T> = std::result::Result<T, SwitchboardError>;

/// Error types for the Switchboard crate
#[derive(Debug, thiserror::Error)]
pub enum SwitchboardError {
    /// Malformed request (missing session id, empty message, bad subset)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A request referenced a responder key that is not registered
    #[error("Unknown responder: {0}")]
    UnknownResponder(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Session snapshot backend failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SwitchboardError {
    /// Whether the error was caused by the caller's request rather than the system
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SwitchboardError::Validation(_) | SwitchboardError::UnknownResponder(_)
        )
    }

    /// Short machine-readable kind, used by the line protocol
    pub fn kind(&self) -> &'static str {
        match self {
            SwitchboardError::Validation(_) => "validation",
            SwitchboardError::UnknownResponder(_) => "unknown_responder",
            SwitchboardError::Configuration(_) => "configuration",
            SwitchboardError::Storage(_) => "storage",
            SwitchboardError::Serialization(_) => "serialization",
            SwitchboardError::Io(_) => "io",
        }
    }
}

/// Non-fatal conditions absorbed while serving a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Incident {
    /// No keyword matched; the catch-all responder was used
    #[error("No capability keyword matched; routed to default responder '{responder_key}'")]
    RoutingDefaulted { responder_key: String },

    /// Responder did not answer within its call timeout
    #[error("Responder '{responder_key}' timed out")]
    ResponderTimeout { responder_key: String },

    /// Responder call failed at the transport level (or was rejected)
    #[error("Responder '{responder_key}' transport error: {detail}")]
    ResponderTransportError { responder_key: String, detail: String },

    /// Responder kept rate limiting after retries were exhausted
    #[error("Responder '{responder_key}' rate limited")]
    ResponderRateLimited { responder_key: String },

    /// Call short-circuited because the responder's circuit is open
    #[error("Circuit open for responder '{responder_key}'")]
    CircuitOpen { responder_key: String },

    /// Some but not all synthesis responders succeeded
    #[error("Partial failure: {failed:?} did not contribute")]
    OrchestrationPartialFailure { failed: Vec<String> },

    /// No responder produced usable content; fallback text was returned
    #[error("Total failure: none of {attempted:?} produced content")]
    OrchestrationTotalFailure { attempted: Vec<String> },
}
