//! Responder client abstraction
//!
//! A [`ResponderClient`] performs exactly one network round trip to a
//! responder. Timeouts, retries and circuit breaking are layered on top by the
//! [`ResponderGateway`](super::ResponderGateway).

use std::time::Duration;

use async_trait::async_trait;

use crate::conversation::SessionContext;

/// Failure of a single responder invocation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponderError {
    /// The responder did not answer in time
    #[error("Responder timed out")]
    Timeout,

    /// Connection failure or retryable server error
    #[error("Transport error: {0}")]
    Transport(String),

    /// The responder asked us to slow down
    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// The responder refused the request; retrying will not help
    #[error("Rejected: {0}")]
    Rejected(String),
}

impl ResponderError {
    /// Whether another attempt may succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, ResponderError::Rejected(_))
    }

    /// Server-provided minimum wait before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ResponderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// One network round trip to a responder
#[async_trait]
pub trait ResponderClient: Send + Sync {
    /// Ask `responder_key` to answer `message` given the session `context`
    async fn invoke(
        &self,
        responder_key: &str,
        context: &SessionContext,
        message: &str,
    ) -> Result<String, ResponderError>;
}
