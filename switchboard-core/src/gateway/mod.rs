//! Responder Gateway
//!
//! Everything between the orchestrator and the network:
//!
//! - [`ResponderClient`]: one round trip to a responder ([`HttpResponderClient`]
//!   over HTTP, [`ScriptedResponderClient`] in memory)
//! - [`RetryConfig`]: exponential backoff for transient failures
//! - [`CircuitBreaker`]: per-responder fail-fast after repeated failures
//! - [`ResponderGateway`]: timeout, retry, circuit breaking and the global
//!   in-flight cap composed into a call that always yields a
//!   [`ResponderCallOutcome`]

mod circuit_breaker;
mod client;
mod http;
mod responder_gateway;
mod retry;
mod scripted;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitPermit, CircuitState,
};
pub use client::{ResponderClient, ResponderError};
pub use http::{HttpClientConfig, HttpResponderClient};
pub use responder_gateway::{CallStatus, ResponderCallOutcome, ResponderGateway};
pub use retry::RetryConfig;
pub use scripted::{RecordedCall, ScriptStep, ScriptedResponderClient};
