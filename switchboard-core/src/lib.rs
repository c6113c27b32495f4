//! # Switchboard - Conversational Responder Router
//!
//! Switchboard routes user messages to a catalog of specialist responders:
//! - Keyword routing with priority tie-breaks and a catch-all default
//! - Per-session conversation memory with a sliding window and idle eviction
//! - A responder gateway with timeouts, retries, a concurrency cap and
//!   per-responder circuit breakers
//! - Single-responder dispatch or fan-out with synthesis
//! - Deterministic fallback answers when responders are unavailable
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use switchboard_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SwitchboardConfig::load()?;
//!     let client = HttpResponderClient::from_registry(
//!         config.client.clone(),
//!         &ResponderRegistry::from_configs(config.responders.clone())?,
//!     )?;
//!     let orchestrator = Orchestrator::from_config(&config, Arc::new(client))?;
//!
//!     let response = orchestrator
//!         .handle(OrchestrationRequest::single("session-1", "Our velocity dropped"))
//!         .await?;
//!     println!("{}: {}", response.responder_used, response.content);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod conversation;
pub mod error;
pub mod gateway;
pub mod orchestration;
pub mod registry;
pub mod routing;
pub mod server;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{GatewayConfig, OrchestrationConfig, SessionConfig, SwitchboardConfig};
    pub use crate::conversation::{SessionContext, SessionStore, Turn, TurnRole};
    pub use crate::error::{Incident, Result, SwitchboardError};
    pub use crate::gateway::{
        CallStatus, CircuitState, HttpClientConfig, HttpResponderClient, ResponderCallOutcome,
        ResponderClient, ResponderError, ResponderGateway, ScriptedResponderClient,
    };
    pub use crate::orchestration::{
        ClearRequest, ClearResponse, Mode, OrchestrationRequest, OrchestrationResponse,
        Orchestrator, Outcome, RequestState,
    };
    pub use crate::registry::{ResponderConfig, ResponderDescriptor, ResponderRegistry};
    pub use crate::routing::{RouteDecision, RouteMethod, Router};
    pub use crate::server::{Server, StdioTransport};
}
