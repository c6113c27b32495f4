//! Message Routing
//!
//! Deterministic classification of a message into a target responder.
//!
//! Resolution order:
//!
//! 1. An explicit responder key that names a registered responder always wins
//! 2. Otherwise each responder scores the number of its distinct capability
//!    keywords found in the message as whole words (case-insensitive); the
//!    highest score wins and ties go to the lower `priority`
//! 3. A zero score routes to the registry's default catch-all
//!
//! # Example
//!
//! ```rust,ignore
//! use switchboard_core::routing::{Router, RouteMethod};
//!
//! let router = Router::new(registry)?;
//! let decision = router.route("Our velocity dropped this sprint", None);
//! assert_eq!(decision.responder_key, "flow");
//! assert_eq!(decision.method, RouteMethod::Keyword);
//! ```

mod matcher;
mod router;

pub use matcher::KeywordMatcher;
pub use router::{RouteDecision, RouteMethod, Router};
