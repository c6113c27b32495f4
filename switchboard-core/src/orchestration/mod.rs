//! Orchestration
//!
//! Single-responder dispatch and multi-responder fan-out with synthesis,
//! wrapped in a per-request state machine. Responder failures never surface
//! as errors: they become incidents on the response and, when nothing
//! answered, fallback content with `degraded = true`.

mod fallback;
mod orchestrator;
mod request;
mod state;
mod synthesis;

pub use fallback::FallbackTemplateEngine;
pub use orchestrator::{LABELED_MERGE, Orchestrator};
pub use request::{
    ClearRequest, ClearResponse, ContributorRole, ContributorSummary, HealthReport, IntentAnalysis,
    KeywordScore, Mode, OrchestrationRequest, OrchestrationResponse, Outcome,
};
pub use state::{RequestState, RequestTrace, StateTransition};
pub use synthesis::{Section, labeled_sections, synthesis_prompt};
