//! Per-request state machine
//!
//! ```text
//! RECEIVED → ROUTED → DISPATCHED → { COMPLETED | FAILED_TIMEOUT | FAILED_ERROR | CIRCUIT_OPEN }
//!                                 → RESPONDED → PERSISTED
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::gateway::{CallStatus, ResponderCallOutcome};

/// Request lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Received,
    Routed,
    Dispatched,
    Completed,
    FailedTimeout,
    FailedError,
    CircuitOpen,
    Responded,
    Persisted,
}

impl RequestState {
    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Received, Routed)
                | (Routed, Dispatched)
                | (Dispatched, Completed | FailedTimeout | FailedError | CircuitOpen)
                | (Completed | FailedTimeout | FailedError | CircuitOpen, Responded)
                | (Responded, Persisted)
        )
    }

    /// Dispatch result state for a set of call outcomes: completed when any
    /// succeeded, otherwise the dominant failure
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a ResponderCallOutcome>) -> Self {
        let mut any_timeout = false;
        let mut all_circuit_open = true;
        let mut seen = false;
        for outcome in outcomes {
            seen = true;
            match outcome.status {
                CallStatus::Completed => return RequestState::Completed,
                CallStatus::CircuitOpen => {}
                CallStatus::Timeout => {
                    any_timeout = true;
                    all_circuit_open = false;
                }
                CallStatus::TransportError | CallStatus::RateLimited => all_circuit_open = false,
            }
        }

        if seen && all_circuit_open {
            RequestState::CircuitOpen
        } else if any_timeout {
            RequestState::FailedTimeout
        } else {
            RequestState::FailedError
        }
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestState::Received => "RECEIVED",
            RequestState::Routed => "ROUTED",
            RequestState::Dispatched => "DISPATCHED",
            RequestState::Completed => "COMPLETED",
            RequestState::FailedTimeout => "FAILED_TIMEOUT",
            RequestState::FailedError => "FAILED_ERROR",
            RequestState::CircuitOpen => "CIRCUIT_OPEN",
            RequestState::Responded => "RESPONDED",
            RequestState::Persisted => "PERSISTED",
        };
        write!(f, "{}", name)
    }
}

/// One recorded transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: RequestState,
    /// Time since the request was received
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

/// Transitions of one request, in order
#[derive(Debug, Clone)]
pub struct RequestTrace {
    request_id: Uuid,
    started: Instant,
    transitions: Vec<StateTransition>,
}

impl RequestTrace {
    /// Start a trace in `RECEIVED`
    pub fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            started: Instant::now(),
            transitions: vec![StateTransition {
                state: RequestState::Received,
                elapsed: Duration::ZERO,
            }],
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Current state
    pub fn state(&self) -> RequestState {
        self.transitions
            .last()
            .map(|t| t.state)
            .unwrap_or(RequestState::Received)
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: RequestState) -> bool {
        let current = self.state();
        if !current.can_transition_to(next) {
            tracing::warn!(
                request_id = %self.request_id,
                from = %current,
                to = %next,
                "Ignoring illegal request state transition"
            );
            return false;
        }
        tracing::debug!(
            request_id = %self.request_id,
            from = %current,
            to = %next,
            "Request state"
        );
        self.transitions.push(StateTransition {
            state: next,
            elapsed: self.started.elapsed(),
        });
        true
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// States visited, in order
    pub fn states(&self) -> Vec<RequestState> {
        self.transitions.iter().map(|t| t.state).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: CallStatus) -> ResponderCallOutcome {
        ResponderCallOutcome {
            responder_key: "flow".to_string(),
            status,
            content: None,
            latency: Duration::ZERO,
            attempts: 1,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_happy_path() {
        let mut trace = RequestTrace::new(Uuid::new_v4());
        for state in [
            RequestState::Routed,
            RequestState::Dispatched,
            RequestState::Completed,
            RequestState::Responded,
            RequestState::Persisted,
        ] {
            assert!(trace.advance(state));
        }
        assert_eq!(trace.states().len(), 6);
        assert_eq!(trace.state(), RequestState::Persisted);
    }

    #[tokio::test]
    async fn test_illegal_transition_ignored() {
        let mut trace = RequestTrace::new(Uuid::new_v4());
        assert!(!trace.advance(RequestState::Dispatched));
        assert_eq!(trace.state(), RequestState::Received);
    }

    #[test]
    fn test_state_from_outcomes() {
        let completed = [outcome(CallStatus::Timeout), outcome(CallStatus::Completed)];
        assert_eq!(RequestState::from_outcomes(&completed), RequestState::Completed);

        let open = [outcome(CallStatus::CircuitOpen), outcome(CallStatus::CircuitOpen)];
        assert_eq!(RequestState::from_outcomes(&open), RequestState::CircuitOpen);

        let mixed = [outcome(CallStatus::CircuitOpen), outcome(CallStatus::Timeout)];
        assert_eq!(RequestState::from_outcomes(&mixed), RequestState::FailedTimeout);

        let errors = [outcome(CallStatus::TransportError), outcome(CallStatus::RateLimited)];
        assert_eq!(RequestState::from_outcomes(&errors), RequestState::FailedError);
    }

    #[test]
    fn test_serialized_names() {
        let json = serde_json::to_string(&RequestState::FailedTimeout).unwrap();
        assert_eq!(json, "\"FAILED_TIMEOUT\"");
    }
}
