//! Request and response types

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Incident, Result, SwitchboardError};
use crate::gateway::{CallStatus, CircuitState, ResponderCallOutcome};
use crate::routing::{RouteDecision, RouteMethod};

use super::state::RequestTrace;

/// Dispatch mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Route to one responder
    #[default]
    Single,
    /// Fan out to several responders and merge their answers
    Synthesize,
}

/// Incoming request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_responder_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder_subset: Option<Vec<String>>,
}

impl OrchestrationRequest {
    /// Single-responder request
    pub fn single(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            mode: Mode::Single,
            explicit_responder_key: None,
            responder_subset: None,
        }
    }

    /// Fan-out request
    pub fn synthesize(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            mode: Mode::Synthesize,
            ..Self::single(session_id, message)
        }
    }

    /// Builder: route to this responder regardless of keywords
    pub fn with_responder(mut self, key: impl Into<String>) -> Self {
        self.explicit_responder_key = Some(key.into());
        self
    }

    /// Builder: responders to consult in synthesize mode
    pub fn with_subset<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.responder_subset = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Shape checks that need no registry
    pub fn validate(&self) -> Result<()> {
        if self.session_id.trim().is_empty() {
            return Err(SwitchboardError::Validation(
                "session_id must not be blank".to_string(),
            ));
        }
        if self.message.trim().is_empty() {
            return Err(SwitchboardError::Validation(
                "message must not be empty".to_string(),
            ));
        }
        if self.mode == Mode::Synthesize && self.explicit_responder_key.is_some() {
            return Err(SwitchboardError::Validation(
                "explicit_responder_key applies to single mode only; use responder_subset"
                    .to_string(),
            ));
        }
        if self.responder_subset.as_ref().is_some_and(Vec::is_empty) {
            return Err(SwitchboardError::Validation(
                "responder_subset must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Overall result of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every consulted responder answered
    Complete,
    /// Some responders failed; the answer merges the rest
    PartialFailure,
    /// No responder answered; the content is fallback text
    TotalFailure,
}

/// Role a responder played in a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributorRole {
    /// Answered the user's message
    Responder,
    /// Merged the other responders' answers
    Synthesizer,
}

/// Per-responder summary reported on the response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributorSummary {
    pub responder_key: String,
    pub display_name: String,
    pub role: ContributorRole,
    pub status: CallStatus,
    pub attempts: u32,
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
}

impl ContributorSummary {
    pub fn from_outcome(
        outcome: &ResponderCallOutcome,
        display_name: impl Into<String>,
        role: ContributorRole,
    ) -> Self {
        Self {
            responder_key: outcome.responder_key.clone(),
            display_name: display_name.into(),
            role,
            status: outcome.status,
            attempts: outcome.attempts,
            latency: outcome.latency,
        }
    }
}

/// Answer to an [`OrchestrationRequest`]
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationResponse {
    pub request_id: Uuid,
    pub session_id: String,
    /// Responder whose text is returned; `"synthesis"` for a labeled merge
    pub responder_used: String,
    pub method: RouteMethod,
    pub matched_keywords: Vec<String>,
    pub content: String,
    /// True when `content` is fallback text
    pub degraded: bool,
    pub outcome: Outcome,
    pub contributors: Vec<ContributorSummary>,
    pub incidents: Vec<Incident>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub trace: Option<RequestTrace>,
}

/// Keyword hits for one responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordScore {
    pub responder_key: String,
    /// Distinct capability keywords found in the message
    pub score: usize,
}

/// Routing decision plus every responder's keyword score, without dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAnalysis {
    #[serde(flatten)]
    pub decision: RouteDecision,
    /// One entry per responder, in priority order
    pub scores: Vec<KeywordScore>,
}

/// Clear request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearRequest {
    pub session_id: String,
}

/// Clear response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearResponse {
    pub session_id: String,
    pub cleared: bool,
}

/// Service health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// `"ok"`, or `"degraded"` when any circuit is not closed
    pub status: String,
    pub responders: usize,
    pub active_sessions: usize,
    pub available_call_slots: usize,
    pub circuits: BTreeMap<String, CircuitState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_to_single_mode() {
        let request: OrchestrationRequest =
            serde_json::from_str(r#"{"session_id":"s1","message":"hi"}"#).unwrap();
        assert_eq!(request.mode, Mode::Single);
        assert!(request.explicit_responder_key.is_none());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_synthesize_request_parses() {
        let request: OrchestrationRequest = serde_json::from_str(
            r#"{"session_id":"s1","message":"hi","mode":"synthesize","responder_subset":["flow"]}"#,
        )
        .unwrap();
        assert_eq!(request.mode, Mode::Synthesize);
        assert_eq!(request.responder_subset, Some(vec!["flow".to_string()]));
    }

    #[test]
    fn test_validation() {
        assert!(OrchestrationRequest::single(" ", "hi").validate().unwrap_err().is_validation());
        assert!(OrchestrationRequest::single("s1", "  ").validate().is_err());
        assert!(
            OrchestrationRequest::synthesize("s1", "hi")
                .with_subset(Vec::<String>::new())
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_explicit_key_rejected_in_synthesize_mode() {
        let err = OrchestrationRequest::synthesize("s1", "hi")
            .with_responder("flow")
            .validate()
            .unwrap_err();
        assert!(err.is_validation());
        assert!(
            OrchestrationRequest::single("s1", "hi")
                .with_responder("flow")
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_outcome_names() {
        assert_eq!(
            serde_json::to_value(Outcome::PartialFailure).unwrap(),
            "partial_failure"
        );
    }
}
