//! Line protocol envelopes
//!
//! Each request is one JSON object on one line, tagged by `op`:
//!
//! ```text
//! {"op":"dispatch","session_id":"s1","message":"Our velocity dropped"}
//! {"op":"clear","session_id":"s1"}
//! {"op":"route","message":"stress and burnout"}
//! {"op":"responders"}
//! {"op":"health"}
//! ```
//!
//! Each is answered by one line: `{"ok":true,"result":...}` or
//! `{"ok":false,"error":{"kind":...,"message":...}}`. Requests run
//! concurrently, so replies can arrive out of order; a request may carry any
//! JSON `id`, which is echoed on its reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SwitchboardError;
use crate::orchestration::{ClearRequest, OrchestrationRequest};

/// A decoded request line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Dispatch(OrchestrationRequest),
    Clear(ClearRequest),
    Route {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explicit_responder_key: Option<String>,
    },
    Responders,
    Health,
}

impl Command {
    /// Decode one line
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Decode one line, splitting off the client `id`. The id is recovered
    /// whenever the line is a JSON object, even if the command is invalid.
    pub fn parse_with_id(line: &str) -> (Option<Value>, Result<Self, serde_json::Error>) {
        let mut value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => return (None, Err(e)),
        };
        let id = value.as_object_mut().and_then(|fields| fields.remove("id"));
        (id, serde_json::from_value(value))
    }

    /// Session the command reads or writes, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Command::Dispatch(request) => Some(&request.session_id),
            Command::Clear(request) => Some(&request.session_id),
            Command::Route { .. } | Command::Responders | Command::Health => None,
        }
    }

    /// Name of the operation, for logging
    pub fn op(&self) -> &'static str {
        match self {
            Command::Dispatch(_) => "dispatch",
            Command::Clear(_) => "clear",
            Command::Route { .. } => "route",
            Command::Responders => "responders",
            Command::Health => "health",
        }
    }
}

/// Error body of a failed reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyError {
    pub kind: String,
    pub message: String,
}

/// One reply line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Echo of the request `id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl Reply {
    pub fn success(result: Value) -> Self {
        Self {
            id: None,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: None,
            ok: false,
            result: None,
            error: Some(ReplyError {
                kind: kind.into(),
                message: message.into(),
            }),
        }
    }

    /// Builder: echo a request id
    pub fn with_id(mut self, id: Option<Value>) -> Self {
        self.id = id;
        self
    }

    /// Reply for a line that is not a valid command
    pub fn parse_error(err: &serde_json::Error) -> Self {
        Self::failure("parse", format!("Invalid request line: {}", err))
    }
}

impl From<SwitchboardError> for Reply {
    fn from(err: SwitchboardError) -> Self {
        Reply::failure(err.kind(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::Mode;

    #[test]
    fn test_parse_dispatch() {
        let command = Command::parse(
            r#"{"op":"dispatch","session_id":"s1","message":"hi","mode":"synthesize"}"#,
        )
        .unwrap();
        match command {
            Command::Dispatch(request) => {
                assert_eq!(request.session_id, "s1");
                assert_eq!(request.mode, Mode::Synthesize);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_unit_ops() {
        assert_eq!(Command::parse(r#"{"op":"health"}"#).unwrap(), Command::Health);
        assert_eq!(
            Command::parse(r#"{"op":"route","message":"stress"}"#).unwrap(),
            Command::Route {
                message: "stress".to_string(),
                explicit_responder_key: None
            }
        );
        assert!(Command::parse(r#"{"op":"explode"}"#).is_err());
    }

    #[test]
    fn test_parse_with_id() {
        let (id, command) = Command::parse_with_id(r#"{"id":7,"op":"clear","session_id":"s1"}"#);
        assert_eq!(id, Some(serde_json::json!(7)));
        assert_eq!(command.unwrap().session_id(), Some("s1"));

        let (id, command) = Command::parse_with_id(r#"{"id":"x","op":"explode"}"#);
        assert_eq!(id, Some(serde_json::json!("x")));
        assert!(command.is_err());

        let (id, command) = Command::parse_with_id("not json");
        assert!(id.is_none());
        assert!(command.is_err());

        let reply = Reply::success(serde_json::json!(1)).with_id(Some(serde_json::json!("x")));
        assert_eq!(serde_json::to_value(reply).unwrap()["id"], "x");
    }

    #[test]
    fn test_reply_shapes() {
        let ok = serde_json::to_value(Reply::success(serde_json::json!({"cleared": true}))).unwrap();
        assert_eq!(ok, serde_json::json!({"ok": true, "result": {"cleared": true}}));

        let err: Reply = SwitchboardError::UnknownResponder("ghost".into()).into();
        let err = serde_json::to_value(err).unwrap();
        assert_eq!(err["ok"], false);
        assert_eq!(err["error"]["kind"], "unknown_responder");
        assert!(err.get("result").is_none());
    }
}
