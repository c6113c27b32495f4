//! Conversation context handed to responders

use serde::{Deserialize, Serialize};

use super::session::{Turn, TurnRole};

/// Read-only view of a session's recent history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    /// Epoch the snapshot was taken in
    pub epoch: u64,
    /// Recent turns, oldest first
    pub turns: Vec<Turn>,
    /// Responder turns longer than this are cut in [`SessionContext::render`]
    #[serde(skip)]
    pub snippet_chars: usize,
}

impl SessionContext {
    /// Context with no history
    pub fn empty(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Render the history as a plain-text preamble ending in
    /// `"Current request:"`, or an empty string when there is no history.
    pub fn render(&self) -> String {
        if self.turns.is_empty() {
            return String::new();
        }

        let mut lines = vec!["Previous conversation context:".to_string()];
        for turn in &self.turns {
            match turn.role {
                TurnRole::User => lines.push(format!("User: {}", turn.content)),
                TurnRole::Responder => {
                    let speaker = turn.responder_key.as_deref().unwrap_or("responder");
                    lines.push(format!(
                        "{}: {}",
                        speaker,
                        truncate_chars(&turn.content, self.snippet_chars)
                    ));
                }
            }
        }
        format!("{}\n\nCurrent request:", lines.join("\n"))
    }
}

/// Cut `text` to at most `max_chars` characters, appending "..." when cut.
/// A limit of zero disables truncation.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return text.to_string();
    }
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(seq: u64, role: TurnRole, content: &str) -> Turn {
        Turn {
            sequence_no: seq,
            role,
            content: content.to_string(),
            responder_key: (role == TurnRole::Responder).then(|| "flow".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("anything", 0), "anything");
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(SessionContext::empty("s").render(), "");
    }

    #[test]
    fn test_render_truncates_responder_turns() {
        let context = SessionContext {
            session_id: "s".to_string(),
            epoch: 0,
            turns: vec![
                turn(1, TurnRole::User, "How is velocity?"),
                turn(2, TurnRole::Responder, "Velocity is trending down"),
            ],
            snippet_chars: 8,
        };
        let rendered = context.render();
        assert_eq!(
            rendered,
            "Previous conversation context:\nUser: How is velocity?\nflow: Velocity...\n\nCurrent request:"
        );
    }
}
