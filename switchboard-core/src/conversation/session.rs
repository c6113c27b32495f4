//! Session and turn types

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::context::SessionContext;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Responder,
}

/// One recorded message; immutable once appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Strictly increasing within a session, including across clears
    pub sequence_no: u64,
    pub role: TurnRole,
    pub content: String,
    /// Responder that produced the turn (responder turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A turn waiting to be appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTurn {
    pub role: TurnRole,
    pub content: String,
    pub responder_key: Option<String>,
    /// Epoch the turn was computed against; `None` means "whatever is current"
    pub epoch: Option<u64>,
}

impl PendingTurn {
    /// A user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            responder_key: None,
            epoch: None,
        }
    }

    /// A responder turn
    pub fn responder(responder_key: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Responder,
            content: content.into(),
            responder_key: Some(responder_key.into()),
            epoch: None,
        }
    }

    /// Pin the turn to an epoch; it is discarded if the session was cleared since
    pub fn at_epoch(mut self, epoch: u64) -> Self {
        self.epoch = Some(epoch);
        self
    }
}

/// Bounded conversation history for one session id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
    /// Incremented by every clear
    epoch: u64,
    turns: VecDeque<Turn>,
    next_sequence: u64,
    /// Set by the sweeper on the instance it removed from the store
    #[serde(skip)]
    pub(crate) evicted: bool,
}

impl Session {
    /// Create an empty session
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            last_active: now,
            epoch: 0,
            turns: VecDeque::new(),
            next_sequence: 1,
            evicted: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Turns, oldest first
    pub fn turns(&self) -> impl ExactSizeIterator<Item = &Turn> + DoubleEndedIterator {
        self.turns.iter()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Append a turn, trimming the oldest turns beyond `max_turns`.
    ///
    /// Returns `false` (and changes nothing) when the turn is pinned to an
    /// epoch other than the current one.
    pub(crate) fn push(&mut self, pending: PendingTurn, max_turns: usize) -> bool {
        if pending.epoch.is_some_and(|epoch| epoch != self.epoch) {
            return false;
        }

        let now = Utc::now();
        self.turns.push_back(Turn {
            sequence_no: self.next_sequence,
            role: pending.role,
            content: pending.content,
            responder_key: pending.responder_key,
            created_at: now,
        });
        self.next_sequence += 1;

        while self.turns.len() > max_turns {
            self.turns.pop_front();
        }

        self.last_active = now;
        true
    }

    /// Drop every turn and start a new epoch
    pub(crate) fn clear(&mut self) {
        self.turns.clear();
        self.epoch += 1;
        self.last_active = Utc::now();
    }

    pub(crate) fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    #[cfg(test)]
    pub(crate) fn set_last_active(&mut self, at: DateTime<Utc>) {
        self.last_active = at;
    }

    /// Snapshot of the recent history for handing to a responder
    pub fn context(&self, exchanges: usize, snippet_chars: usize) -> SessionContext {
        let keep = exchanges.saturating_mul(2);
        let skip = self.turns.len().saturating_sub(keep);
        SessionContext {
            session_id: self.id.clone(),
            epoch: self.epoch,
            turns: self.turns.iter().skip(skip).cloned().collect(),
            snippet_chars,
        }
    }

    /// Encode as a JSON snapshot for a [`KeyValueStore`](super::KeyValueStore)
    pub fn to_snapshot(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a snapshot written by [`Session::to_snapshot`]
    pub fn from_snapshot(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
