//! In-memory responder client driven by per-responder scripts
//!
//! Used by tests and offline demos. Each responder has an optional queue of
//! one-shot steps, consumed first, and an optional standing behavior used once
//! the queue is empty. Responders with neither echo the message back.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::conversation::SessionContext;

use super::client::{ResponderClient, ResponderError};

/// What a scripted responder does on one invocation
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Answer with this text
    Reply(String),
    /// Fail with this error
    Fail(ResponderError),
    /// Wait, then perform the inner step
    Delay(Duration, Box<ScriptStep>),
    /// Never answer
    Hang,
    /// Panic inside the client
    Panic(String),
}

impl ScriptStep {
    pub fn reply(text: impl Into<String>) -> Self {
        ScriptStep::Reply(text.into())
    }

    pub fn delayed(delay: Duration, step: ScriptStep) -> Self {
        ScriptStep::Delay(delay, Box::new(step))
    }
}

/// A recorded invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub responder_key: String,
    pub session_id: String,
    pub message: String,
    /// Number of context turns handed to the responder
    pub context_turns: usize,
}

#[derive(Debug, Default)]
struct ScriptState {
    queued: HashMap<String, VecDeque<ScriptStep>>,
    standing: HashMap<String, ScriptStep>,
    calls: Vec<RecordedCall>,
}

/// Scripted [`ResponderClient`]
#[derive(Debug, Default)]
pub struct ScriptedResponderClient {
    state: Mutex<ScriptState>,
}

impl ScriptedResponderClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: standing behavior for `key`
    pub fn with_step(self, key: impl Into<String>, step: ScriptStep) -> Self {
        self.set_step(key, step);
        self
    }

    /// Builder: standing reply for `key`
    pub fn with_reply(self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.with_step(key, ScriptStep::Reply(text.into()))
    }

    /// Replace the standing behavior for `key`
    pub fn set_step(&self, key: impl Into<String>, step: ScriptStep) {
        self.lock().standing.insert(key.into(), step);
    }

    /// Queue a one-shot step for `key`
    pub fn push(&self, key: impl Into<String>, step: ScriptStep) {
        self.lock()
            .queued
            .entry(key.into())
            .or_default()
            .push_back(step);
    }

    /// Invocations of `key` so far
    pub fn calls_to(&self, key: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.responder_key == key)
            .count()
    }

    /// Every invocation so far, in arrival order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_step(&self, key: &str) -> Option<ScriptStep> {
        let mut state = self.lock();
        if let Some(step) = state.queued.get_mut(key).and_then(VecDeque::pop_front) {
            return Some(step);
        }
        state.standing.get(key).cloned()
    }
}

#[async_trait]
impl ResponderClient for ScriptedResponderClient {
    async fn invoke(
        &self,
        responder_key: &str,
        context: &SessionContext,
        message: &str,
    ) -> Result<String, ResponderError> {
        self.lock().calls.push(RecordedCall {
            responder_key: responder_key.to_string(),
            session_id: context.session_id.clone(),
            message: message.to_string(),
            context_turns: context.turns.len(),
        });

        let mut step = self
            .next_step(responder_key)
            .unwrap_or_else(|| ScriptStep::Reply(format!("[{}] {}", responder_key, message)));

        loop {
            match step {
                ScriptStep::Reply(text) => return Ok(text),
                ScriptStep::Fail(err) => return Err(err),
                ScriptStep::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    step = *inner;
                }
                ScriptStep::Hang => std::future::pending::<()>().await,
                ScriptStep::Panic(msg) => panic!("{}", msg),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_before_standing_then_echo() {
        let client = ScriptedResponderClient::new().with_reply("flow", "standing");
        client.push("flow", ScriptStep::Fail(ResponderError::Timeout));
        let context = SessionContext::empty("s1");

        assert_eq!(
            client.invoke("flow", &context, "hi").await,
            Err(ResponderError::Timeout)
        );
        assert_eq!(client.invoke("flow", &context, "hi").await.unwrap(), "standing");
        assert_eq!(
            client.invoke("wellness", &context, "hi").await.unwrap(),
            "[wellness] hi"
        );
        assert_eq!(client.calls_to("flow"), 2);
        assert_eq!(client.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_step() {
        let client = ScriptedResponderClient::new().with_step(
            "flow",
            ScriptStep::delayed(Duration::from_secs(5), ScriptStep::reply("late")),
        );
        let started = tokio::time::Instant::now();
        let answer = client
            .invoke("flow", &SessionContext::empty("s1"), "hi")
            .await
            .unwrap();
        assert_eq!(answer, "late");
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
