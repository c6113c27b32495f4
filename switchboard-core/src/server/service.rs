//! Protocol server
//!
//! Every command runs as its own task, so a slow responder in one session
//! never holds up another. Commands for the same session are chained and
//! complete in the order they were received.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinSet};

use crate::error::Result;
use crate::orchestration::Orchestrator;

use super::protocol::{Command, Reply};
use super::transport::Transport;

enum Event {
    Finished(std::result::Result<Reply, JoinError>),
    Received(Result<Option<String>>),
}

/// Serves the line protocol on top of an [`Orchestrator`]
#[derive(Debug, Clone)]
pub struct Server {
    orchestrator: Arc<Orchestrator>,
}

impl Server {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Answer one request line. Never fails; errors become failure replies.
    pub async fn handle_line(&self, line: &str) -> Reply {
        let (id, command) = Command::parse_with_id(line);
        match command {
            Ok(command) => self.handle(command).await.with_id(id),
            Err(e) => parse_failure(&e, id),
        }
    }

    /// Execute one command
    pub async fn handle(&self, command: Command) -> Reply {
        tracing::debug!(op = command.op(), "Handling command");
        match command {
            Command::Dispatch(request) => match self.orchestrator.handle(request).await {
                Ok(response) => to_reply(&response),
                Err(e) => e.into(),
            },
            Command::Clear(request) => match self.orchestrator.clear(request).await {
                Ok(response) => to_reply(&response),
                Err(e) => e.into(),
            },
            Command::Route {
                message,
                explicit_responder_key,
            } => to_reply(
                &self
                    .orchestrator
                    .analyze(&message, explicit_responder_key.as_deref()),
            ),
            Command::Responders => to_reply(&self.orchestrator.responders()),
            Command::Health => to_reply(&self.orchestrator.health().await),
        }
    }

    /// Serve until the transport reaches end of input, then wait for every
    /// running command and send its reply
    pub async fn run<T: Transport>(&self, transport: &mut T) -> Result<()> {
        tracing::info!("Protocol server started");
        let mut running: JoinSet<Reply> = JoinSet::new();
        // Completion signal of the latest command per session
        let mut session_tails: HashMap<String, oneshot::Receiver<()>> = HashMap::new();

        loop {
            let event = tokio::select! {
                biased;
                Some(joined) = running.join_next() => Event::Finished(joined),
                received = transport.receive() => Event::Received(received),
            };
            match event {
                Event::Finished(joined) => transport.send(&joined_reply(joined)).await?,
                Event::Received(Ok(Some(line))) => {
                    self.spawn_line(line, &mut running, &mut session_tails)
                }
                Event::Received(Ok(None)) => break,
                Event::Received(Err(e)) => {
                    tracing::error!("Transport error: {}", e);
                    running.shutdown().await;
                    return Err(e);
                }
            }
        }

        while let Some(joined) = running.join_next().await {
            transport.send(&joined_reply(joined)).await?;
        }
        tracing::info!("Protocol server stopped");
        Ok(())
    }

    fn spawn_line(
        &self,
        line: String,
        running: &mut JoinSet<Reply>,
        session_tails: &mut HashMap<String, oneshot::Receiver<()>>,
    ) {
        let (id, command) = Command::parse_with_id(&line);
        let command = match command {
            Ok(command) => command,
            Err(e) => {
                let reply = parse_failure(&e, id);
                running.spawn(async move { reply });
                return;
            }
        };

        // Forget sessions whose last command already finished
        session_tails.retain(|_, tail| {
            matches!(tail.try_recv(), Err(oneshot::error::TryRecvError::Empty))
        });

        let (previous, done) = match command.session_id() {
            Some(session_id) => {
                let (done, tail) = oneshot::channel();
                let previous = session_tails.insert(session_id.to_string(), tail);
                (previous, Some(done))
            }
            None => (None, None),
        };

        let server = self.clone();
        running.spawn(async move {
            if let Some(previous) = previous {
                // Resolves when the earlier command finishes or its task dies
                let _ = previous.await;
            }
            let reply = server.handle(command).await.with_id(id);
            if let Some(done) = done {
                let _ = done.send(());
            }
            reply
        });
    }
}

fn parse_failure(err: &serde_json::Error, id: Option<Value>) -> Reply {
    tracing::warn!(error = %err, "Rejected malformed request line");
    Reply::parse_error(err).with_id(id)
}

fn joined_reply(joined: std::result::Result<Reply, JoinError>) -> Reply {
    joined.unwrap_or_else(|e| {
        tracing::error!("Command task failed: {}", e);
        Reply::failure("internal", format!("Command failed: {}", e))
    })
}

fn to_reply<T: Serialize>(value: &T) -> Reply {
    match serde_json::to_value(value) {
        Ok(result) => Reply::success(result),
        Err(e) => Reply::failure("serialization", e.to_string()),
    }
}
