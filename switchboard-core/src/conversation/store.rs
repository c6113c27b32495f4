//! Session Store
//!
//! Owns every live [`Session`]. Each session sits behind its own async mutex,
//! so writes to one session are serialized while different sessions proceed
//! in parallel. The outer map lock is only held long enough to look up or
//! insert a handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;

use super::context::SessionContext;
use super::session::{PendingTurn, Session};
use super::storage::KeyValueStore;

type SessionHandle = Arc<Mutex<Session>>;

/// Bounded, per-session-serialized conversation store
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    config: SessionConfig,
    backend: Option<Arc<dyn KeyValueStore>>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("config", &self.config)
            .field("has_backend", &self.backend.is_some())
            .finish()
    }
}

impl SessionStore {
    /// Create an in-memory store
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            backend: None,
        }
    }

    /// Attach a snapshot backend
    pub fn with_backend(mut self, backend: Arc<dyn KeyValueStore>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Maximum turns a session may hold (2×W)
    pub fn max_turns(&self) -> usize {
        self.config.window_exchanges.saturating_mul(2)
    }

    /// Number of sessions currently held in memory
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Fetch a session, creating it on first access. Never fails.
    pub async fn get_or_create(&self, session_id: &str) -> Session {
        let mut session = self.lock(session_id).await;
        session.touch();
        session.clone()
    }

    /// Snapshot of a session without creating it
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        let handle = self.sessions.read().await.get(session_id).cloned()?;
        let session = handle.lock().await;
        Some(session.clone())
    }

    /// Context snapshot for a session, creating the session if needed
    pub async fn context_for(&self, session_id: &str) -> SessionContext {
        let session = self.get_or_create(session_id).await;
        session.context(
            self.config.context_exchanges,
            self.config.context_snippet_chars,
        )
    }

    /// Append one turn, trimming to 2×W turns.
    ///
    /// A turn pinned to a stale epoch is discarded and the session is returned
    /// unchanged.
    pub async fn append_turn(&self, session_id: &str, turn: PendingTurn) -> Session {
        let mut session = self.lock(session_id).await;
        if session.push(turn, self.max_turns()) {
            self.persist(&session).await;
        } else {
            tracing::debug!(
                session_id,
                epoch = session.epoch(),
                "Discarded turn computed against a stale epoch"
            );
        }
        session.clone()
    }

    /// Append a user turn and a responder turn together, both pinned to `epoch`
    pub async fn append_exchange(
        &self,
        session_id: &str,
        epoch: u64,
        user_content: impl Into<String>,
        responder_key: impl Into<String>,
        responder_content: impl Into<String>,
    ) -> Session {
        let mut session = self.lock(session_id).await;
        if session.epoch() != epoch {
            tracing::debug!(
                session_id,
                stale_epoch = epoch,
                epoch = session.epoch(),
                "Discarded exchange computed against a stale epoch"
            );
            return session.clone();
        }

        let max_turns = self.max_turns();
        session.push(PendingTurn::user(user_content).at_epoch(epoch), max_turns);
        session.push(
            PendingTurn::responder(responder_key, responder_content).at_epoch(epoch),
            max_turns,
        );
        self.persist(&session).await;
        session.clone()
    }

    /// Empty a session and bump its epoch. Returns whether the session existed.
    pub async fn clear(&self, session_id: &str) -> bool {
        let known = self.sessions.read().await.contains_key(session_id)
            || self.restore(session_id).await.is_some();
        if !known {
            return false;
        }

        let mut session = self.lock(session_id).await;
        session.clear();
        self.persist(&session).await;
        tracing::info!(session_id, epoch = session.epoch(), "Session cleared");
        true
    }

    /// Evict sessions idle for longer than `ttl`
    pub async fn sweep_idle(&self, ttl: Duration) -> usize {
        self.sweep_idle_at(Utc::now(), ttl).await
    }

    /// Evict sessions whose last activity is more than `ttl` before `now`.
    ///
    /// Sessions locked by a writer are skipped; they are active by definition.
    pub async fn sweep_idle_at(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();

        sessions.retain(|_, handle| match handle.try_lock() {
            Ok(mut session) => {
                if now.signed_duration_since(session.last_active()) > ttl {
                    session.evicted = true;
                    false
                } else {
                    true
                }
            }
            Err(_) => true,
        });

        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::info!(evicted, remaining = sessions.len(), "Swept idle sessions");
        }
        evicted
    }

    /// Run [`SessionStore::sweep_idle`] every `sweep_interval` until cancelled
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let interval = store.config.sweep_interval;
        let ttl = store.config.idle_ttl;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Session sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        store.sweep_idle(ttl).await;
                    }
                }
            }
        })
    }

    /// Lock a session, creating (or restoring) it when absent.
    ///
    /// Retries when the sweeper evicted the handle between lookup and lock.
    async fn lock(&self, session_id: &str) -> OwnedMutexGuard<Session> {
        loop {
            let handle = self.handle(session_id).await;
            let guard = handle.lock_owned().await;
            if !guard.evicted {
                return guard;
            }
        }
    }

    async fn handle(&self, session_id: &str) -> SessionHandle {
        if let Some(handle) = self.sessions.read().await.get(session_id) {
            return Arc::clone(handle);
        }

        let restored = self.restore(session_id).await;

        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(session_id.to_string()).or_insert_with(|| {
            let session = restored.unwrap_or_else(|| {
                tracing::debug!(session_id, "Created session");
                Session::new(session_id)
            });
            Arc::new(Mutex::new(session))
        }))
    }

    async fn restore(&self, session_id: &str) -> Option<Session> {
        let backend = self.backend.as_ref()?;
        match backend.get(&snapshot_key(session_id)).await {
            Ok(Some(bytes)) => match Session::from_snapshot(&bytes) {
                Ok(session) => {
                    tracing::debug!(session_id, "Restored session snapshot");
                    Some(session)
                }
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "Ignoring unreadable session snapshot");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Session snapshot lookup failed");
                None
            }
        }
    }

    async fn persist(&self, session: &Session) {
        let Some(backend) = &self.backend else {
            return;
        };
        let bytes = match session.to_snapshot() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(session_id = session.id(), error = %e, "Failed to encode session snapshot");
                return;
            }
        };
        if let Err(e) = backend.put(&snapshot_key(session.id()), bytes).await {
            tracing::warn!(session_id = session.id(), error = %e, "Failed to write session snapshot");
        }
    }
}

fn snapshot_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}
