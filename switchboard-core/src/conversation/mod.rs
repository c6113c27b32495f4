//! Conversation Session Management
//!
//! Bounded per-session history with epoch-guarded writes.
//!
//! # Features
//!
//! - Lazy session creation on first access
//! - Window of at most W exchanges (2×W turns), oldest dropped first
//! - Epochs: `clear` bumps the epoch and appends computed against an older
//!   epoch are discarded, so a clear always wins over in-flight requests
//! - Idle eviction by a background sweeper
//! - Optional snapshot persistence through a [`KeyValueStore`]
//!
//! # Example
//!
//! ```rust,ignore
//! use switchboard_core::conversation::{PendingTurn, SessionStore};
//!
//! let store = SessionStore::new(SessionConfig::default());
//! let session = store.get_or_create("session-1").await;
//! store
//!     .append_exchange("session-1", session.epoch(), "Hello!", "coaching", "Hi there!")
//!     .await;
//! ```

mod context;
mod session;
mod storage;
mod store;

pub use context::{SessionContext, truncate_chars};
pub use session::{PendingTurn, Session, Turn, TurnRole};
pub use storage::{InMemoryKeyValueStore, KeyValueStore};
pub use store::SessionStore;
