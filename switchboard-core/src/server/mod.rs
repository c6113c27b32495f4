//! Newline-delimited JSON protocol server
//!
//! A [`Server`] reads one [`Command`] per line from a [`Transport`], hands it
//! to the [`Orchestrator`](crate::orchestration::Orchestrator) and writes one
//! [`Reply`] per line. Malformed lines are answered with a `parse` error and
//! the server keeps reading.

mod protocol;
mod service;
mod transport;

pub use protocol::{Command, Reply, ReplyError};
pub use service::Server;
pub use transport::{MemoryTransport, StdioTransport, Transport};
