//! Line transports for the protocol server

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin, Stdout};

use crate::error::Result;

use super::protocol::Reply;

/// Source of request lines and sink for reply lines
#[async_trait]
pub trait Transport: Send {
    /// Next non-empty request line, or `None` at end of input.
    ///
    /// Must be cancel safe: the server polls it alongside finished requests,
    /// and a dropped call must not lose buffered input.
    async fn receive(&mut self) -> Result<Option<String>>;

    /// Write one reply line
    async fn send(&mut self, reply: &Reply) -> Result<()>;
}

/// Newline-delimited JSON over stdin/stdout
pub struct StdioTransport {
    stdin: BufReader<Stdin>,
    stdout: Stdout,
    /// Bytes of a line not yet terminated; survives a cancelled `receive`
    pending: Vec<u8>,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            stdin: BufReader::new(tokio::io::stdin()),
            stdout: tokio::io::stdout(),
            pending: Vec::new(),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn receive(&mut self) -> Result<Option<String>> {
        loop {
            let read = self.stdin.read_until(b'\n', &mut self.pending).await?;
            if read == 0 && self.pending.is_empty() {
                return Ok(None);
            }
            let bytes = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&bytes);
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }

    async fn send(&mut self, reply: &Reply) -> Result<()> {
        let mut json = serde_json::to_string(reply)?;
        json.push('\n');
        self.stdout.write_all(json.as_bytes()).await?;
        self.stdout.flush().await?;
        Ok(())
    }
}

/// In-memory transport for testing
#[derive(Debug, Default)]
pub struct MemoryTransport {
    requests: VecDeque<String>,
    replies: Vec<Reply>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request line
    pub fn push_line(&mut self, line: impl Into<String>) {
        self.requests.push_back(line.into());
    }

    /// Queue a JSON request
    pub fn push_json(&mut self, value: serde_json::Value) {
        self.push_line(value.to_string());
    }

    /// All replies sent so far
    pub fn replies(&self) -> &[Reply] {
        &self.replies
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn receive(&mut self) -> Result<Option<String>> {
        while let Some(line) = self.requests.pop_front() {
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    async fn send(&mut self, reply: &Reply) -> Result<()> {
        self.replies.push(reply.clone());
        Ok(())
    }
}
