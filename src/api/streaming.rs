//! Streaming Support
//!
//! Handles Server-Sent Events (SSE) streaming for chat completions.

use crate::client::transport::ByteStream;
use crate::error::{ChatError, Result};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A streaming chunk from the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Choices with deltas
    pub choices: Vec<StreamChoice>,
}

/// A choice in a streaming chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    /// The delta (partial message)
    #[serde(default)]
    pub delta: StreamDelta,

    /// Finish reason (set in final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Delta content in a streaming chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl StreamChunk {
    /// Content increment carried by the first choice
    pub fn delta_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Accumulates increments while forwarding each one to the caller
pub struct StreamAccumulator<'a> {
    /// Accumulated content
    content: String,

    /// Bytes of a line not yet terminated by `\n`
    pending: Vec<u8>,

    on_chunk: &'a mut (dyn FnMut(&str) + Send),

    /// Frames that failed to parse and were skipped
    skipped: usize,
}

impl<'a> StreamAccumulator<'a> {
    pub fn new(on_chunk: &'a mut (dyn FnMut(&str) + Send)) -> Self {
        Self {
            content: String::new(),
            pending: Vec::new(),
            on_chunk,
            skipped: 0,
        }
    }

    /// Feed raw body bytes; complete lines are processed immediately
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.process_line(&String::from_utf8_lossy(&line));
        }
    }

    /// Process an SSE line
    pub fn process_line(&mut self, line: &str) {
        match parse_sse_line(line) {
            Ok(Some(chunk)) => {
                if let Some(text) = chunk.delta_text() {
                    self.content.push_str(text);
                    (self.on_chunk)(text);
                }
            }
            Ok(None) => {}
            Err(e) => {
                self.skipped += 1;
                warn!(error = %e, "skipping malformed stream frame");
            }
        }
    }

    /// Flush a trailing unterminated line and return the full text
    pub fn finish(mut self) -> String {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.process_line(&String::from_utf8_lossy(&line));
        }
        self.content
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Drain a response body, returning the accumulated text once it ends.
    ///
    /// A read error aborts the stream; increments already delivered to the
    /// callback stay delivered.
    pub async fn consume(mut self, mut body: ByteStream) -> Result<String> {
        while let Some(chunk) = body.next().await {
            self.push_bytes(&chunk?);
        }
        Ok(self.finish())
    }
}

/// Parse SSE data line into a StreamChunk
pub fn parse_sse_line(line: &str) -> Result<Option<StreamChunk>> {
    // Skip empty lines and comments
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    // Parse data: prefix
    if let Some(data) = line.strip_prefix("data: ") {
        let data = data.trim();

        // Check for [DONE] signal
        if data == "[DONE]" {
            return Ok(None);
        }

        let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
            ChatError::Stream(format!("Failed to parse SSE chunk: {}. Data: {}", e, data))
        })?;

        return Ok(Some(chunk));
    }

    // Ignore other event types (event:, id:, retry:)
    Ok(None)
}
