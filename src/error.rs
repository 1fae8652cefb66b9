//! Error Types
//!
//! Error taxonomy for the chat client. Key-level failures are recoverable by
//! rotation; everything else propagates to the caller untouched.

use crate::client::classify::{classify, ErrorEnvelope, KeyFault};
use thiserror::Error;

/// Main error type for orchat operations
#[derive(Debug, Error)]
pub enum ChatError {
    /// The key pool was empty when a request was attempted
    #[error("No API keys available for model '{model}'. Set OPENROUTER_API_KEY or pass an explicit key.")]
    NoCredentials { model: String },

    /// The gateway rejected the current key (invalid, deactivated, rate limited, out of quota)
    #[error("API key rejected ({fault}): {message}")]
    KeyRejected {
        fault: KeyFault,
        status: Option<u16>,
        message: String,
    },

    /// Non-2xx response that is not attributable to the key
    #[error("Gateway returned {status}: {message}")]
    Gateway { status: u16, message: String },

    /// Network level failure
    #[error("Request failed: {0}")]
    Transport(String),

    /// Timeout
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Response parsing failed
    #[error("Response error: {0}")]
    Response(String),

    /// A single malformed stream frame
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Every attempt failed with a key-level error
    #[error("All {attempts} attempts failed across the available API keys")]
    AllAttemptsExhausted {
        attempts: u32,
        #[source]
        last: Box<ChatError>,
    },

    /// Configuration errors (invalid JSON, unreadable file, bad header value)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Build an error from a non-2xx gateway response.
    ///
    /// The body is read as an `{"error": {"message", "code"}}` envelope when
    /// possible; otherwise the message falls back to the bare status line.
    pub fn from_gateway_response(status: u16, body: &str) -> Self {
        let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
        let code = envelope.as_ref().and_then(ErrorEnvelope::code);
        let message = envelope
            .as_ref()
            .and_then(|e| e.message())
            .unwrap_or_else(|| format!("HTTP error! status: {}", status));

        match classify(Some(status), code.as_deref(), &message) {
            Some(fault) => ChatError::KeyRejected {
                fault,
                status: Some(status),
                message,
            },
            None => ChatError::Gateway { status, message },
        }
    }

    /// The key-level fault behind this error, if any.
    ///
    /// Transport failures are matched on their message only, so a proxy
    /// reporting "rate limit" still triggers rotation.
    pub fn key_fault(&self) -> Option<KeyFault> {
        match self {
            ChatError::KeyRejected { fault, .. } => Some(*fault),
            ChatError::Transport(msg) | ChatError::Timeout(msg) => classify(None, None, msg),
            _ => None,
        }
    }

    /// Whether the retry loop should rotate to the next key
    pub fn is_key_fault(&self) -> bool {
        self.key_fault().is_some()
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::Timeout(err.to_string())
        } else if err.is_connect() {
            ChatError::Transport(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            ChatError::Response(format!("Failed to decode response: {}", err))
        } else {
            ChatError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Response(format!("JSON parsing error: {}", err))
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Config(format!("IO error: {}", err))
    }
}

/// Result type alias for orchat operations
pub type Result<T> = std::result::Result<T, ChatError>;
