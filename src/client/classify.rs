//! Failure Classification
//!
//! Decides whether a failed attempt was caused by the key itself. The rules
//! are substring heuristics over the gateway's error message and are kept in
//! this one place so the retry loop never looks at message text.

use serde::Deserialize;
use std::fmt;

/// Why a key was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFault {
    /// Key unknown to the gateway
    InvalidKey,

    /// Account behind the key has been disabled
    AccountDeactivated,

    /// HTTP 429 or a rate limit message
    RateLimited,

    /// Quota or credit balance used up
    QuotaExceeded,
}

impl fmt::Display for KeyFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyFault::InvalidKey => "invalid key",
            KeyFault::AccountDeactivated => "account deactivated",
            KeyFault::RateLimited => "rate limited",
            KeyFault::QuotaExceeded => "quota exceeded",
        };
        f.write_str(s)
    }
}

/// Error body returned by the gateway: `{"error": {"message": ..., "code": ...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,

    /// Either a string code (`invalid_api_key`) or a numeric status
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

impl ErrorEnvelope {
    pub fn message(&self) -> Option<String> {
        self.error
            .message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
    }

    pub fn code(&self) -> Option<String> {
        match self.error.code.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Classify a failure as key-level or not.
///
/// `status` is absent for transport failures. Returns `None` for failures
/// that must propagate without rotation.
pub fn classify(status: Option<u16>, code: Option<&str>, message: &str) -> Option<KeyFault> {
    match code {
        Some("invalid_api_key") => return Some(KeyFault::InvalidKey),
        Some("account_deactivated") => return Some(KeyFault::AccountDeactivated),
        _ => {}
    }

    if status == Some(429) {
        return Some(KeyFault::RateLimited);
    }

    let lower = message.to_lowercase();
    if lower.contains("invalid_api_key") {
        Some(KeyFault::InvalidKey)
    } else if lower.contains("account_deactivated") {
        Some(KeyFault::AccountDeactivated)
    } else if lower.contains("rate limit") || lower.contains("429") {
        Some(KeyFault::RateLimited)
    } else if lower.contains("quota") || lower.contains("insufficient") {
        Some(KeyFault::QuotaExceeded)
    } else {
        None
    }
}
