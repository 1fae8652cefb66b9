//! Chat Messages
//!
//! Messages as the interface layer creates them. The client only reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub name: String,

    /// MIME type, e.g. `application/pdf`
    pub mime_type: String,

    /// Size in bytes
    pub size: u64,

    /// Where the content can be fetched from
    pub url: String,
}

/// A message in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,

    /// Text content
    pub content: String,

    /// Inline images as URLs or `data:` URIs, in display order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileAttachment>,

    pub timestamp: DateTime<Utc>,

    /// Model that produced an assistant message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Set on assistant messages that report a failure
    #[serde(default)]
    pub is_error: bool,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
            files: Vec::new(),
            timestamp: Utc::now(),
            model: None,
            is_error: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant message shown in place of a failed reply
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(content)
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.images.push(image.into());
        self
    }

    pub fn with_file(mut self, file: FileAttachment) -> Self {
        self.files.push(file);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }
}
