//! Chat Completion API
//!
//! Wire payloads for the gateway's `/chat/completions` endpoint.

use crate::api::message::ChatMessage;
use serde::{Deserialize, Serialize};

/// A message as sent to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role: "user" or "assistant"
    pub role: String,

    /// Message content (can be string or array of content parts)
    pub content: MessageContent,
}

/// Message content - can be a simple string or array of parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple string content
    Text(String),

    /// Array of content parts (for multimodal)
    Parts(Vec<ContentPart>),
}

/// A content part in a message (for multimodal content)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    /// Text content
    #[serde(rename = "text")]
    Text { text: String },

    /// Image content
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

/// Image URL content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// URL or base64 data URL
    pub url: String,
}

impl From<&ChatMessage> for Message {
    /// Plain text when the message has no images; otherwise one text part
    /// followed by one image part per image, passed through by reference.
    fn from(msg: &ChatMessage) -> Self {
        let content = if msg.has_images() {
            let mut parts = Vec::with_capacity(msg.images.len() + 1);
            parts.push(ContentPart::Text {
                text: msg.content.clone(),
            });
            parts.extend(msg.images.iter().map(|url| ContentPart::ImageUrl {
                image_url: ImageUrl { url: url.clone() },
            }));
            MessageContent::Parts(parts)
        } else {
            MessageContent::Text(msg.content.clone())
        };

        Self {
            role: msg.role.as_str().to_string(),
            content,
        }
    }
}

/// Chat completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,

    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// True iff the caller asked for incremental delivery
    pub stream: bool,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum tokens to generate
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Create a new completion request
    pub fn new(model: impl Into<String>, messages: &[ChatMessage]) -> Self {
        Self {
            model: model.into(),
            messages: messages.iter().map(Message::from).collect(),
            stream: false,
            temperature: 0.7,
            max_tokens: 2000,
        }
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Enable streaming
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Chat completion response. Only `choices` is relied upon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub choices: Vec<Choice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A choice in the completion response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: ResponseMessage,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub content: Option<String>,
}

/// Token usage information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl CompletionResponse {
    /// Text of the first choice, empty when absent
    pub fn content(&self) -> String {
        self.choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default()
    }
}
