//! API Module
//!
//! Chat messages, gateway wire types and streaming support.

pub mod completion;
pub mod message;
pub mod streaming;

pub use completion::{
    Choice, CompletionRequest, CompletionResponse, ContentPart, ImageUrl, Message,
    MessageContent, Usage,
};
pub use message::{ChatMessage, FileAttachment, Role};
pub use streaming::{parse_sse_line, StreamAccumulator, StreamChoice, StreamChunk, StreamDelta};
