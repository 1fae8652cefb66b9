//! orchat - multi-key chat client for the OpenRouter gateway
//!
//! Resolves a pool of API keys per model, sends chat completion requests
//! (optionally streamed) and recovers from key-level failures by rotating
//! keys with exponential backoff under a bounded retry budget.
//!
//! ```no_run
//! use orchat::{ChatClient, ChatMessage, SendOptions};
//!
//! # async fn run() -> orchat::Result<()> {
//! let mut client = ChatClient::new("deepseek/deepseek-chat-v3-0324:free")?;
//! let reply = client
//!     .send(&[ChatMessage::user("Hello!")], SendOptions::new())
//!     .await?;
//! println!("{}", reply);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod keys;
pub mod logging;

pub use api::{ChatMessage, FileAttachment, Role};
pub use client::{ChatClient, ChatClientBuilder, ConnectionTestResult, SendOptions};
pub use config::{ConfigLoader, GatewayConfig};
pub use error::{ChatError, Result};
pub use keys::{EnvSecrets, KeyPoolResolver, SecretSource};
