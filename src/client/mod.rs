//! Client Module
//!
//! Request client, HTTP transport, retry policy and failure classification.

pub mod chat;
pub mod classify;
pub mod retry;
pub mod transport;

pub use chat::{ChatClient, ChatClientBuilder, ConnectionTestResult, SendOptions};
pub use classify::{classify, KeyFault};
pub use retry::RetryPolicy;
pub use transport::{ByteStream, HttpTransport, Transport, TransportResponse};
