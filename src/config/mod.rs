//! Configuration Module
//!
//! Handles gateway configuration loading and validation.

pub mod gateway;
pub mod loader;

pub use gateway::{bearer_headers, GatewayConfig, ModelConfig, RequestConfig, RetryConfig};
pub use loader::ConfigLoader;
