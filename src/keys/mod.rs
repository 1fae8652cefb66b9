//! Keys Module
//!
//! Credential pools and their resolution per model.

pub mod pool;
pub mod resolver;

pub use pool::{mask_key, CredentialPool};
pub use resolver::{EnvSecrets, KeyPoolResolver, KeyStatus, SecretSource};
