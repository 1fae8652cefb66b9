//! Key Pool Resolution
//!
//! Maps a model id to the credential values it should use: the model's
//! dedicated keys when any are set, otherwise the global pool.

use crate::config::GatewayConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Lookup from a credential name to its secret value
pub trait SecretSource: Send + Sync {
    fn secret(&self, name: &str) -> Option<String>;
}

/// Reads credentials from the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn secret(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl SecretSource for HashMap<String, String> {
    fn secret(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Whether a credential name currently resolves to a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStatus {
    pub name: String,
    pub available: bool,
}

/// Resolves credential pools for models
#[derive(Clone)]
pub struct KeyPoolResolver {
    /// Model id → dedicated credential names
    model_keys: HashMap<String, Vec<String>>,

    /// Global fallback credential names
    default_keys: Vec<String>,

    secrets: Arc<dyn SecretSource>,
}

impl KeyPoolResolver {
    pub fn new(
        model_keys: HashMap<String, Vec<String>>,
        default_keys: Vec<String>,
        secrets: Arc<dyn SecretSource>,
    ) -> Self {
        Self {
            model_keys,
            default_keys,
            secrets,
        }
    }

    pub fn from_config(config: &GatewayConfig, secrets: Arc<dyn SecretSource>) -> Self {
        Self::new(
            config.model_key_names(),
            config.default_keys_env.clone(),
            secrets,
        )
    }

    /// Resolve the key pool for `model`.
    ///
    /// Never fails: when neither the model's keys nor the global keys are set
    /// the result is empty and the client reports it at send time.
    pub fn resolve_pool(&self, model: &str) -> Vec<String> {
        if let Some(names) = self.model_keys.get(model) {
            let keys = self.lookup_all(names);
            if !keys.is_empty() {
                return keys;
            }
        }

        warn!(model, "no API keys configured for model, using default keys");
        self.default_pool()
    }

    /// Resolve the pool, letting a non-blank explicit key replace resolution
    pub fn resolve(&self, model: &str, explicit_key: Option<&str>) -> Vec<String> {
        match explicit_key {
            Some(key) if !key.trim().is_empty() => vec![key.to_string()],
            _ => self.resolve_pool(model),
        }
    }

    /// The global pool, in configured order
    pub fn default_pool(&self) -> Vec<String> {
        self.lookup_all(&self.default_keys)
    }

    /// Availability of every known credential name, global names first
    pub fn key_status(&self) -> Vec<KeyStatus> {
        let mut names: Vec<&String> = self.default_keys.iter().collect();

        let mut models: Vec<_> = self.model_keys.iter().collect();
        models.sort_by(|a, b| a.0.cmp(b.0));
        for (_, model_names) in models {
            for name in model_names {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }

        names
            .into_iter()
            .map(|name| KeyStatus {
                name: name.clone(),
                available: self.lookup(name).is_some(),
            })
            .collect()
    }

    /// Whether at least one credential is set
    pub fn has_any_keys(&self) -> bool {
        self.key_status().iter().any(|s| s.available)
    }

    fn lookup_all(&self, names: &[String]) -> Vec<String> {
        names.iter().filter_map(|name| self.lookup(name)).collect()
    }

    fn lookup(&self, name: &str) -> Option<String> {
        self.secrets
            .secret(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}
