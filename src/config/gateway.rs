//! Gateway Configuration
//!
//! Defines the configuration schema for the chat gateway, its credential
//! names and the per-model key mapping.

use crate::client::RetryPolicy;
use crate::error::{ChatError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL for the gateway API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Optional environment variable overriding the base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url_env: Option<String>,

    /// Sent as `HTTP-Referer` to identify the calling site
    #[serde(default = "default_referer")]
    pub referer: String,

    /// Sent as `X-Title`
    #[serde(default = "default_title")]
    pub title: String,

    /// Additional headers to send with chat requests
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Global credential names, in pool order
    #[serde(default)]
    pub default_keys_env: Vec<String>,

    /// Models keyed by gateway model id
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub request: RequestConfig,
}

/// A model known to the client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Display name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Dedicated credential names for this model, in pool order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_keys_env: Vec<String>,

    #[serde(default)]
    pub supports_vision: bool,
}

/// Retry and backoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound on a single delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Request defaults and HTTP timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_referer() -> String {
    "http://localhost".to_string()
}

fn default_title() -> String {
    "AI Chat Application".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            multiplier: default_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            base_url_env: None,
            referer: default_referer(),
            title: default_title(),
            headers: HashMap::new(),
            default_keys_env: Vec::new(),
            models: BTreeMap::new(),
            retry: RetryConfig::default(),
            request: RequestConfig::default(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.initial_backoff_ms),
            self.multiplier,
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

impl GatewayConfig {
    /// Get the effective base URL (from env var if configured, otherwise default)
    pub fn get_base_url(&self) -> String {
        if let Some(env_var) = &self.base_url_env {
            if let Ok(url) = std::env::var(env_var) {
                if !url.trim().is_empty() {
                    return url;
                }
            }
        }
        self.base_url.clone()
    }

    pub fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.get_base_url().trim_end_matches('/'))
    }

    pub fn models_url(&self) -> String {
        format!("{}/models", self.get_base_url().trim_end_matches('/'))
    }

    /// Model id → dedicated credential names
    pub fn model_key_names(&self) -> HashMap<String, Vec<String>> {
        self.models
            .iter()
            .filter(|(_, m)| !m.api_keys_env.is_empty())
            .map(|(id, m)| (id.clone(), m.api_keys_env.clone()))
            .collect()
    }

    /// Headers for a chat completion request made with `api_key`
    pub fn chat_headers(&self, api_key: &str) -> Result<HeaderMap> {
        let mut headers = bearer_headers(api_key)?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Ok(referer) = HeaderValue::from_str(&self.referer) {
            headers.insert(HeaderName::from_static("http-referer"), referer);
        }
        if let Ok(title) = HeaderValue::from_str(&self.title) {
            headers.insert(HeaderName::from_static("x-title"), title);
        }

        for (key, value) in &self.headers {
            if let (Ok(name), Ok(val)) = (
                HeaderName::try_from(key.as_str()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, val);
            }
        }

        Ok(headers)
    }
}

/// Authorization-only headers, used for the key probe
pub fn bearer_headers(api_key: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| ChatError::Config(format!("Invalid API key format: {}", e)))?,
    );
    Ok(headers)
}
