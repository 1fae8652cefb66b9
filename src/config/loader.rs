//! Configuration Loader
//!
//! Loads the built-in gateway defaults and merges user configuration files
//! over them.

use crate::config::gateway::GatewayConfig;
use crate::error::{ChatError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    merged: Value,
    config: GatewayConfig,
}

impl ConfigLoader {
    /// Create a new config loader and load from default locations
    pub fn new() -> Result<Self> {
        let mut loader = Self::builtin()?;

        for path in Self::get_config_paths() {
            if path.exists() {
                loader.load_from_file(&path)?;
            }
        }

        Ok(loader)
    }

    /// Create a loader with a specific config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut loader = Self::builtin()?;
        loader.load_from_file(path)?;
        Ok(loader)
    }

    /// Loader holding only the built-in defaults
    pub fn builtin() -> Result<Self> {
        let defaults = include_str!("../../gateway.json");
        let merged: Value = serde_json::from_str(defaults).map_err(|e| {
            ChatError::Config(format!("Failed to parse built-in gateway.json: {}", e))
        })?;
        let config = Self::decode(&merged, "built-in gateway.json")?;

        Ok(Self { merged, config })
    }

    /// Get list of config paths to check
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // 1. Environment variable
        if let Ok(custom_path) = std::env::var("ORCHAT_CONFIG_PATH") {
            paths.push(PathBuf::from(custom_path));
        }

        // 2. Current directory
        paths.push(PathBuf::from("orchat.json"));

        // 3. User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("orchat").join("config.json"));
        }

        // 4. Home directory
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".orchat").join("config.json"));
        }

        paths
    }

    /// Load configuration from a specific file
    fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChatError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let overlay: Value = serde_json::from_str(&content).map_err(|e| {
            ChatError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        self.merge_config(overlay, &path.display().to_string())?;
        tracing::debug!(path = %path.display(), "loaded gateway config");
        Ok(())
    }

    /// Merge another config into this one (later configs override earlier)
    fn merge_config(&mut self, overlay: Value, origin: &str) -> Result<()> {
        let mut merged = self.merged.clone();
        merge_json(&mut merged, overlay);
        self.config = Self::decode(&merged, origin)?;
        self.merged = merged;
        Ok(())
    }

    fn decode(value: &Value, origin: &str) -> Result<GatewayConfig> {
        serde_json::from_value(value.clone())
            .map_err(|e| ChatError::Config(format!("Invalid config from {}: {}", origin, e)))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Take ownership of the configuration
    pub fn into_config(self) -> GatewayConfig {
        self.config
    }
}

/// Deep-merge `overlay` into `base`. Objects merge key by key, anything else
/// replaces the base value.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
