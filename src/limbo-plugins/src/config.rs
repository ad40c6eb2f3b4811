//! Plugin runtime configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{PluginError, Result};

/// Plugin runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Directory holding one sub-directory per installed plugin
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: PathBuf,

    /// Upper bound for a plugin's `activate` call (in milliseconds)
    #[serde(default = "default_activation_timeout_ms")]
    pub activation_timeout_ms: u64,

    /// Upper bound for a plugin's `deactivate` call (in milliseconds)
    #[serde(default = "default_deactivation_timeout_ms")]
    pub deactivation_timeout_ms: u64,

    /// Upper bound for a single hook invocation (in milliseconds)
    #[serde(default = "default_hook_timeout_ms")]
    pub hook_timeout_ms: u64,

    /// Fuel granted to a WASM plugin for each call into it
    #[serde(default = "default_fuel_per_call")]
    pub wasm_fuel_per_call: u64,

    /// Maximum linear memory per WASM plugin instance (in bytes)
    #[serde(default = "default_max_memory_bytes")]
    pub wasm_max_memory_bytes: usize,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            plugins_dir: default_plugins_dir(),
            activation_timeout_ms: default_activation_timeout_ms(),
            deactivation_timeout_ms: default_deactivation_timeout_ms(),
            hook_timeout_ms: default_hook_timeout_ms(),
            wasm_fuel_per_call: default_fuel_per_call(),
            wasm_max_memory_bytes: default_max_memory_bytes(),
        }
    }
}

impl PluginConfig {
    /// Create a configuration rooted at a custom plugins directory.
    pub fn with_plugins_dir(plugins_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| PluginError::ConfigError(format!("Failed to parse TOML: {}", e)))
    }

    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation_timeout_ms)
    }

    pub fn deactivation_timeout(&self) -> Duration {
        Duration::from_millis(self.deactivation_timeout_ms)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }
}

fn default_plugins_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("limbo").join("plugins"))
        .unwrap_or_else(|| PathBuf::from(".limbo").join("plugins"))
}

fn default_activation_timeout_ms() -> u64 {
    10_000
}

fn default_deactivation_timeout_ms() -> u64 {
    5_000
}

fn default_hook_timeout_ms() -> u64 {
    5_000
}

fn default_fuel_per_call() -> u64 {
    10_000_000
}

fn default_max_memory_bytes() -> usize {
    16 * 1024 * 1024 // 16 MB
}
