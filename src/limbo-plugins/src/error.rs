//! Plugin runtime error types.

use thiserror::Error;

/// Plugin runtime errors.
#[derive(Error, Debug)]
pub enum PluginError {
    /// Plugin not found.
    #[error("Plugin not found: {0}")]
    NotFound(String),

    /// A plugin with this id is already installed.
    #[error("Plugin is already installed: {0}")]
    AlreadyInstalled(String),

    /// A plugin with this id is already active.
    #[error("Plugin is already registered: {0}")]
    DuplicateRegistration(String),

    /// Plugin source could not be compiled, evaluated or lacks required exports.
    #[error("Failed to load plugin '{plugin}': {message}")]
    LoadError { plugin: String, message: String },

    /// The plugin's `activate` entry point failed or timed out.
    #[error("Failed to activate plugin '{plugin}': {message}")]
    ActivationError { plugin: String, message: String },

    /// A lifecycle hook failed.
    #[error("Hook '{hook}' failed in plugin '{plugin}': {message}")]
    HookError {
        plugin: String,
        hook: String,
        message: String,
    },

    /// The plugin's `deactivate` entry point failed.
    #[error("Failed to deactivate plugin '{plugin}': {message}")]
    DeactivationError { plugin: String, message: String },

    /// Invalid plugin manifest.
    #[error("Invalid manifest for plugin '{plugin}': {message}")]
    InvalidManifest { plugin: String, message: String },

    /// Permission denied.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid plugin state.
    #[error("Invalid plugin state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Plugin is disabled.
    #[error("Plugin is disabled: {0}")]
    Disabled(String),

    /// Persistence layer error.
    #[error("Plugin backend error: {0}")]
    Backend(String),

    /// Network error while fetching plugin files.
    #[error("Network error: {0}")]
    Network(String),

    /// WASM runtime error.
    #[error("WASM runtime error: {0}")]
    WasmError(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl PluginError {
    /// Create a load error.
    pub fn load_error(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LoadError {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Create an activation error.
    pub fn activation_error(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ActivationError {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Create a hook error.
    pub fn hook_error(
        plugin: impl Into<String>,
        hook: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::HookError {
            plugin: plugin.into(),
            hook: hook.into(),
            message: message.into(),
        }
    }

    /// Create a deactivation error.
    pub fn deactivation_error(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeactivationError {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Create an invalid manifest error.
    pub fn invalid_manifest(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// The plugin this error is attributed to, if any.
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::NotFound(id)
            | Self::AlreadyInstalled(id)
            | Self::DuplicateRegistration(id)
            | Self::Disabled(id) => Some(id),
            Self::LoadError { plugin, .. }
            | Self::ActivationError { plugin, .. }
            | Self::HookError { plugin, .. }
            | Self::DeactivationError { plugin, .. }
            | Self::InvalidManifest { plugin, .. } => Some(plugin),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for PluginError {
    fn from(err: toml::de::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<toml::ser::Error> for PluginError {
    fn from(err: toml::ser::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<wasmtime::Error> for PluginError {
    fn from(err: wasmtime::Error) -> Self {
        Self::WasmError(err.to_string())
    }
}

impl From<reqwest::Error> for PluginError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Result type alias for plugin operations.
pub type Result<T> = std::result::Result<T, PluginError>;
