//! Plugin manifest definitions.
//!
//! The manifest file (`plugin.toml`) describes a plugin: identity, entry
//! point, requested host permissions, declared hooks and its settings schema.
//!
//! ```toml
//! main = "plugin.wasm"
//! permissions = ["chats:read", "notifications"]
//! hooks = ["after_chat_created"]
//!
//! [plugin]
//! id = "weather"
//! name = "Weather"
//! version = "1.0.0"
//!
//! [[settings]]
//! id = "units"
//! label = "Units"
//! type = "select"
//! options = ["metric", "imperial"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path};

use crate::capability::NAMESPACE_SEPARATOR;
use crate::hooks::HookName;
use crate::settings::SettingDeclaration;
use crate::{PluginError, Result, WASM_FILE};

/// Plugin manifest - the immutable descriptor of an installed plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Entry point file, relative to the plugin directory
    #[serde(default = "default_main")]
    pub main: String,

    /// Host capabilities the plugin requests
    #[serde(default)]
    pub permissions: Vec<PluginPermission>,

    /// Hooks the plugin implements
    #[serde(default)]
    pub hooks: Vec<HookName>,

    /// Plugin metadata
    pub plugin: PluginMetadata,

    /// Settings schema, in display order
    #[serde(default)]
    pub settings: Vec<SettingDeclaration>,
}

fn default_main() -> String {
    WASM_FILE.to_string()
}

impl PluginManifest {
    /// Create a minimal manifest with the given id and name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            main: default_main(),
            permissions: Vec::new(),
            hooks: Vec::new(),
            plugin: PluginMetadata {
                id: id.into(),
                name: name.into(),
                version: "0.1.0".to_string(),
                description: String::new(),
                authors: Vec::new(),
                homepage: None,
                license: None,
            },
            settings: Vec::new(),
        }
    }

    /// Load manifest from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse manifest from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            PluginError::invalid_manifest("unknown", format!("Failed to parse TOML: {}", e))
        })
    }

    /// Serialize the manifest back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// The plugin id.
    pub fn id(&self) -> &str {
        &self.plugin.id
    }

    /// The display name.
    pub fn name(&self) -> &str {
        &self.plugin.name
    }

    /// Validate the manifest.
    pub fn validate(&self) -> Result<()> {
        let id = &self.plugin.id;

        if id.is_empty() {
            return Err(PluginError::invalid_manifest(id, "Plugin ID cannot be empty"));
        }

        // The separator must never appear in an id, otherwise namespaced
        // resource ids could not be split back into their owner.
        if id.contains(NAMESPACE_SEPARATOR)
            || !id
                .chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(PluginError::invalid_manifest(
                id,
                "Plugin ID can only contain alphanumeric characters, dots, hyphens, and underscores",
            ));
        }

        if self.plugin.name.trim().is_empty() {
            return Err(PluginError::invalid_manifest(id, "Plugin name cannot be empty"));
        }

        if semver::Version::parse(&self.plugin.version).is_err() {
            return Err(PluginError::invalid_manifest(
                id,
                format!("Invalid semver version: {}", self.plugin.version),
            ));
        }

        let mut components = Path::new(&self.main).components();
        let plain_file = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !plain_file {
            return Err(PluginError::invalid_manifest(
                id,
                format!("Entry point must be a plain file name: '{}'", self.main),
            ));
        }

        let mut seen = HashSet::new();
        for setting in &self.settings {
            if setting.id.is_empty() {
                return Err(PluginError::invalid_manifest(id, "Setting id cannot be empty"));
            }
            if !seen.insert(setting.id.as_str()) {
                return Err(PluginError::invalid_manifest(
                    id,
                    format!("Duplicate setting id: {}", setting.id),
                ));
            }
        }

        Ok(())
    }

    /// Check if the plugin requested a specific permission.
    pub fn has_permission(&self, perm: PluginPermission) -> bool {
        self.permissions.contains(&perm)
    }

    /// Check if the plugin declared a hook.
    pub fn declares_hook(&self, hook: HookName) -> bool {
        self.hooks.contains(&hook)
    }
}

/// Plugin metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique, stable plugin identifier (e.g. "weather")
    pub id: String,

    /// Human-readable plugin name
    pub name: String,

    /// Plugin version (semver)
    pub version: String,

    /// Plugin description
    #[serde(default)]
    pub description: String,

    /// Plugin author(s)
    #[serde(default)]
    pub authors: Vec<String>,

    /// Plugin homepage/repository URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    /// Plugin license
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

/// Host capabilities a plugin may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginPermission {
    /// Read chats and their messages
    #[serde(rename = "chats:read")]
    ReadChats,
    /// Modify chats (rename)
    #[serde(rename = "chats:write")]
    WriteChats,
    /// Show notifications
    #[serde(rename = "notifications")]
    Notifications,
}

impl std::fmt::Display for PluginPermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadChats => write!(f, "chats:read"),
            Self::WriteChats => write!(f, "chats:write"),
            Self::Notifications => write!(f, "notifications"),
        }
    }
}
