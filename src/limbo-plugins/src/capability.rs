//! Capabilities plugins register into the host.
//!
//! Resources declared by different plugins may share a local id (two
//! plugins can both call their model `"gpt4"`), so host-side tables key them
//! by a namespaced id built from the owning plugin id and the local id.

use serde::{Deserialize, Serialize};

/// Separator between the plugin id and the resource id.
///
/// Plugin ids are validated to never contain it.
pub const NAMESPACE_SEPARATOR: char = ':';

/// Build the collision-free host key for a plugin-local resource id.
pub fn build_namespaced_resource_id(plugin_id: &str, resource_id: &str) -> String {
    format!("{plugin_id}{NAMESPACE_SEPARATOR}{resource_id}")
}

/// Split a namespaced id into `(plugin_id, resource_id)`.
pub fn parse_namespaced_resource_id(namespaced_id: &str) -> Option<(&str, &str)> {
    namespaced_id.split_once(NAMESPACE_SEPARATOR)
}

/// Extract the owning plugin id from a namespaced id.
pub fn extract_plugin_id(namespaced_id: &str) -> Option<&str> {
    parse_namespaced_resource_id(namespaced_id).map(|(plugin_id, _)| plugin_id)
}

/// An LLM provider registered by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Llm {
    /// Plugin-local id (e.g. "gpt4")
    pub id: String,

    /// Display name
    pub name: String,

    /// Short description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Free-form capability flags (e.g. "tools", "vision")
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Llm {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            capabilities: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// An LLM as seen by the host: the capability plus a back-reference to its owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisteredLlm {
    /// Namespaced id (`plugin_id:llm_id`)
    pub id: String,

    /// Owning plugin
    pub plugin_id: String,

    pub llm: Llm,
}
