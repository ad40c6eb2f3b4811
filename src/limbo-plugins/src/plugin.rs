//! Core plugin types and traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::context::PluginContext;
use crate::hooks::AfterChatCreatedOptions;
use crate::manifest::PluginManifest;

/// Executable plugin code produced by a [`ModuleLoader`](crate::ModuleLoader).
///
/// Plugin code reports failures with `anyhow`; the runtime wraps them into
/// the matching [`PluginError`](crate::PluginError) variant.
#[async_trait]
pub trait PluginModule: Send + Sync {
    /// Entry point. Receives the plugin's capability-scoped context.
    async fn activate(&self, context: Arc<PluginContext>) -> anyhow::Result<()>;

    /// Optional exit point, called once before the plugin is unregistered.
    async fn deactivate(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after the host created a new chat.
    async fn on_after_chat_created(&self, _opts: &AfterChatCreatedOptions) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A successfully loaded and activated plugin.
pub struct ActivePlugin {
    pub manifest: Arc<PluginManifest>,
    pub context: Arc<PluginContext>,
    pub module: Box<dyn PluginModule>,
}

impl ActivePlugin {
    pub fn new(
        manifest: Arc<PluginManifest>,
        context: Arc<PluginContext>,
        module: Box<dyn PluginModule>,
    ) -> Self {
        Self {
            manifest,
            context,
            module,
        }
    }

    pub fn id(&self) -> &str {
        self.manifest.id()
    }
}

impl std::fmt::Debug for ActivePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivePlugin")
            .field("id", &self.id())
            .field("context", &self.context)
            .finish()
    }
}

/// Lifecycle state of a plugin inside the plugin system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Not running
    #[default]
    Unloaded,
    /// Source is being fetched and evaluated
    Loading,
    /// `activate` is running
    Activating,
    /// Registered with the manager
    Active,
    /// `deactivate` is running
    Deactivating,
    /// Last load attempt failed; terminal until the next load
    Failed,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unloaded => write!(f, "unloaded"),
            Self::Loading => write!(f, "loading"),
            Self::Activating => write!(f, "activating"),
            Self::Active => write!(f, "active"),
            Self::Deactivating => write!(f, "deactivating"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Lifecycle state plus the last failure, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginStatus {
    pub state: PluginState,

    /// Error message of the last failed load
    pub error: Option<String>,

    /// When the state last changed
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_state_display() {
        assert_eq!(PluginState::Active.to_string(), "active");
        assert_eq!(PluginState::Failed.to_string(), "failed");
        assert_eq!(PluginState::default(), PluginState::Unloaded);
    }

    #[test]
    fn test_plugin_status_default() {
        let status = PluginStatus::default();
        assert_eq!(status.state, PluginState::Unloaded);
        assert!(status.error.is_none());
    }
}
