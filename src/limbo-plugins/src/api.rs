//! Host-facing interfaces of the plugin runtime.
//!
//! - [`PluginApiBridge`] is implemented by the host and gives plugins access
//!   to chat data and notifications.
//! - [`PluginApi`] is the per-plugin view of that bridge; every call is
//!   checked against the permissions the plugin's manifest requested.
//! - [`HostBridge`] receives failure reports from the runtime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::manifest::{PluginManifest, PluginPermission};
use crate::{PluginError, Result};

/// A chat as stored by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Query for [`PluginApiBridge::get_chat_messages`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetChatMessagesOptions {
    pub chat_id: String,

    /// Maximum number of messages to return (newest last)
    #[serde(default)]
    pub limit: Option<usize>,

    /// Only return messages created strictly after this instant
    #[serde(default)]
    pub after: Option<DateTime<Utc>>,
}

/// Notification severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// A user-visible notification requested by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub level: NotificationLevel,
}

/// Host functionality plugins may call back into.
#[async_trait]
pub trait PluginApiBridge: Send + Sync {
    /// Fetch a chat by id.
    async fn get_chat(&self, chat_id: &str) -> Result<Chat>;

    /// Fetch messages of a chat.
    async fn get_chat_messages(&self, opts: GetChatMessagesOptions) -> Result<Vec<ChatMessage>>;

    /// Rename a chat.
    async fn rename_chat(&self, chat_id: &str, name: &str) -> Result<()>;

    /// Show a notification to the user.
    async fn show_notification(&self, notification: Notification) -> Result<()>;
}

/// Failure reports from the runtime to the host.
pub trait HostBridge: Send + Sync {
    /// A plugin could not be loaded or activated.
    fn on_activate_plugin_error(&self, plugin_id: &str, error_message: &str);

    /// A hook or deactivation failed. Never fatal.
    fn on_plugin_error(&self, _plugin_id: &str, _error: &PluginError) {}
}

/// Host bridge that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHostBridge;

impl HostBridge for LoggingHostBridge {
    fn on_activate_plugin_error(&self, plugin_id: &str, error_message: &str) {
        tracing::error!(plugin_id, error = error_message, "Plugin failed to activate");
    }

    fn on_plugin_error(&self, plugin_id: &str, error: &PluginError) {
        tracing::warn!(plugin_id, error = %error, "Plugin error");
    }
}

/// API bridge for hosts without chat storage: reads fail, writes are logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedApiBridge;

#[async_trait]
impl PluginApiBridge for DetachedApiBridge {
    async fn get_chat(&self, chat_id: &str) -> Result<Chat> {
        Err(PluginError::NotFound(format!("chat {}", chat_id)))
    }

    async fn get_chat_messages(&self, opts: GetChatMessagesOptions) -> Result<Vec<ChatMessage>> {
        Err(PluginError::NotFound(format!("chat {}", opts.chat_id)))
    }

    async fn rename_chat(&self, chat_id: &str, name: &str) -> Result<()> {
        tracing::info!(chat_id, name, "rename_chat requested without a chat store");
        Ok(())
    }

    async fn show_notification(&self, notification: Notification) -> Result<()> {
        tracing::info!(
            title = %notification.title,
            message = notification.message.as_deref().unwrap_or(""),
            "Plugin notification"
        );
        Ok(())
    }
}

/// Permission-scoped view of the host API for one plugin.
#[derive(Clone)]
pub struct PluginApi {
    plugin_id: String,
    permissions: Vec<PluginPermission>,
    bridge: Arc<dyn PluginApiBridge>,
}

impl PluginApi {
    /// Create the API view for a plugin from its manifest.
    pub fn new(manifest: &PluginManifest, bridge: Arc<dyn PluginApiBridge>) -> Self {
        Self {
            plugin_id: manifest.id().to_string(),
            permissions: manifest.permissions.clone(),
            bridge,
        }
    }

    fn require(&self, permission: PluginPermission) -> Result<()> {
        if self.permissions.contains(&permission) {
            Ok(())
        } else {
            tracing::warn!(
                plugin_id = %self.plugin_id,
                permission = %permission,
                "Blocked host API call without permission"
            );
            Err(PluginError::PermissionDenied(format!(
                "plugin '{}' did not request '{}'",
                self.plugin_id, permission
            )))
        }
    }

    pub async fn get_chat(&self, chat_id: &str) -> Result<Chat> {
        self.require(PluginPermission::ReadChats)?;
        self.bridge.get_chat(chat_id).await
    }

    pub async fn get_chat_messages(&self, opts: GetChatMessagesOptions) -> Result<Vec<ChatMessage>> {
        self.require(PluginPermission::ReadChats)?;
        self.bridge.get_chat_messages(opts).await
    }

    pub async fn rename_chat(&self, chat_id: &str, name: &str) -> Result<()> {
        self.require(PluginPermission::WriteChats)?;
        self.bridge.rename_chat(chat_id, name).await
    }

    pub async fn show_notification(&self, notification: Notification) -> Result<()> {
        self.require(PluginPermission::Notifications)?;
        self.bridge.show_notification(notification).await
    }
}

impl std::fmt::Debug for PluginApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginApi")
            .field("plugin_id", &self.plugin_id)
            .field("permissions", &self.permissions)
            .finish()
    }
}
