//! Hook names and payloads.
//!
//! Hooks are named extension points the host invokes at defined moments.
//! Plugins implement them on their [`PluginModule`](crate::PluginModule) and
//! list them in the manifest.

use serde::{Deserialize, Serialize};

/// Hooks supported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookName {
    /// A chat was created and its first exchange completed
    AfterChatCreated,
}

impl HookName {
    /// Name used in logs, errors and the WASM export table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AfterChatCreated => "on_after_chat_created",
        }
    }
}

impl std::fmt::Display for HookName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for the after-chat-created hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AfterChatCreatedOptions {
    /// The newly created chat
    pub chat_id: String,
}

impl AfterChatCreatedOptions {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
        }
    }
}
