//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use limbo_plugins::{
    AfterChatCreatedOptions, Chat, ChatMessage, GetChatMessagesOptions, HookName, HostBridge,
    InMemoryPluginBackend, InstallSource, Llm, NativeModuleLoader, Notification, PluginApiBridge,
    PluginBackend, PluginConfig, PluginContext, PluginError, PluginEvent, PluginManager,
    PluginManifest, PluginModule, PluginSystem,
};

/// What a scripted entry point does when called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Outcome {
    #[default]
    Succeed,
    Fail,
    Hang,
}

impl Outcome {
    async fn run(self, what: &str) -> anyhow::Result<()> {
        match self {
            Outcome::Succeed => Ok(()),
            Outcome::Fail => anyhow::bail!("{what} exploded"),
            Outcome::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}

/// Ordered record of calls into scripted modules, shared across plugins.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// A native plugin whose behavior is fixed up front.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub activate: Outcome,
    pub deactivate: Outcome,
    pub hook: Outcome,
    pub llms: Vec<Llm>,
}

impl Script {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failing_activate() -> Self {
        Self {
            activate: Outcome::Fail,
            ..Self::default()
        }
    }

    pub fn with_llm(mut self, id: &str, name: &str) -> Self {
        self.llms.push(Llm::new(id, name));
        self
    }
}

pub struct ScriptedModule {
    id: String,
    script: Script,
    log: CallLog,
    context: Mutex<Option<Arc<PluginContext>>>,
}

#[async_trait]
impl PluginModule for ScriptedModule {
    async fn activate(&self, context: Arc<PluginContext>) -> anyhow::Result<()> {
        self.log.lock().push(format!("{}:activate", self.id));
        for llm in &self.script.llms {
            context.register_llm(llm.clone())?;
        }
        *self.context.lock() = Some(context);
        self.script.activate.run("activate").await
    }

    async fn deactivate(&self) -> anyhow::Result<()> {
        self.log.lock().push(format!("{}:deactivate", self.id));
        self.script.deactivate.run("deactivate").await
    }

    async fn on_after_chat_created(&self, opts: &AfterChatCreatedOptions) -> anyhow::Result<()> {
        self.log
            .lock()
            .push(format!("{}:after_chat_created:{}", self.id, opts.chat_id));
        self.script.hook.run("hook").await
    }
}

/// Host bridge that records every report.
#[derive(Default)]
pub struct RecordingHost {
    pub activation_errors: Mutex<Vec<(String, String)>>,
    pub plugin_errors: Mutex<Vec<(String, String)>>,
}

impl RecordingHost {
    pub fn activation_error_ids(&self) -> Vec<String> {
        self.activation_errors
            .lock()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn plugin_error_messages(&self) -> Vec<String> {
        self.plugin_errors
            .lock()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl HostBridge for RecordingHost {
    fn on_activate_plugin_error(&self, plugin_id: &str, error_message: &str) {
        self.activation_errors
            .lock()
            .push((plugin_id.to_string(), error_message.to_string()));
    }

    fn on_plugin_error(&self, plugin_id: &str, error: &PluginError) {
        self.plugin_errors
            .lock()
            .push((plugin_id.to_string(), error.to_string()));
    }
}

/// Chat store that records writes.
#[derive(Default)]
pub struct RecordingChats {
    pub renamed: Mutex<Vec<(String, String)>>,
    pub notifications: Mutex<Vec<Notification>>,
}

#[async_trait]
impl PluginApiBridge for RecordingChats {
    async fn get_chat(&self, chat_id: &str) -> limbo_plugins::Result<Chat> {
        Ok(Chat {
            id: chat_id.to_string(),
            name: "New chat".to_string(),
            created_at: Utc::now(),
        })
    }

    async fn get_chat_messages(
        &self,
        _opts: GetChatMessagesOptions,
    ) -> limbo_plugins::Result<Vec<ChatMessage>> {
        Ok(Vec::new())
    }

    async fn rename_chat(&self, chat_id: &str, name: &str) -> limbo_plugins::Result<()> {
        self.renamed
            .lock()
            .push((chat_id.to_string(), name.to_string()));
        Ok(())
    }

    async fn show_notification(&self, notification: Notification) -> limbo_plugins::Result<()> {
        self.notifications.lock().push(notification);
        Ok(())
    }
}

/// Short timeouts so hang tests finish quickly.
pub fn test_config() -> PluginConfig {
    PluginConfig {
        activation_timeout_ms: 200,
        deactivation_timeout_ms: 200,
        hook_timeout_ms: 200,
        ..PluginConfig::default()
    }
}

/// A plugin system over an in-memory backend and scripted native modules.
pub struct Harness {
    pub backend: Arc<InMemoryPluginBackend>,
    pub loader: Arc<NativeModuleLoader>,
    pub host: Arc<RecordingHost>,
    pub chats: Arc<RecordingChats>,
    pub log: CallLog,
    pub system: PluginSystem,
}

impl Harness {
    pub fn new() -> Self {
        let backend = Arc::new(InMemoryPluginBackend::new());
        let loader = Arc::new(NativeModuleLoader::new());
        let host = Arc::new(RecordingHost::default());
        let chats = Arc::new(RecordingChats::default());

        let system = PluginSystem::new(test_config(), backend.clone(), loader.clone())
            .with_host_bridge(host.clone())
            .with_api_bridge(chats.clone());

        Self {
            backend,
            loader,
            host,
            chats,
            log: CallLog::default(),
            system,
        }
    }

    pub fn manager(&self) -> &Arc<PluginManager> {
        self.system.manager()
    }

    /// Register (or replace) the native module for `id`.
    pub fn register_module(&self, id: &str, script: Script) {
        let log = self.log.clone();
        let module_id = id.to_string();
        self.loader.register(id, move || {
            Ok(Box::new(ScriptedModule {
                id: module_id.clone(),
                script: script.clone(),
                log: log.clone(),
                context: Mutex::new(None),
            }))
        });
    }

    /// Register the module behind `manifest` and install it (disabled).
    pub async fn install(&self, manifest: PluginManifest, script: Script) {
        self.register_module(manifest.id(), script);

        self.backend
            .install(InstallSource::Inline {
                manifest,
                source: Vec::new(),
            })
            .await
            .unwrap();
    }

    /// Install and enable a plugin with a default manifest.
    pub async fn install_enabled(&self, id: &str, script: Script) {
        self.install(hooked_manifest(id), script).await;
        self.backend.enable_plugin(id).await.unwrap();
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

/// A manifest that declares the after-chat-created hook.
pub fn hooked_manifest(id: &str) -> PluginManifest {
    let mut manifest = PluginManifest::new(id, id);
    manifest.hooks.push(HookName::AfterChatCreated);
    manifest
}

/// Record every event of a manager.
pub fn record_events(manager: &PluginManager) -> Arc<Mutex<Vec<PluginEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    manager
        .events()
        .subscribe(move |event| sink.lock().push(event.clone()));
    seen
}

pub fn added(id: &str) -> PluginEvent {
    PluginEvent::Added {
        plugin_id: id.to_string(),
    }
}

pub fn removed(id: &str) -> PluginEvent {
    PluginEvent::Removed {
        plugin_id: id.to_string(),
    }
}

pub fn state_changed(id: &str) -> PluginEvent {
    PluginEvent::StateChanged {
        plugin_id: id.to_string(),
    }
}
