//! Plugin system - lifecycle orchestration.
//!
//! [`PluginSystem`] drives each plugin through
//! `Unloaded -> Loading -> Activating -> Active -> Deactivating -> Unloaded`
//! (or `Failed` from `Loading`/`Activating`), keeps the backend and the
//! [`PluginManager`] consistent, and isolates failures so one plugin can
//! never break another.
//!
//! Lifecycle operations on the same plugin id are serialized through a
//! per-id gate; operations on different ids run concurrently.

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{DetachedApiBridge, HostBridge, LoggingHostBridge, PluginApiBridge};
use crate::backend::{InstallSource, PluginBackend, PluginRecord};
use crate::config::PluginConfig;
use crate::context::PluginContext;
use crate::events::{ContextEvent, Subscription};
use crate::hooks::{AfterChatCreatedOptions, HookName};
use crate::loader::ModuleLoader;
use crate::manager::PluginManager;
use crate::manifest::PluginManifest;
use crate::plugin::{ActivePlugin, PluginState, PluginStatus};
use crate::settings::SettingsMap;
use crate::{PluginError, Result};

type Gate = Arc<tokio::sync::Mutex<()>>;

/// Outcome of [`PluginSystem::load_all_plugins`].
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Plugins that are now active, in backend order
    pub loaded: Vec<String>,

    /// Plugins that failed to load or activate
    pub failed: Vec<(String, PluginError)>,

    /// Disabled or already active plugins that were not touched
    pub skipped: Vec<String>,
}

impl LoadReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Orchestrates plugin lifecycles on top of a backend, a module loader and
/// a manager.
pub struct PluginSystem {
    config: PluginConfig,
    manager: Arc<PluginManager>,
    backend: Arc<dyn PluginBackend>,
    loader: Arc<dyn ModuleLoader>,
    host: Arc<dyn HostBridge>,
    api_bridge: Arc<dyn PluginApiBridge>,

    /// Per-id operation gates
    gates: Mutex<HashMap<String, Gate>>,

    /// Lifecycle state of every plugin the system has touched
    statuses: RwLock<HashMap<String, PluginStatus>>,

    /// Context -> manager `state:changed` forwarders of active plugins
    forwarders: Mutex<HashMap<String, Subscription<ContextEvent>>>,
}

impl PluginSystem {
    /// Create a plugin system with a fresh manager, a logging host bridge
    /// and no chat store.
    pub fn new(
        config: PluginConfig,
        backend: Arc<dyn PluginBackend>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        Self {
            config,
            manager: Arc::new(PluginManager::new()),
            backend,
            loader,
            host: Arc::new(LoggingHostBridge),
            api_bridge: Arc::new(DetachedApiBridge),
            gates: Mutex::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
            forwarders: Mutex::new(HashMap::new()),
        }
    }

    /// Use an existing manager, e.g. one the host UI already subscribed to.
    pub fn with_manager(mut self, manager: Arc<PluginManager>) -> Self {
        self.manager = manager;
        self
    }

    /// Receive load and plugin failure reports.
    pub fn with_host_bridge(mut self, host: Arc<dyn HostBridge>) -> Self {
        self.host = host;
        self
    }

    /// Back the plugin API with the host's chat store.
    pub fn with_api_bridge(mut self, bridge: Arc<dyn PluginApiBridge>) -> Self {
        self.api_bridge = bridge;
        self
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    pub fn backend(&self) -> &Arc<dyn PluginBackend> {
        &self.backend
    }

    // ========== State ==========

    /// Current lifecycle state. Unknown plugins are `Unloaded`.
    pub fn plugin_state(&self, id: &str) -> PluginState {
        self.plugin_status(id).state
    }

    /// Current lifecycle state plus the last failure message.
    pub fn plugin_status(&self, id: &str) -> PluginStatus {
        self.statuses.read().get(id).cloned().unwrap_or_default()
    }

    fn set_state(&self, id: &str, state: PluginState) {
        self.set_status(id, state, None);
    }

    fn set_status(&self, id: &str, state: PluginState, error: Option<String>) {
        tracing::trace!(plugin_id = id, %state, "Plugin state transition");
        self.statuses.write().insert(
            id.to_string(),
            PluginStatus {
                state,
                error,
                updated_at: Some(chrono::Utc::now()),
            },
        );
    }

    fn gate(&self, id: &str) -> Gate {
        self.gates
            .lock()
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    // ========== Load / unload ==========

    /// Load and activate a single plugin.
    ///
    /// Fails with [`PluginError::Disabled`] for disabled records and
    /// [`PluginError::DuplicateRegistration`] if the plugin is already
    /// active. Load and activation failures are also reported through
    /// [`HostBridge::on_activate_plugin_error`].
    pub async fn load_plugin(&self, record: &PluginRecord) -> Result<()> {
        let gate = self.gate(record.id());
        let _guard = gate.lock().await;
        self.load_locked(record).await
    }

    async fn load_locked(&self, record: &PluginRecord) -> Result<()> {
        let id = record.id();

        if !record.is_enabled() {
            return Err(PluginError::Disabled(id.to_string()));
        }
        if self.manager.is_active(id) {
            return Err(PluginError::DuplicateRegistration(id.to_string()));
        }

        self.set_state(id, PluginState::Loading);

        match self.activate(record).await {
            Ok(()) => {
                self.set_state(id, PluginState::Active);
                tracing::info!(plugin_id = id, "Plugin loaded");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(plugin_id = id, error = %message, "Failed to load plugin");
                self.set_status(id, PluginState::Failed, Some(message.clone()));
                self.host.on_activate_plugin_error(id, &message);
                Err(e)
            }
        }
    }

    async fn activate(&self, record: &PluginRecord) -> Result<()> {
        let id = record.id();
        record.manifest.validate()?;

        let manifest = Arc::new(record.manifest.clone());
        let context = Arc::new(PluginContext::new(
            manifest.clone(),
            record.data.settings.clone(),
            self.api_bridge.clone(),
        ));

        let source = self.backend.read_plugin_source(id).await.map_err(|e| match e {
            PluginError::LoadError { .. } => e,
            other => PluginError::load_error(id, other.to_string()),
        })?;
        let module = self.loader.load(&manifest, &source).await?;

        self.set_state(id, PluginState::Activating);
        let activated = run_with_timeout(
            self.config.activation_timeout(),
            module.activate(context.clone()),
        )
        .await;
        if let Err(message) = activated {
            context.close();
            return Err(PluginError::activation_error(id, message));
        }

        let manager = Arc::downgrade(&self.manager);
        let forwarder = context.events().subscribe(move |event| {
            let ContextEvent::StateChanged { plugin_id } = event;
            if let Some(manager) = manager.upgrade() {
                manager.notify_state_changed(plugin_id);
            }
        });

        match self
            .manager
            .register_plugin(ActivePlugin::new(manifest, context.clone(), module))
        {
            Ok(_) => {
                self.forwarders.lock().insert(id.to_string(), forwarder);
                Ok(())
            }
            Err(e) => {
                forwarder.unsubscribe();
                context.close();
                Err(e)
            }
        }
    }

    /// Deactivate and unregister a plugin. No-op if it is not active.
    ///
    /// Always completes: deactivation failures are logged and reported
    /// through [`HostBridge::on_plugin_error`], never returned.
    pub async fn unload_plugin(&self, id: &str) -> Result<()> {
        let gate = self.gate(id);
        let _guard = gate.lock().await;
        self.unload_locked(id).await;
        Ok(())
    }

    async fn unload_locked(&self, id: &str) {
        let Some(plugin) = self.manager.get_plugin(id) else {
            tracing::debug!(plugin_id = id, "Plugin not active, nothing to unload");
            return;
        };

        self.set_state(id, PluginState::Deactivating);

        let deactivated =
            run_with_timeout(self.config.deactivation_timeout(), plugin.module.deactivate()).await;
        if let Err(message) = deactivated {
            let error = PluginError::deactivation_error(id, message);
            tracing::warn!(plugin_id = id, error = %error, "Plugin deactivation failed");
            self.host.on_plugin_error(id, &error);
        }

        let forwarder = self.forwarders.lock().remove(id);
        if let Some(forwarder) = forwarder {
            forwarder.unsubscribe();
        }
        plugin.context.close();
        self.manager.unregister_plugin(id);

        self.set_state(id, PluginState::Unloaded);
        tracing::info!(plugin_id = id, "Plugin unloaded");
    }

    /// Re-read the record from the backend and unload + load the plugin
    /// without letting another operation on the same id interleave.
    pub async fn reload_plugin(&self, id: &str) -> Result<()> {
        let gate = self.gate(id);
        let _guard = gate.lock().await;

        let record = self.backend.get_plugin(id).await?;
        self.unload_locked(id).await;
        self.load_locked(&record).await
    }

    /// Load every enabled plugin concurrently and wait for all of them.
    ///
    /// Individual failures end up in the report, never in the returned
    /// error; only a failure to list the installed plugins is returned.
    pub async fn load_all_plugins(&self) -> Result<LoadReport> {
        let records = self.backend.get_all_plugins().await?;
        let mut report = LoadReport::default();

        let mut pending = Vec::new();
        for record in &records {
            if !record.is_enabled() || self.manager.is_active(record.id()) {
                report.skipped.push(record.id().to_string());
            } else {
                pending.push(record);
            }
        }

        let results = join_all(pending.into_iter().map(|record| async move {
            (record.id().to_string(), self.load_plugin(record).await)
        }))
        .await;

        for (id, result) in results {
            match result {
                Ok(()) => report.loaded.push(id),
                // Another operation on the same id activated it first
                Err(PluginError::DuplicateRegistration(_)) => report.skipped.push(id),
                Err(e) => report.failed.push((id, e)),
            }
        }

        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Loaded plugins"
        );
        Ok(report)
    }

    /// Unload every active plugin, most recently registered first.
    pub async fn unload_all(&self) {
        let mut plugins = self.manager.get_plugins();
        plugins.reverse();

        for plugin in plugins {
            // unload_plugin never fails
            let _ = self.unload_plugin(plugin.id()).await;
        }
    }

    // ========== Hooks ==========

    /// Run the after-chat-created hook of every active plugin that declares
    /// it, in registration order. Failures are reported, never returned.
    pub async fn execute_on_after_chat_created_hooks(&self, opts: &AfterChatCreatedOptions) {
        let hook = HookName::AfterChatCreated;

        for plugin in self.manager.get_plugins() {
            if !plugin.manifest.declares_hook(hook) {
                continue;
            }

            let id = plugin.id();
            let result = run_with_timeout(
                self.config.hook_timeout(),
                plugin.module.on_after_chat_created(opts),
            )
            .await;

            if let Err(message) = result {
                let error = PluginError::hook_error(id, hook.as_str(), message);
                tracing::warn!(plugin_id = id, hook = %hook, error = %error, "Plugin hook failed");
                self.host.on_plugin_error(id, &error);
            }
        }
    }

    // ========== Host operations ==========

    /// Install a plugin. It starts disabled.
    pub async fn install_plugin(&self, source: InstallSource) -> Result<PluginManifest> {
        self.backend.install(source).await
    }

    /// Persist the enabled flag, then load the plugin.
    pub async fn enable_plugin(&self, id: &str) -> Result<()> {
        let gate = self.gate(id);
        let _guard = gate.lock().await;

        self.backend.enable_plugin(id).await?;
        let record = self.backend.get_plugin(id).await?;
        if self.manager.is_active(id) {
            return Ok(());
        }
        self.load_locked(&record).await
    }

    /// Unload the plugin, then persist the disabled flag.
    pub async fn disable_plugin(&self, id: &str) -> Result<()> {
        let gate = self.gate(id);
        let _guard = gate.lock().await;

        self.unload_locked(id).await;
        self.backend.disable_plugin(id).await
    }

    /// Persist settings, then refresh the live context cache if the plugin
    /// is active.
    pub async fn update_plugin_settings(&self, id: &str, settings: SettingsMap) -> Result<()> {
        let gate = self.gate(id);
        let _guard = gate.lock().await;

        self.backend
            .update_plugin_settings(id, settings.clone())
            .await?;

        if let Some(plugin) = self.manager.get_plugin(id) {
            for (key, value) in settings {
                plugin.context.set_cached_setting_value(key, value);
            }
        }
        Ok(())
    }

    /// Unload the plugin, then remove it from the backend.
    pub async fn uninstall_plugin(&self, id: &str) -> Result<()> {
        let gate = self.gate(id);
        let _guard = gate.lock().await;

        self.unload_locked(id).await;
        self.backend.uninstall_plugin(id).await?;
        self.statuses.write().remove(id);
        tracing::info!(plugin_id = id, "Plugin uninstalled");
        Ok(())
    }
}

impl std::fmt::Debug for PluginSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSystem")
            .field("config", &self.config)
            .field("manager", &self.manager)
            .finish()
    }
}

/// Await plugin code under a deadline, flattening both failure modes into
/// a message.
async fn run_with_timeout<F>(limit: Duration, fut: F) -> std::result::Result<(), String>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(_) => Err(format!("timed out after {}ms", limit.as_millis())),
    }
}
