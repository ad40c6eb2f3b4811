//! Per-plugin context.
//!
//! A [`PluginContext`] is the only handle plugin code and the host use to
//! touch a running plugin's state. Every mutation goes through a method here
//! and emits [`ContextEvent::StateChanged`] on the context's own channel.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::api::{PluginApi, PluginApiBridge};
use crate::capability::Llm;
use crate::events::{ContextEvent, EventEmitter};
use crate::manifest::PluginManifest;
use crate::settings::{Setting, SettingsMap, resolve_settings};
use crate::{PluginError, Result};

#[derive(Debug, Default)]
struct ContextState {
    /// Cached persisted setting values
    settings: SettingsMap,

    /// LLMs keyed by plugin-local id, in registration order
    llms: IndexMap<String, Llm>,
}

/// Capability surface of a single plugin.
pub struct PluginContext {
    manifest: Arc<PluginManifest>,
    state: RwLock<ContextState>,
    events: EventEmitter<ContextEvent>,
    api: PluginApi,
    closed: AtomicBool,
}

impl PluginContext {
    /// Create a context bound to a manifest and its persisted settings.
    pub fn new(
        manifest: Arc<PluginManifest>,
        settings: SettingsMap,
        bridge: Arc<dyn PluginApiBridge>,
    ) -> Self {
        let api = PluginApi::new(&manifest, bridge);

        Self {
            manifest,
            state: RwLock::new(ContextState {
                settings,
                llms: IndexMap::new(),
            }),
            events: EventEmitter::new(),
            api,
            closed: AtomicBool::new(false),
        }
    }

    pub fn plugin_id(&self) -> &str {
        self.manifest.id()
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// Host API, scoped to the permissions in the manifest.
    pub fn api(&self) -> &PluginApi {
        &self.api
    }

    /// The context-scoped `state:changed` channel.
    pub fn events(&self) -> &EventEmitter<ContextEvent> {
        &self.events
    }

    // ========== Settings ==========

    /// Current effective settings, in declaration order.
    pub fn get_settings(&self) -> Vec<Setting> {
        let state = self.state.read();
        resolve_settings(&self.manifest.settings, &state.settings)
    }

    /// Effective value of one setting.
    pub fn get_setting_value(&self, key: &str) -> Option<serde_json::Value> {
        if let Some(value) = self.state.read().settings.get(key) {
            return Some(value.clone());
        }

        self.manifest
            .settings
            .iter()
            .find(|s| s.id == key)
            .and_then(|s| s.default_value.clone())
    }

    /// Update the in-memory settings cache. Does not persist.
    pub fn set_cached_setting_value(&self, key: impl Into<String>, value: serde_json::Value) {
        self.state.write().settings.insert(key.into(), value);
        self.notify();
    }

    // ========== LLMs ==========

    /// Register (or replace) an LLM under its plugin-local id.
    pub fn register_llm(&self, llm: Llm) -> Result<()> {
        self.ensure_open()?;

        if llm.id.is_empty() {
            return Err(PluginError::InvalidState {
                expected: "non-empty LLM id".to_string(),
                actual: "empty id".to_string(),
            });
        }

        tracing::debug!(plugin_id = %self.plugin_id(), llm_id = %llm.id, "Registered LLM");
        self.state.write().llms.insert(llm.id.clone(), llm);
        self.notify();
        Ok(())
    }

    /// Remove an LLM. Returns whether it was registered.
    pub fn unregister_llm(&self, llm_id: &str) -> bool {
        let removed = self.state.write().llms.shift_remove(llm_id).is_some();
        if removed {
            self.notify();
        }
        removed
    }

    /// LLMs this plugin registered, in registration order.
    pub fn get_llms(&self) -> Vec<Llm> {
        self.state.read().llms.values().cloned().collect()
    }

    // ========== Lifecycle ==========

    /// Whether the owning plugin has been unloaded.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drop every registered capability and refuse new registrations.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let had_llms = {
            let mut state = self.state.write();
            let had = !state.llms.is_empty();
            state.llms.clear();
            had
        };

        if had_llms {
            self.notify();
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(PluginError::InvalidState {
                expected: "active".to_string(),
                actual: "unloaded".to_string(),
            });
        }
        Ok(())
    }

    fn notify(&self) {
        self.events.emit(&ContextEvent::StateChanged {
            plugin_id: self.plugin_id().to_string(),
        });
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_id", &self.plugin_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}
