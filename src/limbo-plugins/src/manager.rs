//! Plugin manager - the registry of active plugins.
//!
//! Presence in the manager is the only definition of "running". The manager
//! never loads or activates anything itself; [`PluginSystem`](crate::PluginSystem)
//! drives the lifecycle and registers the result here.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::capability::{RegisteredLlm, build_namespaced_resource_id};
use crate::events::{EventEmitter, PluginEvent};
use crate::plugin::ActivePlugin;
use crate::{PluginError, Result};

/// Registry of active plugins plus the global `plugin:*` channel.
pub struct PluginManager {
    /// Active plugins by ID, in registration order
    plugins: RwLock<IndexMap<String, Arc<ActivePlugin>>>,

    /// Event channel
    events: EventEmitter<PluginEvent>,
}

impl PluginManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(IndexMap::new()),
            events: EventEmitter::new(),
        }
    }

    /// Get an active plugin by ID.
    pub fn get_plugin(&self, id: &str) -> Option<Arc<ActivePlugin>> {
        self.plugins.read().get(id).cloned()
    }

    /// Snapshot of all active plugins, in registration order.
    pub fn get_plugins(&self) -> Vec<Arc<ActivePlugin>> {
        self.plugins.read().values().cloned().collect()
    }

    /// Check if a plugin is active.
    pub fn is_active(&self, id: &str) -> bool {
        self.plugins.read().contains_key(id)
    }

    /// Get the number of active plugins.
    pub fn plugin_count(&self) -> usize {
        self.plugins.read().len()
    }

    /// Register an activated plugin.
    ///
    /// Fails with [`PluginError::DuplicateRegistration`] if the id is already
    /// present, leaving the existing entry untouched.
    pub fn register_plugin(&self, plugin: ActivePlugin) -> Result<Arc<ActivePlugin>> {
        let id = plugin.id().to_string();
        let plugin = Arc::new(plugin);

        {
            let mut plugins = self.plugins.write();
            if plugins.contains_key(&id) {
                return Err(PluginError::DuplicateRegistration(id));
            }
            plugins.insert(id.clone(), plugin.clone());
        }

        tracing::info!(plugin_id = %id, "Registered plugin");
        self.events.emit(&PluginEvent::Added { plugin_id: id });
        Ok(plugin)
    }

    /// Remove a plugin. Emits nothing if the id was not registered.
    pub fn unregister_plugin(&self, id: &str) -> Option<Arc<ActivePlugin>> {
        let removed = self.plugins.write().shift_remove(id)?;

        tracing::info!(plugin_id = %id, "Unregistered plugin");
        self.events.emit(&PluginEvent::Removed {
            plugin_id: id.to_string(),
        });
        Some(removed)
    }

    /// Tell subscribers that a plugin's observable capabilities changed.
    pub fn notify_state_changed(&self, id: &str) {
        self.events.emit(&PluginEvent::StateChanged {
            plugin_id: id.to_string(),
        });
    }

    /// The `plugin:*` channel.
    pub fn events(&self) -> &EventEmitter<PluginEvent> {
        &self.events
    }

    // ========== Capability views ==========

    /// LLMs of every active plugin keyed by namespaced id.
    pub fn registered_llms(&self) -> IndexMap<String, RegisteredLlm> {
        self.registered_llms_list()
            .into_iter()
            .map(|llm| (llm.id.clone(), llm))
            .collect()
    }

    /// LLMs of every active plugin, by plugin registration order then LLM
    /// registration order.
    pub fn registered_llms_list(&self) -> Vec<RegisteredLlm> {
        self.get_plugins()
            .iter()
            .flat_map(|plugin| {
                let plugin_id = plugin.id().to_string();
                plugin
                    .context
                    .get_llms()
                    .into_iter()
                    .map(move |llm| RegisteredLlm {
                        id: build_namespaced_resource_id(&plugin_id, &llm.id),
                        plugin_id: plugin_id.clone(),
                        llm,
                    })
            })
            .collect()
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self.plugins.read().keys().cloned().collect();
        f.debug_struct("PluginManager")
            .field("plugins", &ids)
            .field("subscribers", &self.events.subscriber_count())
            .finish()
    }
}
