//! Turning plugin source into executable modules.
//!
//! The plugin system never interprets plugin source itself; it hands the
//! bytes fetched from the backend to a [`ModuleLoader`]. The WASM loader in
//! [`crate::runtime`] compiles them, while [`NativeModuleLoader`] maps
//! plugin ids to in-process Rust implementations (built-in plugins, tests).

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::manifest::PluginManifest;
use crate::plugin::PluginModule;
use crate::{PluginError, Result};

/// Produces an executable module for a plugin.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Compile and evaluate `source`. Any failure is reported as
    /// [`PluginError::LoadError`].
    async fn load(&self, manifest: &PluginManifest, source: &[u8]) -> Result<Box<dyn PluginModule>>;
}

/// Constructor for a native plugin module.
pub type ModuleFactory = Arc<dyn Fn() -> anyhow::Result<Box<dyn PluginModule>> + Send + Sync>;

/// Loader for plugins implemented in Rust and linked into the host.
///
/// Source bytes are ignored; the module is looked up by plugin id.
#[derive(Default)]
pub struct NativeModuleLoader {
    factories: RwLock<HashMap<String, ModuleFactory>>,
}

impl NativeModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory used for `plugin_id`, replacing any previous one.
    pub fn register<F>(&self, plugin_id: impl Into<String>, factory: F)
    where
        F: Fn() -> anyhow::Result<Box<dyn PluginModule>> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(plugin_id.into(), Arc::new(factory));
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with<F>(self, plugin_id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn PluginModule>> + Send + Sync + 'static,
    {
        self.register(plugin_id, factory);
        self
    }

    pub fn unregister(&self, plugin_id: &str) -> bool {
        self.factories.write().remove(plugin_id).is_some()
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.factories.read().contains_key(plugin_id)
    }
}

#[async_trait]
impl ModuleLoader for NativeModuleLoader {
    async fn load(&self, manifest: &PluginManifest, _source: &[u8]) -> Result<Box<dyn PluginModule>> {
        let id = manifest.id();

        // Clone out so the factory runs without the lock held.
        let factory = self
            .factories
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| PluginError::load_error(id, "no native module registered"))?;

        factory().map_err(|e| PluginError::load_error(id, format!("{e:#}")))
    }
}

impl std::fmt::Debug for NativeModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.factories.read().keys().cloned().collect();
        ids.sort();
        f.debug_struct("NativeModuleLoader")
            .field("plugins", &ids)
            .finish()
    }
}
