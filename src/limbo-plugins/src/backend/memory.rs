//! In-memory plugin backend.

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;

use super::{InstallSource, PluginBackend, PluginPackage, PluginRecord};
use crate::manifest::PluginManifest;
use crate::settings::SettingsMap;
use crate::{PluginError, Result};

#[derive(Debug, Clone)]
struct StoredPlugin {
    record: PluginRecord,
    source: Vec<u8>,
}

/// Backend keeping records and sources in memory, in install order.
#[derive(Debug, Default)]
pub struct InMemoryPluginBackend {
    plugins: RwLock<IndexMap<String, StoredPlugin>>,
}

impl InMemoryPluginBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_plugin<T>(&self, id: &str, f: impl FnOnce(&mut StoredPlugin) -> T) -> Result<T> {
        let mut plugins = self.plugins.write();
        let stored = plugins
            .get_mut(id)
            .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        Ok(f(stored))
    }
}

#[async_trait]
impl PluginBackend for InMemoryPluginBackend {
    async fn get_plugin(&self, id: &str) -> Result<PluginRecord> {
        self.with_plugin(id, |stored| stored.record.clone())
    }

    async fn get_all_plugins(&self) -> Result<Vec<PluginRecord>> {
        Ok(self
            .plugins
            .read()
            .values()
            .map(|stored| stored.record.clone())
            .collect())
    }

    async fn enable_plugin(&self, id: &str) -> Result<()> {
        self.with_plugin(id, |stored| stored.record.data.enabled = true)
    }

    async fn disable_plugin(&self, id: &str) -> Result<()> {
        self.with_plugin(id, |stored| stored.record.data.enabled = false)
    }

    async fn update_plugin_settings(&self, id: &str, settings: SettingsMap) -> Result<()> {
        self.with_plugin(id, |stored| stored.record.data.settings.extend(settings))
    }

    async fn uninstall_plugin(&self, id: &str) -> Result<()> {
        self.plugins
            .write()
            .shift_remove(id)
            .map(|_| ())
            .ok_or_else(|| PluginError::NotFound(id.to_string()))
    }

    async fn install(&self, source: InstallSource) -> Result<PluginManifest> {
        let PluginPackage { manifest, source } = PluginPackage::fetch(source).await?;
        let id = manifest.id().to_string();

        let mut plugins = self.plugins.write();
        if plugins.contains_key(&id) {
            return Err(PluginError::AlreadyInstalled(id));
        }

        plugins.insert(
            id.clone(),
            StoredPlugin {
                record: PluginRecord::new(manifest.clone()),
                source,
            },
        );

        tracing::info!(plugin_id = %id, "Installed plugin");
        Ok(manifest)
    }

    async fn read_plugin_source(&self, id: &str) -> Result<Vec<u8>> {
        self.with_plugin(id, |stored| stored.source.clone())
    }
}
