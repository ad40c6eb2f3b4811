//! Persistence of installed plugins.
//!
//! The backend owns [`PluginRecord`]s and the entry-point bytes of every
//! installed plugin. It never loads or unloads anything: the
//! [`PluginSystem`](crate::PluginSystem) is responsible for keeping running
//! plugins consistent with what the backend reports.

mod fs;
mod memory;

pub use fs::FsPluginBackend;
pub use memory::InMemoryPluginBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::manifest::PluginManifest;
use crate::settings::SettingsMap;
use crate::{MANIFEST_FILE, PluginError, Result};

/// Mutable, persisted part of a plugin record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginData {
    /// Whether the host should load the plugin
    #[serde(default)]
    pub enabled: bool,

    /// Persisted setting values
    #[serde(default)]
    pub settings: SettingsMap,
}

/// An installed plugin: its manifest plus persisted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub manifest: PluginManifest,
    pub data: PluginData,
}

impl PluginRecord {
    /// A freshly installed record: disabled, no settings.
    pub fn new(manifest: PluginManifest) -> Self {
        Self {
            manifest,
            data: PluginData::default(),
        }
    }

    pub fn id(&self) -> &str {
        self.manifest.id()
    }

    pub fn is_enabled(&self) -> bool {
        self.data.enabled
    }
}

/// Where to install a plugin from.
#[derive(Debug, Clone)]
pub enum InstallSource {
    /// A local plugin directory containing `plugin.toml` and the entry point
    Directory(PathBuf),

    /// Base URL serving `plugin.toml` and the entry point
    Remote(url::Url),

    /// Manifest and entry point already in memory
    Inline {
        manifest: PluginManifest,
        source: Vec<u8>,
    },
}

/// Persistence collaborator of the plugin system.
#[async_trait]
pub trait PluginBackend: Send + Sync {
    /// Get one installed plugin.
    async fn get_plugin(&self, id: &str) -> Result<PluginRecord>;

    /// Get every installed plugin, in a stable order.
    async fn get_all_plugins(&self) -> Result<Vec<PluginRecord>>;

    /// Set the persisted `enabled` flag. Does not load anything.
    async fn enable_plugin(&self, id: &str) -> Result<()>;

    /// Clear the persisted `enabled` flag. Does not unload anything.
    async fn disable_plugin(&self, id: &str) -> Result<()>;

    /// Merge `settings` into the persisted settings.
    async fn update_plugin_settings(&self, id: &str, settings: SettingsMap) -> Result<()>;

    /// Remove the record and its files.
    async fn uninstall_plugin(&self, id: &str) -> Result<()>;

    /// Install a plugin, disabled by default.
    async fn install(&self, source: InstallSource) -> Result<PluginManifest>;

    /// Bytes of the plugin's entry point.
    async fn read_plugin_source(&self, id: &str) -> Result<Vec<u8>>;
}

/// Manifest and entry point resolved from an [`InstallSource`].
#[derive(Debug, Clone)]
pub(crate) struct PluginPackage {
    pub manifest: PluginManifest,
    pub source: Vec<u8>,
}

impl PluginPackage {
    /// Fetch and validate the package described by `source`.
    pub(crate) async fn fetch(source: InstallSource) -> Result<Self> {
        let package = match source {
            InstallSource::Directory(dir) => Self::read_dir(&dir).await?,
            InstallSource::Remote(base) => Self::download(&base).await?,
            InstallSource::Inline { manifest, source } => Self { manifest, source },
        };

        package.manifest.validate()?;
        Ok(package)
    }

    async fn read_dir(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let content = tokio::fs::read_to_string(&manifest_path).await.map_err(|e| {
            PluginError::Backend(format!("cannot read {}: {e}", manifest_path.display()))
        })?;
        let manifest = PluginManifest::parse(&content)?;

        let entry = dir.join(&manifest.main);
        let source = tokio::fs::read(&entry).await.map_err(|e| {
            PluginError::load_error(
                manifest.id(),
                format!("cannot read entry point {}: {e}", entry.display()),
            )
        })?;

        Ok(Self { manifest, source })
    }

    async fn download(base: &url::Url) -> Result<Self> {
        let client = reqwest::Client::new();

        let manifest_url = join_url(base, MANIFEST_FILE)?;
        tracing::info!(url = %manifest_url, "Downloading plugin manifest");
        let content = client
            .get(manifest_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let manifest = PluginManifest::parse(&content)?;

        let entry_url = join_url(base, &manifest.main)?;
        tracing::info!(plugin_id = %manifest.id(), url = %entry_url, "Downloading plugin entry point");
        let source = client
            .get(entry_url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?
            .to_vec();

        Ok(Self { manifest, source })
    }
}

/// Resolve `file` against a base URL, treating the base as a directory.
fn join_url(base: &url::Url, file: &str) -> Result<url::Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(file)
        .map_err(|e| PluginError::Network(format!("invalid plugin URL: {e}")))
}
