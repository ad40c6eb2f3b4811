//! Filesystem plugin backend.
//!
//! ```text
//! <plugins_dir>/
//!   weather/
//!     plugin.toml     manifest
//!     plugin.wasm     entry point (`main`)
//!     data.json       {"enabled": false, "settings": {}}
//! ```

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use super::{InstallSource, PluginBackend, PluginData, PluginPackage, PluginRecord};
use crate::manifest::PluginManifest;
use crate::settings::SettingsMap;
use crate::{DATA_FILE, MANIFEST_FILE, PluginError, Result};

/// Backend storing one directory per plugin.
#[derive(Debug, Clone)]
pub struct FsPluginBackend {
    plugins_dir: PathBuf,
}

impl FsPluginBackend {
    pub fn new(plugins_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
        }
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// Directory of an installed plugin. Rejects ids that would escape the
    /// plugins directory.
    fn plugin_dir(&self, id: &str) -> Result<PathBuf> {
        let mut components = Path::new(id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.plugins_dir.join(id)),
            _ => Err(PluginError::NotFound(id.to_string())),
        }
    }

    async fn installed_dir(&self, id: &str) -> Result<PathBuf> {
        let dir = self.plugin_dir(id)?;
        if tokio::fs::try_exists(dir.join(MANIFEST_FILE)).await? {
            Ok(dir)
        } else {
            Err(PluginError::NotFound(id.to_string()))
        }
    }

    async fn read_record(&self, dir: &Path) -> Result<PluginRecord> {
        let content = tokio::fs::read_to_string(dir.join(MANIFEST_FILE)).await?;
        let manifest = PluginManifest::parse(&content)?;
        let data = self.read_data(dir, manifest.id()).await?;
        Ok(PluginRecord { manifest, data })
    }

    /// Read `data.json`. A missing file means defaults; a corrupt one is
    /// replaced with defaults.
    async fn read_data(&self, dir: &Path, id: &str) -> Result<PluginData> {
        let path = dir.join(DATA_FILE);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PluginData::default()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&content) {
            Ok(data) => Ok(data),
            Err(e) => {
                tracing::warn!(plugin_id = id, error = %e, "Corrupt plugin data file, resetting");
                let data = PluginData::default();
                self.write_data(dir, &data).await?;
                Ok(data)
            }
        }
    }

    async fn write_data(&self, dir: &Path, data: &PluginData) -> Result<()> {
        let content = serde_json::to_string_pretty(data)?;
        let tmp = dir.join(format!("{DATA_FILE}.tmp"));
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, dir.join(DATA_FILE)).await?;
        Ok(())
    }

    async fn update_data(&self, id: &str, f: impl FnOnce(&mut PluginData) + Send) -> Result<()> {
        let dir = self.installed_dir(id).await?;
        let mut data = self.read_data(&dir, id).await?;
        f(&mut data);
        self.write_data(&dir, &data).await
    }

    async fn write_package(
        &self,
        dir: &Path,
        source_dir: Option<PathBuf>,
        package: &PluginPackage,
    ) -> Result<()> {
        match source_dir {
            Some(src) => {
                let dst = dir.to_path_buf();
                tokio::task::spawn_blocking(move || copy_dir_recursive(&src, &dst))
                    .await
                    .map_err(|e| PluginError::Backend(e.to_string()))??;
            }
            None => {
                tokio::fs::create_dir_all(dir).await?;
                tokio::fs::write(dir.join(MANIFEST_FILE), package.manifest.to_toml()?).await?;
                tokio::fs::write(dir.join(&package.manifest.main), &package.source).await?;
            }
        }

        // Installed plugins always start disabled, even if the source
        // directory shipped its own data file.
        self.write_data(dir, &PluginData::default()).await
    }
}

#[async_trait]
impl PluginBackend for FsPluginBackend {
    async fn get_plugin(&self, id: &str) -> Result<PluginRecord> {
        let dir = self.installed_dir(id).await?;
        self.read_record(&dir).await
    }

    async fn get_all_plugins(&self) -> Result<Vec<PluginRecord>> {
        if !tokio::fs::try_exists(&self.plugins_dir).await? {
            tracing::debug!(path = %self.plugins_dir.display(), "Plugins directory does not exist");
            return Ok(Vec::new());
        }

        let mut dirs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.plugins_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();

        let mut records = Vec::new();
        for dir in dirs {
            if !tokio::fs::try_exists(dir.join(MANIFEST_FILE)).await? {
                continue;
            }

            match self.read_record(&dir).await {
                Ok(record) if dir.file_name().is_some_and(|name| name == record.id()) => {
                    records.push(record)
                }
                Ok(record) => {
                    tracing::warn!(
                        plugin_id = %record.id(),
                        path = %dir.display(),
                        "Plugin directory name does not match its id, skipping"
                    );
                }
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "Failed to read plugin, skipping");
                }
            }
        }

        Ok(records)
    }

    async fn enable_plugin(&self, id: &str) -> Result<()> {
        self.update_data(id, |data| data.enabled = true).await
    }

    async fn disable_plugin(&self, id: &str) -> Result<()> {
        self.update_data(id, |data| data.enabled = false).await
    }

    async fn update_plugin_settings(&self, id: &str, settings: SettingsMap) -> Result<()> {
        self.update_data(id, |data| data.settings.extend(settings))
            .await
    }

    async fn uninstall_plugin(&self, id: &str) -> Result<()> {
        let dir = self.installed_dir(id).await?;
        tokio::fs::remove_dir_all(&dir).await?;
        tracing::info!(plugin_id = id, "Uninstalled plugin");
        Ok(())
    }

    async fn install(&self, source: InstallSource) -> Result<PluginManifest> {
        let source_dir = match &source {
            InstallSource::Directory(dir) => Some(dir.clone()),
            _ => None,
        };
        let package = PluginPackage::fetch(source).await?;
        let id = package.manifest.id().to_string();

        let dir = self.plugin_dir(&id)?;
        if tokio::fs::try_exists(&dir).await? {
            return Err(PluginError::AlreadyInstalled(id));
        }
        tokio::fs::create_dir_all(&self.plugins_dir).await?;

        if let Err(e) = self.write_package(&dir, source_dir, &package).await {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await {
                tracing::warn!(plugin_id = %id, error = %cleanup, "Failed to clean up partial install");
            }
            return Err(e);
        }

        tracing::info!(plugin_id = %id, path = %dir.display(), "Installed plugin");
        Ok(package.manifest)
    }

    async fn read_plugin_source(&self, id: &str) -> Result<Vec<u8>> {
        let dir = self.installed_dir(id).await?;
        let content = tokio::fs::read_to_string(dir.join(MANIFEST_FILE)).await?;
        let manifest = PluginManifest::parse(&content)?;

        let entry = dir.join(&manifest.main);
        tokio::fs::read(&entry).await.map_err(|e| {
            PluginError::load_error(id, format!("cannot read entry point {}: {e}", entry.display()))
        })
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }

    Ok(())
}
