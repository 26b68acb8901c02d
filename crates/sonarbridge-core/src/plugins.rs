//! Keep the local analyzer jars in step with the server.
//!
//! The engine analyzes with the same analyzers the server runs. At startup
//! [`PluginsSynchronizer::synchronize`] asks the server which plugins are
//! installed, downloads the engine-supported jars missing from
//! `<storage>/plugins`, deletes jars the server no longer lists, and returns
//! the resulting [`PluginSet`] for the `initialize` handshake.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::api::{ApiError, InstalledPlugin, PluginsApi};
use crate::engine::{Analyzer, PluginSet};

#[derive(Debug, thiserror::Error)]
pub enum PluginSyncError {
    #[error("cannot list server plugins: {0}")]
    Api(#[from] ApiError),

    #[error("failed to download plugin '{key}': {source}")]
    Download {
        key: String,
        #[source]
        source: ApiError,
    },

    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_error(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> PluginSyncError {
    let path = path.to_path_buf();
    move |source| PluginSyncError::Io {
        action,
        path,
        source,
    }
}

/// Mirrors the server's analyzer plugins into a local directory.
pub struct PluginsSynchronizer {
    api: PluginsApi,
    plugins_dir: PathBuf,
}

impl PluginsSynchronizer {
    /// Jars are kept in `<storage_path>/plugins`.
    pub fn new(api: PluginsApi, storage_path: &Path) -> Self {
        Self {
            api,
            plugins_dir: storage_path.join("plugins"),
        }
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    pub async fn synchronize(&self) -> Result<PluginSet, PluginSyncError> {
        let installed = self.api.installed().await?.plugins;
        self.download_missing(&installed).await?;
        self.remove_unknown(&installed).await?;
        let set = self.local_analyzers(&installed).await;
        info!(
            plugins = set.paths.len(),
            languages = ?set.languages,
            "Analyzer plugins synchronized"
        );
        Ok(set)
    }

    async fn download_missing(&self, installed: &[InstalledPlugin]) -> Result<(), PluginSyncError> {
        tokio::fs::create_dir_all(&self.plugins_dir)
            .await
            .map_err(io_error("cannot create", &self.plugins_dir))?;

        for plugin in installed.iter().filter(|p| p.sonar_lint_supported) {
            let Some(path) = self.local_path(plugin) else {
                warn!(key = %plugin.key, filename = %plugin.filename, "Skipping plugin with unsafe file name");
                continue;
            };
            if exists(&path).await {
                continue;
            }

            let response =
                self.api
                    .download(&plugin.key)
                    .await
                    .map_err(|source| PluginSyncError::Download {
                        key: plugin.key.clone(),
                        source,
                    })?;
            tokio::fs::write(&path, response.body())
                .await
                .map_err(io_error("cannot write", &path))?;
            info!(key = %plugin.key, path = %path.display(), "Downloaded plugin");
        }
        Ok(())
    }

    async fn remove_unknown(&self, installed: &[InstalledPlugin]) -> Result<(), PluginSyncError> {
        let known: HashSet<&str> = installed.iter().map(|p| p.filename.as_str()).collect();
        let mut entries = tokio::fs::read_dir(&self.plugins_dir)
            .await
            .map_err(io_error("cannot list", &self.plugins_dir))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(io_error("cannot list", &self.plugins_dir))?
        {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.ends_with(".jar") || known.contains(file_name) {
                continue;
            }
            tokio::fs::remove_file(&path)
                .await
                .map_err(io_error("cannot remove", &path))?;
            info!(path = %path.display(), "Removed unknown plugin");
        }
        Ok(())
    }

    async fn local_analyzers(&self, installed: &[InstalledPlugin]) -> PluginSet {
        let mut set = PluginSet::default();
        for plugin in installed.iter().filter(|p| p.sonar_lint_supported) {
            let Some(analyzer) = Analyzer::by_key(&plugin.key) else {
                debug!(key = %plugin.key, "No analyzer for server plugin");
                continue;
            };
            let Some(path) = self.local_path(plugin) else {
                continue;
            };
            if exists(&path).await {
                set.insert(path, analyzer);
            }
        }
        set
    }

    /// `None` unless the server's file name is a plain file name.
    fn local_path(&self, plugin: &InstalledPlugin) -> Option<PathBuf> {
        let name = Path::new(&plugin.filename);
        if name.file_name()? != name.as_os_str() {
            return None;
        }
        Some(self.plugins_dir.join(name))
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
