//! Configuration snapshots for the control loop
//!
//! The loop pulls one snapshot at the start of every cycle instead of being
//! notified about changes, so a reload can never be half-observed by a cycle.

use super::ControllerConfig;
use crate::error::{BoilerError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Source of point-in-time configuration snapshots
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Current configuration; the returned value never changes afterwards
    async fn snapshot(&self) -> Arc<ControllerConfig>;
}

/// In-memory configuration shared between the loop and whoever edits it
#[derive(Debug, Clone)]
pub struct SharedConfig {
    current: Arc<RwLock<Arc<ControllerConfig>>>,
}

impl SharedConfig {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Replace the whole configuration after validating it
    pub async fn replace(&self, config: ControllerConfig) -> Result<()> {
        config.validate()?;
        *self.current.write().await = Arc::new(config);
        Ok(())
    }

    /// Apply an edit to a copy of the configuration and publish it if valid
    pub async fn update<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut ControllerConfig),
    {
        let mut guard = self.current.write().await;
        let mut next = ControllerConfig::clone(&guard);
        edit(&mut next);
        next.validate()?;
        *guard = Arc::new(next);
        Ok(())
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new(ControllerConfig::default())
    }
}

#[async_trait]
impl ConfigProvider for SharedConfig {
    async fn snapshot(&self) -> Arc<ControllerConfig> {
        self.current.read().await.clone()
    }
}

#[derive(Debug)]
struct LoadedConfig {
    config: Arc<ControllerConfig>,
    modified: Option<SystemTime>,
}

/// Settings file that is re-read whenever its modification time changes
#[derive(Debug)]
pub struct FileConfigProvider {
    path: PathBuf,
    loaded: RwLock<LoadedConfig>,
}

impl FileConfigProvider {
    /// Open the settings file, writing the defaults first if it does not exist
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !tokio::fs::try_exists(&path).await? {
            info!("Settings file {:?} not found, writing defaults", path);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let defaults = serde_json::to_string_pretty(&ControllerConfig::default())?;
            tokio::fs::write(&path, defaults).await?;
        }

        let (config, modified) = Self::read(&path).await?;
        info!("Loaded settings from {:?}", path);

        Ok(Self {
            path,
            loaded: RwLock::new(LoadedConfig {
                config: Arc::new(config),
                modified,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file unconditionally
    pub async fn reload(&self) -> Result<Arc<ControllerConfig>> {
        let (config, modified) = Self::read(&self.path).await?;
        let config = Arc::new(config);

        let mut loaded = self.loaded.write().await;
        loaded.config = config.clone();
        loaded.modified = modified;
        Ok(config)
    }

    async fn read(path: &Path) -> Result<(ControllerConfig, Option<SystemTime>)> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            BoilerError::config(format!("Failed to read settings {}: {e}", path.display()))
        })?;
        let modified = Self::modified_at(path).await;
        let config = ControllerConfig::from_json(&content)?;
        Ok((config, modified))
    }

    async fn modified_at(path: &Path) -> Option<SystemTime> {
        tokio::fs::metadata(path)
            .await
            .ok()
            .and_then(|meta| meta.modified().ok())
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn snapshot(&self) -> Arc<ControllerConfig> {
        let modified = Self::modified_at(&self.path).await;

        {
            let loaded = self.loaded.read().await;
            if modified.is_none() || modified == loaded.modified {
                return loaded.config.clone();
            }
        }

        let mut loaded = self.loaded.write().await;
        if modified == loaded.modified {
            return loaded.config.clone();
        }

        match Self::read(&self.path).await {
            Ok((config, modified)) => {
                info!("Settings file {:?} changed, reloaded", self.path);
                loaded.config = Arc::new(config);
                loaded.modified = modified;
            }
            Err(e) => {
                warn!("Keeping previous settings, reload failed: {}", e);
                // Remember the broken revision so it is not re-parsed every cycle.
                loaded.modified = modified;
            }
        }
        debug!("Serving settings snapshot from {:?}", self.path);

        loaded.config.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn touch_later(path: &Path, content: &str) {
        // Some filesystems only keep whole-second mtimes.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        tokio::fs::write(path, content).await.unwrap();
    }

    #[tokio::test]
    async fn test_shared_config_snapshots_are_immutable() {
        let shared = SharedConfig::default();
        let before = shared.snapshot().await;

        shared.update(|c| c.read_interval_s = 9).await.unwrap();

        assert_eq!(before.read_interval_s, 2);
        assert_eq!(shared.snapshot().await.read_interval_s, 9);
    }

    #[tokio::test]
    async fn test_shared_config_rejects_invalid_edit() {
        let shared = SharedConfig::default();
        assert!(shared.update(|c| c.read_interval_s = 0).await.is_err());
        assert_eq!(shared.snapshot().await.read_interval_s, 2);
    }

    #[tokio::test]
    async fn test_file_provider_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let provider = FileConfigProvider::open(&path).await.unwrap();

        assert!(path.exists());
        assert_eq!(*provider.snapshot().await, ControllerConfig::default());
    }

    #[tokio::test]
    async fn test_file_provider_picks_up_changes_and_keeps_last_good() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, r#"{ "readIntervalS": 3 }"#).await.unwrap();

        let provider = FileConfigProvider::open(&path).await.unwrap();
        assert_eq!(provider.snapshot().await.read_interval_s, 3);

        touch_later(&path, r#"{ "readIntervalS": 7 }"#).await;
        assert_eq!(provider.snapshot().await.read_interval_s, 7);

        touch_later(&path, r#"{ "readIntervalS": "#).await;
        assert_eq!(provider.snapshot().await.read_interval_s, 7);
    }
}
