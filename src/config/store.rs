use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::AppConfig;
use crate::error::{AppError, Result};

/// Configuration store backed by an optional TOML file
///
/// Reads hand out a shared snapshot; updates swap in a new validated copy.
#[derive(Clone)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    cache: Arc<RwLock<Arc<AppConfig>>>,
}

impl ConfigStore {
    /// Load from `path`, or use defaults when no path is given
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = tokio::fs::read_to_string(path).await.map_err(|e| {
                    AppError::Config(format!("failed to read {}: {}", path.display(), e))
                })?;
                Self::parse(&text)?
            }
            None => AppConfig::default(),
        };
        config.validate()?;

        Ok(Self::with_config(config, path.map(Path::to_path_buf)))
    }

    /// In-memory store
    pub fn with_config(config: AppConfig, path: Option<PathBuf>) -> Self {
        Self {
            path,
            cache: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn parse(text: &str) -> Result<AppConfig> {
        toml::from_str(text).map_err(|e| AppError::Config(format!("invalid config: {}", e)))
    }

    /// Current configuration snapshot
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.read().clone()
    }

    /// Apply `f` to a copy, validate it, then swap it in. `key` names the
    /// change source for logs.
    pub fn update<F>(&self, key: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = (*self.get()).clone();
        f(&mut config);
        config.validate()?;

        *self.cache.write() = Arc::new(config);
        debug!("Configuration updated ({})", key);
        Ok(())
    }

    /// Render the current configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(&*self.get())
            .map_err(|e| AppError::Config(format!("failed to serialize config: {}", e)))
    }

    /// File the configuration was loaded from
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::CameraBackend;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("camstream.toml");
        tokio::fs::write(
            &path,
            "[web]\nhttp_port = 9000\n\n[camera]\nbackend = \"pattern\"\npattern_devices = 3\n",
        )
        .await
        .unwrap();

        let store = ConfigStore::load(Some(&path)).await.unwrap();
        let config = store.get();
        assert_eq!(config.web.http_port, 9000);
        assert_eq!(config.camera.backend, CameraBackend::Pattern);
        assert_eq!(config.camera.pattern_devices, 3);
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_load_defaults_without_path() {
        let store = ConfigStore::load(None).await.unwrap();
        assert_eq!(*store.get(), AppConfig::default());
        assert!(store.path().is_none());
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        tokio::fs::write(&path, "[stream]\nqueue_capacity = 0\n")
            .await
            .unwrap();
        assert!(matches!(
            ConfigStore::load(Some(&path)).await,
            Err(AppError::Config(_))
        ));

        tokio::fs::write(&path, "this is not toml = = =").await.unwrap();
        assert!(ConfigStore::load(Some(&path)).await.is_err());

        let missing = dir.path().join("missing.toml");
        assert!(ConfigStore::load(Some(&missing)).await.is_err());
    }

    #[test]
    fn test_update_validates() {
        let store = ConfigStore::with_config(AppConfig::default(), None);
        let before = store.get();

        store.update("camera", |c| c.camera.index = 4).unwrap();
        assert_eq!(store.get().camera.index, 4);
        assert_eq!(before.camera.index, 0);

        assert!(store.update("stream", |c| c.stream.queue_capacity = 0).is_err());
        assert_eq!(store.get().stream.queue_capacity, 5);
    }

    #[test]
    fn test_toml_output_parses_back() {
        let store = ConfigStore::with_config(AppConfig::default(), None);
        let text = store.to_toml().unwrap();
        assert_eq!(ConfigStore::parse(&text).unwrap(), AppConfig::default());
    }
}
