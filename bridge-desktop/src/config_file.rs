//! JSON file persistence for the plugin configuration

use async_trait::async_trait;
use bridge_traits::{error::Result, storage::ConfigurationPersistence};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Stores the serialized configuration in a single file
///
/// Writes go to a sibling `.tmp` file which is then renamed over the target,
/// so a crash mid-write leaves the previous configuration intact.
#[derive(Debug, Clone)]
pub struct JsonFileConfigurationPersistence {
    path: PathBuf,
}

impl JsonFileConfigurationPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/polyglot/configuration.json`, falling back to the
    /// working directory when the platform has no config directory
    pub fn default_location() -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join("polyglot").join("configuration.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl ConfigurationPersistence for JsonFileConfigurationPersistence {
    async fn load(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path).await {
            Ok(data) => {
                debug!(path = ?self.path, size = data.len(), "Loaded configuration");
                Ok(Some(data))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = ?self.path, "No saved configuration, starting fresh");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, data: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp = self.temp_path();
        fs::write(&temp, data).await?;
        fs::rename(&temp, &self.path).await?;

        debug!(path = ?self.path, size = data.len(), "Saved configuration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = JsonFileConfigurationPersistence::new(dir.path().join("cfg.json"));
        assert!(persistence.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cfg.json");
        let persistence = JsonFileConfigurationPersistence::new(&path);

        persistence.save(br#"{"alternatives":[]}"#).await.unwrap();
        persistence.save(br#"{"alternatives":[1]}"#).await.unwrap();

        let loaded = persistence.load().await.unwrap().unwrap();
        assert_eq!(loaded, br#"{"alternatives":[1]}"#.to_vec());
        assert!(!persistence.temp_path().exists());
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let persistence = JsonFileConfigurationPersistence::new("/etc/polyglot/cfg.json");
        assert_eq!(
            persistence.temp_path(),
            PathBuf::from("/etc/polyglot/cfg.json.tmp")
        );
    }
}
