//! File-backed configuration store
//!
//! Persists a node's local copy of the configuration as a single file. Writes
//! go to a sibling temporary file first and are renamed into place, so a
//! crash leaves either the old or the new copy.

use crate::effects::StorageEffects;
use crate::errors::Result;
use crate::types::storage_config::StorageConfig;
use crate::wire;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// [`StorageEffects`] backed by a file on the local filesystem
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    /// Store configuration at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the persisted file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StorageEffects for FileConfigStore {
    async fn load_persisted_config(&self) -> Result<Option<StorageConfig>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(wire::deserialize_config(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn store_persisted_config(&self, config: &StorageConfig) -> Result<()> {
        let bytes = wire::serialize_config(config)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        tracing::debug!(
            path = %self.path.display(),
            generation = config.generation,
            "persisted storage config"
        );
        Ok(())
    }
}
