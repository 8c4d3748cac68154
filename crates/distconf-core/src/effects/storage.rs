//! Storage effects
//!
//! Persistence of the node's local copy of the configuration. Each node
//! writes only its own copy.

use crate::errors::Result;
use crate::types::storage_config::StorageConfig;
use async_trait::async_trait;
use std::sync::Arc;

/// Local configuration persistence
#[async_trait]
pub trait StorageEffects: Send + Sync {
    /// Load the persisted configuration; `Ok(None)` when nothing was stored yet
    async fn load_persisted_config(&self) -> Result<Option<StorageConfig>>;

    /// Durably replace the persisted configuration
    async fn store_persisted_config(&self, config: &StorageConfig) -> Result<()>;
}

#[async_trait]
impl<T: StorageEffects + ?Sized> StorageEffects for Arc<T> {
    async fn load_persisted_config(&self) -> Result<Option<StorageConfig>> {
        (**self).load_persisted_config().await
    }

    async fn store_persisted_config(&self, config: &StorageConfig) -> Result<()> {
        (**self).store_persisted_config(config).await
    }
}
