//! File Config Store Tests
//!
//! Persisting through the storage collaborator and loading again must yield
//! the same configuration content.

use assert_matches::assert_matches;
use distconf_core::effects::StorageEffects;
use distconf_core::{DistconfError, FileConfigStore, StorageConfig};

#[tokio::test]
async fn missing_file_loads_as_nothing_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileConfigStore::new(dir.path().join("distconf.bin"));

    assert_eq!(store.load_persisted_config().await.unwrap(), None);
}

#[tokio::test]
async fn stored_config_reloads_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("distconf.bin");
    let config = StorageConfig::new(7, b"hosts: [a, b, c]".to_vec());

    FileConfigStore::new(&path)
        .store_persisted_config(&config)
        .await
        .unwrap();

    // A fresh store instance simulates the next bootstrap
    let reloaded = FileConfigStore::new(&path)
        .load_persisted_config()
        .await
        .unwrap();
    assert_eq!(reloaded, Some(config));
}

#[tokio::test]
async fn later_store_replaces_earlier_one() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileConfigStore::new(dir.path().join("distconf.bin"));

    store
        .store_persisted_config(&StorageConfig::new(1, b"old".to_vec()))
        .await
        .unwrap();
    store
        .store_persisted_config(&StorageConfig::new(2, b"new".to_vec()))
        .await
        .unwrap();

    let loaded = store.load_persisted_config().await.unwrap().unwrap();
    assert_eq!(loaded.generation, 2);
    assert_eq!(loaded.blob, b"new".to_vec());
}

#[tokio::test]
async fn corrupt_file_is_a_load_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("distconf.bin");
    std::fs::write(&path, [0xde, 0xad]).unwrap();

    let result = FileConfigStore::new(&path).load_persisted_config().await;
    assert_matches!(result, Err(DistconfError::Serialization { .. }));
}
