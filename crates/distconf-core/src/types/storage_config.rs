//! The replicated storage configuration
//!
//! The keeper does not interpret the blob. It only compares generations to
//! decide which copy wins and fingerprints blobs to detect divergence.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster-wide storage configuration as replicated by the keeper
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Monotonic generation; a higher generation supersedes a lower one
    pub generation: u64,
    /// Opaque configuration payload
    #[serde(with = "serde_bytes")]
    pub blob: Vec<u8>,
}

impl StorageConfig {
    /// Create a configuration at the given generation
    pub fn new(generation: u64, blob: impl Into<Vec<u8>>) -> Self {
        Self {
            generation,
            blob: blob.into(),
        }
    }

    /// The empty configuration a node starts from when nothing is persisted
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether this is the empty default
    pub fn is_empty(&self) -> bool {
        self.generation == 0 && self.blob.is_empty()
    }

    /// Content fingerprint (blake3 of generation and blob)
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.generation.to_le_bytes());
        hasher.update(&self.blob);
        *hasher.finalize().as_bytes()
    }

    /// Short hex fingerprint for logs and diagnostics
    pub fn short_fingerprint(&self) -> String {
        hex::encode(&self.fingerprint()[..6])
    }

    /// Same payload at a different generation
    pub fn with_generation(&self, generation: u64) -> Self {
        Self {
            generation,
            blob: self.blob.clone(),
        }
    }

    /// Whether `self` should replace `current` when pushed from a parent
    pub fn supersedes(&self, current: &StorageConfig) -> bool {
        self.generation > current.generation
    }
}

impl fmt::Display for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "generation {} ({} bytes, {})",
            self.generation,
            self.blob.len(),
            self.short_fingerprint()
        )
    }
}
