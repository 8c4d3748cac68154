//! Wire format helpers.
//!
//! Peer envelopes and persisted configurations are bincode-encoded behind a
//! schema version so that incompatible peers are rejected instead of
//! misinterpreted.

use crate::errors::{DistconfError, Result};
use crate::messages::Envelope;
use crate::types::storage_config::StorageConfig;
use serde::{Deserialize, Serialize};

pub const WIRE_SCHEMA_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub schema_version: u16,
    pub envelope: Envelope,
}

impl WireMessage {
    pub fn new(envelope: Envelope) -> Self {
        Self {
            schema_version: WIRE_SCHEMA_VERSION,
            envelope,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedConfig {
    schema_version: u16,
    config: StorageConfig,
}

pub fn serialize_envelope(envelope: &Envelope) -> Result<Vec<u8>> {
    Ok(bincode::serialize(&WireMessage::new(envelope.clone()))?)
}

pub fn deserialize_envelope(bytes: &[u8]) -> Result<Envelope> {
    let wire: WireMessage = bincode::deserialize(bytes)?;
    check_version(wire.schema_version)?;
    Ok(wire.envelope)
}

pub fn serialize_config(config: &StorageConfig) -> Result<Vec<u8>> {
    Ok(bincode::serialize(&PersistedConfig {
        schema_version: WIRE_SCHEMA_VERSION,
        config: config.clone(),
    })?)
}

pub fn deserialize_config(bytes: &[u8]) -> Result<StorageConfig> {
    let persisted: PersistedConfig = bincode::deserialize(bytes)?;
    check_version(persisted.schema_version)?;
    Ok(persisted.config)
}

fn check_version(version: u16) -> Result<()> {
    if version != WIRE_SCHEMA_VERSION {
        return Err(DistconfError::serialization(format!(
            "unsupported schema version {version}, expected {WIRE_SCHEMA_VERSION}"
        )));
    }
    Ok(())
}
