//! Subcommand implementations

pub mod config;
pub mod local;
pub mod simulate;

use anyhow::{anyhow, Context, Result};
use distconf_core::{NodeId, StorageConfig};

/// Initial config for one node, given as `NODE:GENERATION:TEXT`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedConfig {
    /// Node whose storage is seeded
    pub node_id: NodeId,
    /// Config persisted before start
    pub config: StorageConfig,
}

/// Parse a `NODE:GENERATION:TEXT` seed argument
pub fn parse_seed_config(value: &str) -> Result<SeedConfig> {
    let mut parts = value.splitn(3, ':');
    let (Some(node), Some(generation), Some(text)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(anyhow!("expected NODE:GENERATION:TEXT, got {value:?}"));
    };
    let node: u32 = node.parse().with_context(|| format!("invalid node id {node:?}"))?;
    let generation: u64 = generation
        .parse()
        .with_context(|| format!("invalid generation {generation:?}"))?;
    Ok(SeedConfig {
        node_id: NodeId(node),
        config: StorageConfig::new(generation, text.as_bytes().to_vec()),
    })
}

/// clap adapter for [`parse_seed_config`]
pub fn seed_arg(value: &str) -> std::result::Result<SeedConfig, String> {
    parse_seed_config(value).map_err(|e| e.to_string())
}
