//! In-process cluster of async keeper runtimes

use super::{seed_arg, SeedConfig};
use anyhow::{bail, Result};
use clap::Args;
use distconf_core::effects::StorageEffects;
use distconf_core::{FileConfigStore, KeeperConfig, NodeId};
use distconf_testkit::{LocalCluster, MemoryStorage};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Start keepers in this process and wait for them to converge
#[derive(Args)]
pub struct LocalCommand {
    /// Number of nodes, ids 1..=N
    #[arg(short = 'n', long, default_value = "3")]
    pub nodes: u32,

    /// Persist configs under this directory instead of in memory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Initial config as NODE:GENERATION:TEXT (memory storage only, repeatable)
    #[arg(long = "persist", value_parser = seed_arg)]
    pub persist: Vec<SeedConfig>,

    /// Give up after this many milliseconds
    #[arg(long, default_value = "10000")]
    pub timeout_ms: u64,
}

/// Handle the local command
pub async fn handle_local_command(cmd: LocalCommand, config: KeeperConfig) -> Result<()> {
    if cmd.nodes == 0 {
        bail!("a cluster needs at least one node");
    }
    if cmd.data_dir.is_some() && !cmd.persist.is_empty() {
        bail!("--persist only applies to memory storage");
    }
    let node_ids: Vec<NodeId> = (1..=cmd.nodes).map(NodeId).collect();

    let cluster = match &cmd.data_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "using file-backed storage");
            LocalCluster::start(&node_ids, &config, |id| -> Arc<dyn StorageEffects> {
                Arc::new(FileConfigStore::new(dir.join(format!("node-{id}.cfg"))))
            })
        }
        None => {
            let seeds: BTreeMap<NodeId, _> = cmd
                .persist
                .into_iter()
                .map(|seed| (seed.node_id, seed.config))
                .collect();
            LocalCluster::start(&node_ids, &config, |id| -> Arc<dyn StorageEffects> {
                match seeds.get(&id) {
                    Some(seed) => Arc::new(MemoryStorage::with_config(seed.clone())),
                    None => Arc::new(MemoryStorage::new()),
                }
            })
        }
    };

    let interval = Duration::from_millis(50);
    let attempts = usize::try_from(cmd.timeout_ms / 50).unwrap_or(usize::MAX).max(1);
    let result = cluster.wait_for_convergence(attempts, interval).await;
    for node_id in cluster.node_ids() {
        if let Some(handle) = cluster.handle(node_id) {
            println!("{}", handle.status_page().await?);
        }
    }
    cluster.shutdown().await;

    let report = result?;
    println!("{report}");
    Ok(())
}
