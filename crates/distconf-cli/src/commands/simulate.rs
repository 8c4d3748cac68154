//! Deterministic cluster simulation

use super::{seed_arg, SeedConfig};
use anyhow::{bail, Result};
use clap::Args;
use distconf_core::{KeeperConfig, NodeId};
use distconf_testkit::SimCluster;
use tracing::info;

/// Run a simulated cluster to quiescence
#[derive(Args)]
pub struct SimulateCommand {
    /// Number of nodes, ids 1..=N
    #[arg(short = 'n', long, default_value = "5")]
    pub nodes: u32,

    /// Seed for parent selection and retry jitter
    #[arg(long, default_value = "1")]
    pub seed: u64,

    /// Persisted config as NODE:GENERATION:TEXT (repeatable)
    #[arg(long = "persist", value_parser = seed_arg)]
    pub persist: Vec<SeedConfig>,

    /// Node to crash once the cluster has settled (repeatable)
    #[arg(long = "kill")]
    pub kill: Vec<u32>,

    /// Step budget per settle phase
    #[arg(long, default_value = "200000")]
    pub max_steps: usize,

    /// Print one JSON status snapshot per node instead of status pages
    #[arg(long)]
    pub json: bool,
}

/// Handle the simulate command
pub fn handle_simulate_command(cmd: SimulateCommand, mut config: KeeperConfig) -> Result<()> {
    if cmd.nodes == 0 {
        bail!("a cluster needs at least one node");
    }
    config.rng_seed = Some(cmd.seed);

    let mut sim = SimCluster::with_nodes(cmd.nodes, config);
    for seed in cmd.persist {
        sim.try_persist(seed.node_id, seed.config)?;
    }
    sim.start();
    let steps = sim.run_until_quiescent(cmd.max_steps)?;
    info!(steps, elapsed_ms = sim.now().as_millis() as u64, "cluster settled");
    println!("{}", sim.convergence());

    if !cmd.kill.is_empty() {
        for node in &cmd.kill {
            info!(node, "crashing node");
            sim.kill(NodeId(*node));
        }
        let steps = sim.run_until_quiescent(cmd.max_steps)?;
        info!(steps, elapsed_ms = sim.now().as_millis() as u64, "survivors settled");
        println!("{}", sim.convergence());
    }

    if cmd.json {
        for status in sim.statuses() {
            println!("{}", status.to_json()?);
        }
    } else {
        for node_id in sim.alive_nodes() {
            if let Some(keeper) = sim.keeper(node_id) {
                println!("{}", distconf_keeper::render_status(keeper));
            }
        }
    }
    Ok(())
}
