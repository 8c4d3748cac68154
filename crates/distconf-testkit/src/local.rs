//! Async cluster on the current tokio runtime
//!
//! Every node is a real [`KeeperRuntime`] wired to a shared
//! [`MemoryNetwork`] and [`StaticMembership`]. All mailboxes are registered
//! before the first keeper starts so that no early message is lost.

use crate::assertions::{convergence_report, ConvergenceReport};
use crate::memory::{MemoryNetwork, MemoryStorage, StaticMembership};
use distconf_core::effects::{EventSink, StorageEffects};
use distconf_core::{DistconfError, KeeperConfig, KeeperEvent, NodeId, Result, StorageConfig};
use distconf_keeper::{KeeperEffects, KeeperHandle, KeeperRuntime, KeeperStatus};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

struct LocalNode {
    handle: KeeperHandle,
    task: JoinHandle<()>,
    storage: Arc<dyn StorageEffects>,
}

/// Running cluster of keepers connected in memory
pub struct LocalCluster {
    network: MemoryNetwork,
    membership: Arc<StaticMembership>,
    nodes: BTreeMap<NodeId, LocalNode>,
}

impl LocalCluster {
    /// Start keepers for `node_ids`, with storage supplied per node.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(node_ids: &[NodeId], config: &KeeperConfig, mut storage_for: F) -> Self
    where
        F: FnMut(NodeId) -> Arc<dyn StorageEffects>,
    {
        let network = MemoryNetwork::new();
        let membership = Arc::new(StaticMembership::new(node_ids.iter().copied()));

        let runtimes: Vec<(KeeperRuntime, Arc<dyn StorageEffects>)> = node_ids
            .iter()
            .map(|&node_id| {
                let storage = storage_for(node_id);
                let effects = KeeperEffects {
                    membership: membership.clone(),
                    transport: Arc::new(network.transport(node_id)),
                    storage: storage.clone(),
                };
                let node_config = KeeperConfig {
                    rng_seed: config
                        .rng_seed
                        .map(|seed| seed.wrapping_add(u64::from(node_id.get()))),
                    ..config.clone()
                };
                let runtime = KeeperRuntime::new(node_id, node_config, effects);
                network.register(Arc::new(runtime.handle()));
                (runtime, storage)
            })
            .collect();

        let nodes = runtimes
            .into_iter()
            .map(|(runtime, storage)| {
                let handle = runtime.handle();
                let task = tokio::spawn(runtime.run());
                (
                    handle.node_id(),
                    LocalNode {
                        handle,
                        task,
                        storage,
                    },
                )
            })
            .collect();
        tracing::info!(nodes = node_ids.len(), "local cluster started");

        Self {
            network,
            membership,
            nodes,
        }
    }

    /// Start keepers backed by [`MemoryStorage`], seeding the given configs
    pub fn start_in_memory(
        node_ids: &[NodeId],
        config: &KeeperConfig,
        initial: &BTreeMap<NodeId, StorageConfig>,
    ) -> Self {
        Self::start(node_ids, config, |node_id| -> Arc<dyn StorageEffects> {
            match initial.get(&node_id) {
                Some(config) => Arc::new(MemoryStorage::with_config(config.clone())),
                None => Arc::new(MemoryStorage::new()),
            }
        })
    }

    /// Handle of a running node
    pub fn handle(&self, node_id: NodeId) -> Option<&KeeperHandle> {
        self.nodes.get(&node_id).map(|node| &node.handle)
    }

    /// Ids of the running nodes
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// The shared interconnect
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    /// Status of every running node
    pub async fn statuses(&self) -> Result<Vec<KeeperStatus>> {
        join_all(self.nodes.values().map(|node| node.handle.status()))
            .await
            .into_iter()
            .collect()
    }

    /// Current convergence report
    pub async fn convergence(&self) -> Result<ConvergenceReport> {
        Ok(convergence_report(&self.statuses().await?))
    }

    /// Poll until the cluster converges, at most `attempts` times
    pub async fn wait_for_convergence(
        &self,
        attempts: usize,
        interval: Duration,
    ) -> Result<ConvergenceReport> {
        let mut report = ConvergenceReport::default();
        for _ in 0..attempts {
            report = self.convergence().await?;
            if report.is_converged() {
                return Ok(report);
            }
            tokio::time::sleep(interval).await;
        }
        Err(DistconfError::internal(format!(
            "cluster did not converge after {attempts} polls: {report}"
        )))
    }

    /// Persisted config of `node_id`
    pub async fn persisted(&self, node_id: NodeId) -> Result<Option<StorageConfig>> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or_else(|| DistconfError::not_found(format!("node {node_id}")))?;
        node.storage.load_persisted_config().await
    }

    /// Stop one node and tell the survivors about the new node list
    pub async fn stop_node(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.remove(&node_id) else {
            return;
        };
        node.handle.shutdown();
        let _ = node.task.await;
        self.network.disconnect(node_id);
        let remaining = self.membership.remove(node_id);
        for survivor in self.nodes.values() {
            survivor
                .handle
                .deliver(KeeperEvent::NodeListReceived(remaining.clone()));
        }
    }

    /// Stop every node and wait for the tasks to finish
    pub async fn shutdown(self) {
        for node in self.nodes.values() {
            node.handle.shutdown();
        }
        let _ = join_all(self.nodes.into_values().map(|node| node.task)).await;
    }
}
