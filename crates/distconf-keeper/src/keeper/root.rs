//! Quorum check and configuration rounds run by the effective root.

use super::DistributedConfigKeeper;
use crate::root::{decide_config, has_quorum, ConfigDecision, RootState};
use crate::scatter::CompletedTask;
use distconf_core::{GatherResult, ScatterQuery};

impl DistributedConfigKeeper {
    /// Start a round if this node is an idle root with a quorum-sized tree
    pub(super) fn check_root_state(&mut self) {
        if self.binding.is_some() || self.root.state != RootState::Initial || !self.root.tree_changed {
            return;
        }
        let reachable = self.bound_nodes.all_bound_count() + 1;
        if !has_quorum(reachable, self.node_ids.len()) {
            return;
        }
        self.root.tree_changed = false;
        tracing::info!(
            node_id = %self.self_id,
            reachable,
            nodes = self.node_ids.len(),
            "starting quorum check"
        );
        self.begin_phase(RootState::QuorumCheckTimeout, ScatterQuery::CollectReachable);
    }

    fn begin_phase(&mut self, state: RootState, query: ScatterQuery) {
        let (cookie, completed) = self.start_scatter(None, query);
        self.root.begin(state, cookie);
        if let Some(task) = completed {
            self.on_root_task_complete(task);
        }
    }

    /// Advance the root sequence with the result of a local task
    pub(super) fn on_root_task_complete(&mut self, task: CompletedTask) {
        if self.root.current_task != Some(task.cookie) {
            tracing::debug!(node_id = %self.self_id, task_cookie = %task.cookie, "result of abandoned root task");
            return;
        }
        self.root.current_task = None;
        let total = self.node_ids.len();

        match (self.root.state, task.result) {
            (RootState::QuorumCheckTimeout, GatherResult::Reachable { node_ids }) => {
                if has_quorum(node_ids.len(), total) {
                    tracing::debug!(node_id = %self.self_id, reachable = node_ids.len(), forced = task.forced, "quorum reached");
                    self.begin_phase(RootState::CollectConfig, ScatterQuery::CollectConfigs);
                } else {
                    tracing::info!(node_id = %self.self_id, reachable = node_ids.len(), nodes = total, "no quorum");
                    self.retry_root_sequence();
                }
            }
            (RootState::CollectConfig, GatherResult::Configs { configs }) => {
                if !has_quorum(configs.len(), total) {
                    tracing::info!(node_id = %self.self_id, collected = configs.len(), nodes = total, "lost quorum while collecting configs");
                    self.retry_root_sequence();
                    return;
                }
                match decide_config(&configs) {
                    Some(ConfigDecision::Propose { source, config }) => {
                        tracing::info!(
                            node_id = %self.self_id,
                            source = %source,
                            generation = config.generation,
                            fingerprint = %config.short_fingerprint(),
                            "proposing storage config"
                        );
                        self.root.state = RootState::ProposeNewStorageConfig;
                        self.root.proposed = Some(config.clone());
                        self.persist(config);
                    }
                    Some(ConfigDecision::Converged(config)) => {
                        tracing::debug!(node_id = %self.self_id, generation = config.generation, "storage config converged");
                        self.abort_root_sequence();
                    }
                    None => self.abort_root_sequence(),
                }
            }
            (state, result) => {
                tracing::warn!(node_id = %self.self_id, %state, query = %result.query(), "unexpected root task result");
                self.retry_root_sequence();
            }
        }
    }

    pub(super) fn handle_config_stored(&mut self, success: bool, generation: u64) {
        let proposed = match (&self.root.state, &self.root.proposed) {
            (RootState::ProposeNewStorageConfig, Some(config)) if config.generation == generation => {
                Some(config.clone())
            }
            _ => None,
        };
        match proposed {
            Some(config) if success => {
                tracing::info!(node_id = %self.self_id, generation, "proposed config persisted, pushing down");
                self.storage_config = config.clone();
                self.forward_push(Some(config));
                self.abort_root_sequence();
            }
            Some(_) => {
                tracing::warn!(
                    node_id = %self.self_id,
                    generation,
                    kept = self.storage_config.generation,
                    "failed to persist proposed config"
                );
                self.retry_root_sequence();
            }
            None if !success => {
                tracing::warn!(node_id = %self.self_id, generation, "failed to persist storage config");
            }
            None => {
                tracing::trace!(node_id = %self.self_id, generation, "storage config persisted");
            }
        }
    }

    /// Abandon a round that ended without an outcome and retry after a delay
    fn retry_root_sequence(&mut self) {
        self.abort_root_sequence();
        self.root.retry_pending = true;
        self.schedule_wakeup();
    }

    /// Cancel local tasks and return to `INITIAL`
    pub(super) fn abort_root_sequence(&mut self) {
        let cancelled = self
            .scatter
            .cancel_where(|task| task.origin.is_none(), &mut self.bound_nodes);
        if !cancelled.is_empty() || self.root.state != RootState::Initial {
            tracing::debug!(node_id = %self.self_id, state = %self.root.state, "root sequence reset");
        }
        self.root.reset();
    }
}
