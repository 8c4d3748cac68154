//! Root state machine
//!
//! Only a keeper without a binding (the effective root) runs it:
//! `INITIAL → QUORUM_CHECK_TIMEOUT → COLLECT_CONFIG → PROPOSE_NEW_STORAGE_CONFIG → INITIAL`.
//! This module holds the state and the pure decision functions; the event
//! handlers live in `keeper::root`.

use distconf_core::{NodeId, StorageConfig, TaskCookie};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Phase of the root sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RootState {
    /// Idle, waiting for a tree change
    #[default]
    Initial,
    /// Probing how many nodes are reachable through the tree
    QuorumCheckTimeout,
    /// Collecting every reachable node's persisted configuration
    CollectConfig,
    /// Waiting for the chosen configuration to be persisted locally
    ProposeNewStorageConfig,
}

impl fmt::Display for RootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RootState::Initial => "INITIAL",
            RootState::QuorumCheckTimeout => "QUORUM_CHECK_TIMEOUT",
            RootState::CollectConfig => "COLLECT_CONFIG",
            RootState::ProposeNewStorageConfig => "PROPOSE_NEW_STORAGE_CONFIG",
        };
        f.write_str(name)
    }
}

/// Mutable state of the root sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootStateMachine {
    /// Current phase
    pub state: RootState,
    /// Local scatter task of the current phase
    pub current_task: Option<TaskCookie>,
    /// Whether the tree changed since the last round started
    pub tree_changed: bool,
    /// Configuration being persisted in `PROPOSE_NEW_STORAGE_CONFIG`
    pub proposed: Option<StorageConfig>,
    /// A round ended without an outcome; the next wakeup starts another
    pub retry_pending: bool,
}

impl Default for RootStateMachine {
    fn default() -> Self {
        Self {
            state: RootState::Initial,
            current_task: None,
            // startup counts as a change
            tree_changed: true,
            proposed: None,
            retry_pending: false,
        }
    }
}

impl RootStateMachine {
    /// Create a machine that will start a round as soon as it has quorum
    pub fn new() -> Self {
        Self::default()
    }

    /// Back to `INITIAL`; the tree-changed and retry flags are kept
    pub fn reset(&mut self) {
        self.state = RootState::Initial;
        self.current_task = None;
        self.proposed = None;
    }

    /// Turn a pending retry into a tree change, returning whether one was pending
    pub fn arm_retry(&mut self) -> bool {
        let pending = std::mem::take(&mut self.retry_pending);
        if pending {
            self.tree_changed = true;
        }
        pending
    }

    /// Enter a collecting phase driven by `task`
    pub fn begin(&mut self, state: RootState, task: TaskCookie) {
        self.state = state;
        self.current_task = Some(task);
    }
}

/// Strict majority of `total`
pub fn has_quorum(count: usize, total: usize) -> bool {
    count * 2 > total
}

/// Authoritative configuration among `configs`.
///
/// The highest generation wins; among equal generations the lowest reporting
/// node id wins.
pub fn select_config(
    configs: &BTreeMap<NodeId, StorageConfig>,
) -> Option<(NodeId, &StorageConfig)> {
    configs.iter().fold(None, |best, (&node_id, config)| match best {
        Some((_, current)) if current.generation >= config.generation => best,
        _ => Some((node_id, config)),
    })
}

/// Outcome of a configuration collection round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigDecision {
    /// Every reachable node already holds this configuration
    Converged(StorageConfig),
    /// Reachable copies diverge; propose this configuration
    Propose {
        /// Node whose copy won
        source: NodeId,
        /// Winning content at `max_generation + 1`
        config: StorageConfig,
    },
}

/// Decide what to do with the collected configurations
pub fn decide_config(configs: &BTreeMap<NodeId, StorageConfig>) -> Option<ConfigDecision> {
    let (source, chosen) = select_config(configs)?;
    if configs.values().all(|config| config == chosen) {
        return Some(ConfigDecision::Converged(chosen.clone()));
    }
    let generation = chosen.generation.saturating_add(1);
    Some(ConfigDecision::Propose {
        source,
        config: chosen.with_generation(generation),
    })
}
