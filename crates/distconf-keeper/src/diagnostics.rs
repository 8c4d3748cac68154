//! Status snapshot and text status page

use crate::keeper::DistributedConfigKeeper;
use serde::Serialize;
use std::fmt::Write;

/// Serializable snapshot of a keeper
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeeperStatus {
    /// Local node
    pub node_id: u32,
    /// Bootstrap finished
    pub steady: bool,
    /// Events still parked from bootstrap
    pub pending_events: usize,
    /// Root as seen from this node
    pub root_node_id: u32,
    /// Parent, if bound
    pub parent: Option<u32>,
    /// Whether the parent session is up
    pub parent_connected: bool,
    /// Root sequence phase
    pub root_state: String,
    /// Direct children
    pub children: Vec<u32>,
    /// Every node reachable below
    pub all_bound: Vec<u32>,
    /// Known live nodes
    pub known_nodes: Vec<u32>,
    /// Session subscriptions held
    pub subscriptions: usize,
    /// In-flight scatter tasks
    pub scatter_tasks: usize,
    /// Generation of the applied config
    pub config_generation: u64,
    /// Short fingerprint of the applied config
    pub config_fingerprint: String,
}

impl KeeperStatus {
    /// Capture the current state of `keeper`
    pub fn capture(keeper: &DistributedConfigKeeper) -> Self {
        let binding = keeper.binding();
        Self {
            node_id: keeper.self_id().get(),
            steady: keeper.is_steady(),
            pending_events: keeper.pending_event_count(),
            root_node_id: keeper.root_node_id().get(),
            parent: binding.map(|b| b.node_id.get()),
            parent_connected: binding.is_some_and(|b| b.is_connected()),
            root_state: keeper.root_state().state.to_string(),
            children: keeper.bound_nodes().node_ids().map(|id| id.get()).collect(),
            all_bound: keeper.bound_nodes().all_bound_ids().into_iter().map(|id| id.get()).collect(),
            known_nodes: keeper.node_ids().iter().map(|id| id.get()).collect(),
            subscriptions: keeper.subscriptions().len(),
            scatter_tasks: keeper.scatter().len(),
            config_generation: keeper.storage_config().generation,
            config_fingerprint: keeper.storage_config().short_fingerprint(),
        }
    }

    /// Render as JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Human-readable status page
pub fn render_status(keeper: &DistributedConfigKeeper) -> String {
    let mut page = String::new();
    let status = KeeperStatus::capture(keeper);
    let _ = writeln!(page, "Distributed config keeper on node {}", status.node_id);
    let _ = writeln!(
        page,
        "  phase: {}",
        if status.steady { "steady" } else { "bootstrap" }
    );
    if !status.steady {
        let _ = writeln!(page, "  pending events: {}", status.pending_events);
    }
    let _ = writeln!(page, "  root: {} ({})", status.root_node_id, status.root_state);
    match keeper.binding() {
        Some(binding) => {
            let session = binding
                .session_id
                .map_or_else(|| "pending".to_string(), |s| s.to_string());
            let _ = writeln!(
                page,
                "  binding: parent {} cookie {} session {}",
                binding.node_id, binding.cookie, session
            );
        }
        None => {
            let _ = writeln!(page, "  binding: none");
        }
    }
    let _ = writeln!(page, "  bound nodes:");
    for (node_id, child) in keeper.bound_nodes().iter() {
        let subtree: Vec<String> = child.bound_node_ids.iter().map(ToString::to_string).collect();
        let _ = writeln!(
            page,
            "    {node_id} cookie {} subtree [{}] tasks {}",
            child.cookie,
            subtree.join(", "),
            child.scatter_tasks.len()
        );
    }
    let _ = writeln!(page, "  reachable below: {}", keeper.bound_nodes().all_bound_count());
    let _ = writeln!(page, "  subscriptions:");
    for (node_id, session) in keeper.subscriptions().iter() {
        let session = session.map_or_else(|| "pending".to_string(), |s| s.to_string());
        let _ = writeln!(page, "    {node_id} {session}");
    }
    let _ = writeln!(page, "  scatter tasks:");
    for task in keeper.scatter().iter() {
        let pending: Vec<String> = task.pending_nodes.iter().map(ToString::to_string).collect();
        let origin = task
            .origin
            .map_or_else(|| "local".to_string(), |o| format!("from {} task {}", o.node_id, o.task_cookie));
        let _ = writeln!(
            page,
            "    {} {} {} pending [{}]",
            task.cookie,
            task.query,
            origin,
            pending.join(", ")
        );
    }
    let _ = writeln!(
        page,
        "  storage config: generation {} fingerprint {}",
        status.config_generation, status.config_fingerprint
    );
    page
}
