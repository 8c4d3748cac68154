//! Spanning tree maintenance: the upward binding and the downward children.

use super::DistributedConfigKeeper;
use crate::binding::Binding;
use crate::bound_nodes::{BoundNode, BoundNodesDelta};
use distconf_core::{
    Cookie, KeeperEvent, NodeId, PeerMessage, RejectReason, SessionId, StorageConfig,
};
use rand::Rng;
use std::collections::BTreeSet;

impl DistributedConfigKeeper {
    /// Replace the known node set after a membership update
    pub(super) fn apply_node_list(&mut self, node_ids: Vec<NodeId>) {
        let mut known: BTreeSet<NodeId> = node_ids.into_iter().collect();
        known.insert(self.self_id);
        tracing::debug!(node_id = %self.self_id, nodes = known.len(), "applying node list");
        self.node_ids = known;

        if let Some(parent) = self.binding.as_ref().map(|b| b.node_id) {
            if !self.node_ids.contains(&parent) {
                tracing::info!(node_id = %self.self_id, peer = %parent, "parent left the node list");
                self.unbind_parent();
            }
        }

        let departed: Vec<NodeId> = self
            .bound_nodes
            .node_ids()
            .filter(|id| !self.node_ids.contains(id))
            .collect();
        for node_id in departed {
            self.evict_child(node_id, RejectReason::UnknownNode);
        }

        self.root.tree_changed = true;
        self.issue_next_bind_request();
    }

    /// Start a bind attempt towards a random eligible parent, if any
    pub(super) fn issue_next_bind_request(&mut self) {
        if self.binding.is_some() {
            return;
        }
        let candidates: Vec<NodeId> = self
            .node_ids
            .iter()
            .copied()
            .filter(|&id| id > self.self_id && !self.bound_nodes.is_bound(id))
            .collect();
        if candidates.is_empty() {
            tracing::debug!(node_id = %self.self_id, "no parent candidates, acting as root");
            return;
        }

        let parent = candidates[self.rng.gen_range(0..candidates.len())];
        let cookie = self.allocate_binding_cookie();
        tracing::debug!(node_id = %self.self_id, peer = %parent, %cookie, "starting bind attempt");

        self.abort_root_sequence();
        self.binding = Some(Binding::new(parent, cookie));
        match self.subscriptions.get(parent) {
            None => self.subscribe(parent),
            Some(Some(session_id)) => self.on_parent_session(session_id),
            Some(None) => {}
        }
    }

    pub(super) fn handle_session_established(&mut self, node_id: NodeId, session_id: SessionId) {
        if !self.subscriptions.session_established(node_id, session_id) {
            tracing::debug!(node_id = %self.self_id, peer = %node_id, "session for unsubscribed peer");
            return;
        }

        let parent = self.binding.as_ref().map(|b| (b.node_id, b.session_id));
        match parent {
            Some((parent, None)) if parent == node_id => self.on_parent_session(session_id),
            Some((parent, Some(current))) if parent == node_id && current != session_id => {
                tracing::info!(node_id = %self.self_id, peer = %node_id, "parent session replaced");
                self.abort_binding();
            }
            _ => {}
        }

        let child_session = self.bound_nodes.get(node_id).map(|child| child.session_id);
        if matches!(child_session, Some(current) if current != session_id) {
            tracing::info!(node_id = %self.self_id, peer = %node_id, "child session replaced");
            self.remove_bound_node(node_id);
        }
    }

    pub(super) fn handle_session_lost(&mut self, node_id: NodeId) {
        self.subscriptions.session_lost(node_id);
        if self.binding.as_ref().is_some_and(|b| b.node_id == node_id) {
            tracing::info!(node_id = %self.self_id, peer = %node_id, "lost session to parent");
            self.abort_binding();
        }
        if self.bound_nodes.contains(node_id) {
            tracing::info!(node_id = %self.self_id, peer = %node_id, "lost session to child");
            self.remove_bound_node(node_id);
        }
    }

    pub(super) fn handle_undelivered(&mut self, recipient: NodeId, message: &PeerMessage) {
        tracing::debug!(
            node_id = %self.self_id,
            peer = %recipient,
            message = message.kind(),
            "message undelivered"
        );
        if self.binding.as_ref().is_some_and(|b| b.node_id == recipient) {
            self.abort_binding();
        }
        if self.bound_nodes.contains(recipient) {
            self.remove_bound_node(recipient);
        }
    }

    fn on_parent_session(&mut self, session_id: SessionId) {
        let Some(binding) = self.binding.as_mut() else {
            return;
        };
        binding.session_id = Some(session_id);
        let cookie = binding.cookie;
        let bound_node_ids = self.bound_nodes.all_bound_ids();
        self.send_to_parent(PeerMessage::BindRequest {
            cookie,
            bound_node_ids,
        });
    }

    pub(super) fn handle_bind_request(
        &mut self,
        sender: NodeId,
        session_id: SessionId,
        cookie: Cookie,
        bound_node_ids: BTreeSet<NodeId>,
    ) {
        if let Err(reason) = self.admit_child(sender, &bound_node_ids) {
            tracing::info!(node_id = %self.self_id, peer = %sender, %cookie, %reason, "rejecting bind request");
            self.send(sender, session_id, PeerMessage::BindRejected { cookie, reason });
            return;
        }

        let child = BoundNode::new(cookie, session_id, bound_node_ids);
        let (replaced, delta) = self.bound_nodes.insert(sender, child);
        if let Some(replaced) = replaced {
            tracing::debug!(node_id = %self.self_id, peer = %sender, old_cookie = %replaced.cookie, "child re-bound");
            let completed = self.scatter.node_gone(sender, replaced.scatter_tasks);
            for task in completed {
                self.finish_task(task);
            }
        }
        tracing::info!(node_id = %self.self_id, peer = %sender, %cookie, "accepted child");

        match self.subscriptions.get(sender) {
            None => self.subscribe(sender),
            Some(Some(current)) if current != session_id => {
                self.subscriptions.session_established(sender, session_id);
            }
            Some(_) => {}
        }
        let root_node_id = self.root_node_id();
        let config = self.storage_config.clone();
        self.send(
            sender,
            session_id,
            PeerMessage::BindAccepted {
                cookie,
                root_node_id,
                config,
            },
        );
        self.propagate_delta(delta);
    }

    fn admit_child(&self, sender: NodeId, subtree: &BTreeSet<NodeId>) -> Result<(), RejectReason> {
        if !self.node_ids.contains(&sender) || sender == self.self_id {
            return Err(RejectReason::UnknownNode);
        }
        let parent = self.binding.as_ref().map(|b| b.node_id);
        if parent == Some(sender)
            || subtree.contains(&self.self_id)
            || parent.is_some_and(|p| subtree.contains(&p))
        {
            return Err(RejectReason::Cycle);
        }
        if let Some(conflict) = self.bound_nodes.conflicts(sender, subtree) {
            tracing::debug!(node_id = %self.self_id, peer = %sender, conflict = %conflict, "subtree overlaps");
            return Err(RejectReason::TopologyConflict);
        }
        Ok(())
    }

    pub(super) fn handle_bind_accepted(
        &mut self,
        sender: NodeId,
        session_id: SessionId,
        cookie: Cookie,
        root_node_id: NodeId,
        config: StorageConfig,
    ) {
        let Some(binding) = self.binding.as_mut().filter(|b| b.matches(sender, cookie)) else {
            tracing::debug!(node_id = %self.self_id, peer = %sender, %cookie, "stale bind acceptance, unbinding");
            self.send(sender, session_id, PeerMessage::Unbind { cookie });
            return;
        };
        if root_node_id == self.self_id {
            tracing::warn!(node_id = %self.self_id, peer = %sender, "binding would close a cycle");
            self.unbind_parent();
            return;
        }
        binding.root_node_id = Some(root_node_id);
        tracing::info!(node_id = %self.self_id, peer = %sender, root = %root_node_id, "bound to parent");

        let applied = self.apply_pushed_config(Some(config));
        let pushed = applied.then(|| self.storage_config.clone());
        self.forward_push(pushed);
    }

    pub(super) fn handle_bind_rejected(&mut self, sender: NodeId, cookie: Cookie, reason: RejectReason) {
        if self.binding.as_ref().is_some_and(|b| b.matches(sender, cookie)) {
            tracing::info!(node_id = %self.self_id, peer = %sender, %cookie, %reason, "binding rejected");
            self.abort_binding();
        } else {
            tracing::debug!(node_id = %self.self_id, peer = %sender, %cookie, "ignoring stale rejection");
        }
    }

    pub(super) fn handle_bound_nodes_update(
        &mut self,
        sender: NodeId,
        cookie: Cookie,
        added: &BTreeSet<NodeId>,
        removed: &BTreeSet<NodeId>,
    ) {
        if !self.bound_nodes.get(sender).is_some_and(|child| child.cookie == cookie) {
            tracing::debug!(node_id = %self.self_id, peer = %sender, %cookie, "update from unknown child");
            return;
        }
        let parent = self.binding.as_ref().map(|b| b.node_id);
        if added.contains(&self.self_id) || parent.is_some_and(|p| added.contains(&p)) {
            self.evict_child(sender, RejectReason::Cycle);
            return;
        }
        if self.bound_nodes.update_conflicts(sender, added).is_some() {
            self.evict_child(sender, RejectReason::TopologyConflict);
            return;
        }
        if let Some(delta) = self.bound_nodes.apply_update(sender, added, removed) {
            self.propagate_delta(delta);
        }
    }

    pub(super) fn handle_reverse_push(
        &mut self,
        sender: NodeId,
        cookie: Cookie,
        root_node_id: NodeId,
        config: Option<StorageConfig>,
    ) {
        let Some(binding) = self
            .binding
            .as_mut()
            .filter(|b| b.matches(sender, cookie) && b.is_connected())
        else {
            tracing::debug!(node_id = %self.self_id, peer = %sender, %cookie, "ignoring push from non-parent");
            return;
        };
        if root_node_id == self.self_id {
            tracing::warn!(node_id = %self.self_id, peer = %sender, "pushed root is this node, unbinding");
            self.unbind_parent();
            return;
        }
        let root_changed = binding.root_node_id != Some(root_node_id);
        binding.root_node_id = Some(root_node_id);

        let applied = self.apply_pushed_config(config);
        if applied || root_changed {
            let pushed = applied.then(|| self.storage_config.clone());
            self.forward_push(pushed);
        }
    }

    pub(super) fn handle_unbind(&mut self, sender: NodeId, cookie: Cookie) {
        if self.bound_nodes.get(sender).is_some_and(|child| child.cookie == cookie) {
            tracing::info!(node_id = %self.self_id, peer = %sender, "child unbound");
            self.remove_bound_node(sender);
        }
    }

    /// Adopt a configuration received from above if it is newer
    fn apply_pushed_config(&mut self, config: Option<StorageConfig>) -> bool {
        let Some(config) = config else {
            return false;
        };
        if config.supersedes(&self.storage_config) {
            tracing::info!(
                node_id = %self.self_id,
                generation = config.generation,
                fingerprint = %config.short_fingerprint(),
                "applying pushed storage config"
            );
            self.storage_config = config.clone();
            self.persist(config);
            true
        } else {
            if config.generation == self.storage_config.generation && config != self.storage_config {
                tracing::warn!(
                    node_id = %self.self_id,
                    generation = config.generation,
                    local = %self.storage_config.short_fingerprint(),
                    pushed = %config.short_fingerprint(),
                    "pushed config diverges at the same generation"
                );
            }
            false
        }
    }

    /// Push the current root (and optionally a config) to every child
    pub(super) fn forward_push(&mut self, config: Option<StorageConfig>) {
        let root_node_id = self.root_node_id();
        let children: Vec<(NodeId, Cookie, SessionId)> = self
            .bound_nodes
            .iter()
            .map(|(id, child)| (id, child.cookie, child.session_id))
            .collect();
        for (node_id, cookie, session_id) in children {
            self.send(
                node_id,
                session_id,
                PeerMessage::ReversePush {
                    cookie,
                    root_node_id,
                    config: config.clone(),
                },
            );
        }
    }

    /// Report a change of the reachable set to the parent
    fn propagate_delta(&mut self, delta: BoundNodesDelta) {
        if delta.is_empty() {
            return;
        }
        self.root.tree_changed = true;
        let Some(cookie) = self.binding.as_ref().map(|b| b.cookie) else {
            return;
        };
        self.send_to_parent(PeerMessage::BoundNodesUpdate {
            cookie,
            added: delta.added,
            removed: delta.removed,
        });
    }

    fn evict_child(&mut self, node_id: NodeId, reason: RejectReason) {
        let Some(child) = self.bound_nodes.get(node_id) else {
            return;
        };
        let (cookie, session_id) = (child.cookie, child.session_id);
        tracing::info!(node_id = %self.self_id, peer = %node_id, %reason, "evicting child");
        self.send(node_id, session_id, PeerMessage::BindRejected { cookie, reason });
        self.remove_bound_node(node_id);
    }

    pub(super) fn remove_bound_node(&mut self, node_id: NodeId) {
        let Some((child, delta)) = self.bound_nodes.remove(node_id) else {
            return;
        };
        let completed = self.scatter.node_gone(node_id, child.scatter_tasks);
        for task in completed {
            self.finish_task(task);
        }
        self.propagate_delta(delta);
    }

    /// Tell the parent we are leaving, then drop the binding
    fn unbind_parent(&mut self) {
        if let Some(cookie) = self.binding.as_ref().map(|b| b.cookie) {
            self.send_to_parent(PeerMessage::Unbind { cookie });
        }
        self.abort_binding();
    }

    /// Drop the binding and schedule a retry
    pub(super) fn abort_binding(&mut self) {
        let previous_root = self.root_node_id();
        let Some(binding) = self.binding.take() else {
            return;
        };
        tracing::debug!(node_id = %self.self_id, peer = %binding.node_id, cookie = %binding.cookie, "binding aborted");
        let dropped = self
            .scatter
            .cancel_where(|task| task.origin.is_some(), &mut self.bound_nodes);
        if !dropped.is_empty() {
            tracing::debug!(node_id = %self.self_id, tasks = dropped.len(), "dropped tasks of former parent");
        }
        self.root.reset();
        self.root.tree_changed = true;
        if previous_root != self.self_id {
            self.forward_push(None);
        }
        self.schedule_wakeup();
    }

    pub(super) fn schedule_wakeup(&mut self) {
        if self.wakeup_scheduled {
            return;
        }
        self.wakeup_scheduled = true;
        let (min, max) = self.config.bind_retry_range();
        let delay = if min >= max {
            min
        } else {
            self.rng.gen_range(min..=max)
        };
        tracing::debug!(node_id = %self.self_id, delay_ms = delay.as_millis() as u64, "scheduling bind retry");
        self.schedule(delay, KeeperEvent::Wakeup);
    }
}
