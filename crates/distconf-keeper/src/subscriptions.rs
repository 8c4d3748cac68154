//! Session subscription tracker
//!
//! Outstanding "tell me when this peer's session goes away" registrations.
//! A value of `None` means the subscription was requested but the transport
//! has not reported a session yet.

use crate::binding::Binding;
use crate::bound_nodes::BoundNodeRegistry;
use distconf_core::{NodeId, SessionId};
use std::collections::BTreeMap;

/// Subscribed peer sessions
#[derive(Debug, Clone, Default)]
pub struct SubscriptionTracker {
    sessions: BTreeMap<NodeId, Option<SessionId>>,
}

impl SubscriptionTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `node_id`; `true` if a new subscription must be issued
    pub fn subscribe(&mut self, node_id: NodeId) -> bool {
        if self.sessions.contains_key(&node_id) {
            return false;
        }
        self.sessions.insert(node_id, None);
        true
    }

    /// Record the session reported by the transport; `false` when not subscribed
    pub fn session_established(&mut self, node_id: NodeId, session_id: SessionId) -> bool {
        match self.sessions.get_mut(&node_id) {
            Some(entry) => {
                *entry = Some(session_id);
                true
            }
            None => false,
        }
    }

    /// The transport dropped the session; the subscription ends with it
    pub fn session_lost(&mut self, node_id: NodeId) -> bool {
        self.sessions.remove(&node_id).is_some()
    }

    /// Drop a subscription; `true` if an unsubscribe must be issued
    pub fn release(&mut self, node_id: NodeId) -> bool {
        self.sessions.remove(&node_id).is_some()
    }

    /// Subscription state of `node_id`: `None` if not subscribed
    pub fn get(&self, node_id: NodeId) -> Option<Option<SessionId>> {
        self.sessions.get(&node_id).copied()
    }

    /// Whether `node_id` is subscribed
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.sessions.contains_key(&node_id)
    }

    /// All subscriptions in id order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, Option<SessionId>)> + '_ {
        self.sessions.iter().map(|(id, session)| (*id, *session))
    }

    /// Number of subscriptions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether there are no subscriptions
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Subscriptions no longer explained by the binding or a direct child
    pub fn stale_entries(
        &self,
        binding: Option<&Binding>,
        bound_nodes: &BoundNodeRegistry,
    ) -> Vec<NodeId> {
        self.sessions
            .keys()
            .copied()
            .filter(|&id| binding.map_or(true, |b| b.node_id != id) && !bound_nodes.contains(id))
            .collect()
    }
}
