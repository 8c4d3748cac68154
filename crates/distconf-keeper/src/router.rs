//! Bootstrap gate
//!
//! Until both the live node list and the persisted-config load result are in,
//! every other event is parked. Parked events are then replayed one per turn
//! through the steady-state dispatcher, node lists first in arrival order so
//! the latest list is applied last.

use distconf_core::KeeperEvent;
use std::collections::VecDeque;

/// Startup sequencing state
#[derive(Debug, Clone, Default)]
pub struct BootstrapGate {
    node_list_obtained: bool,
    storage_config_loaded: bool,
    steady: bool,
    pending: VecDeque<KeeperEvent>,
}

impl BootstrapGate {
    /// Gate waiting for both prerequisites
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether startup has completed and events are dispatched directly
    pub fn is_steady(&self) -> bool {
        self.steady
    }

    /// Whether both prerequisites arrived
    pub fn is_ready(&self) -> bool {
        self.node_list_obtained && self.storage_config_loaded
    }

    /// Whether the node list arrived
    pub fn node_list_obtained(&self) -> bool {
        self.node_list_obtained
    }

    /// Whether the persisted-config load result arrived
    pub fn storage_config_loaded(&self) -> bool {
        self.storage_config_loaded
    }

    /// Park a node list ahead of other events, behind earlier parked lists
    pub fn park_node_list(&mut self, event: KeeperEvent) {
        let at = self
            .pending
            .iter()
            .take_while(|parked| matches!(parked, KeeperEvent::NodeListReceived(_)))
            .count();
        self.pending.insert(at, event);
        self.node_list_obtained = true;
    }

    /// Record the load result
    pub fn mark_config_loaded(&mut self) {
        self.storage_config_loaded = true;
    }

    /// Park an event behind the backlog
    pub fn park(&mut self, event: KeeperEvent) {
        self.pending.push_back(event);
    }

    /// Next parked event to replay
    pub fn next_pending(&mut self) -> Option<KeeperEvent> {
        self.pending.pop_front()
    }

    /// Whether parked events remain
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Number of parked events
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Switch to steady state for good
    pub fn finish(&mut self) {
        self.steady = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distconf_core::NodeId;

    #[test]
    fn node_lists_are_kept_in_arrival_order_ahead_of_other_events() {
        let mut gate = BootstrapGate::new();
        gate.park(KeeperEvent::Wakeup);
        gate.park_node_list(KeeperEvent::NodeListReceived(vec![NodeId(1)]));
        gate.park_node_list(KeeperEvent::NodeListReceived(vec![NodeId(1), NodeId(2)]));

        assert_eq!(gate.pending_len(), 3);
        assert_eq!(gate.next_pending(), Some(KeeperEvent::NodeListReceived(vec![NodeId(1)])));
        assert_eq!(
            gate.next_pending(),
            Some(KeeperEvent::NodeListReceived(vec![NodeId(1), NodeId(2)]))
        );
        assert_eq!(gate.next_pending(), Some(KeeperEvent::Wakeup));
    }

    #[test]
    fn ready_needs_both_prerequisites() {
        let mut gate = BootstrapGate::new();
        gate.mark_config_loaded();
        assert!(!gate.is_ready());
        gate.park_node_list(KeeperEvent::NodeListReceived(vec![]));
        assert!(gate.is_ready());
        assert!(!gate.is_steady());
    }
}
