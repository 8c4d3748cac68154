//! In-memory collaborators for async keeper runtimes
//!
//! [`MemoryNetwork`] connects keepers running in one process. Every message
//! goes through the wire codec so that what travels between keepers is the
//! same byte representation a real interconnect would carry.

use async_trait::async_trait;
use distconf_core::effects::{EventSink, MembershipEffects, StorageEffects, TransportEffects};
use distconf_core::wire::{deserialize_envelope, serialize_envelope};
use distconf_core::{
    DistconfError, Envelope, KeeperEvent, NodeId, PeerMessage, Result, SessionId, StorageConfig,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Default)]
struct NetworkState {
    sinks: BTreeMap<NodeId, Arc<dyn EventSink>>,
    sessions: BTreeMap<(NodeId, NodeId), SessionId>,
    subscriptions: BTreeSet<(NodeId, NodeId)>,
    next_session: u128,
    delivered: u64,
}

impl NetworkState {
    fn session(&mut self, a: NodeId, b: NodeId) -> SessionId {
        let key = if a <= b { (a, b) } else { (b, a) };
        let next = &mut self.next_session;
        *self.sessions.entry(key).or_insert_with(|| {
            *next += 1;
            SessionId::from_u128(*next)
        })
    }

    fn live_session(&self, a: NodeId, b: NodeId) -> Option<SessionId> {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.sessions.get(&key).copied()
    }
}

/// Shared in-process interconnect
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryNetwork")
            .field("nodes", &state.sinks.keys().collect::<Vec<_>>())
            .field("sessions", &state.sessions.len())
            .finish()
    }
}

impl MemoryNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a keeper mailbox
    pub fn register(&self, sink: Arc<dyn EventSink>) {
        let node_id = sink.node_id();
        self.state.lock().sinks.insert(node_id, sink);
    }

    /// Detach `node_id`: its sessions drop and subscribers see `SessionLost`
    pub fn disconnect(&self, node_id: NodeId) {
        let watchers: Vec<Arc<dyn EventSink>> = {
            let mut state = self.state.lock();
            state.sinks.remove(&node_id);
            state.sessions.retain(|&(a, b), _| a != node_id && b != node_id);
            let watchers: Vec<NodeId> = state
                .subscriptions
                .iter()
                .filter(|&&(subscriber, target)| target == node_id && subscriber != node_id)
                .map(|&(subscriber, _)| subscriber)
                .collect();
            state
                .subscriptions
                .retain(|&(subscriber, target)| subscriber != node_id && target != node_id);
            watchers
                .into_iter()
                .filter_map(|id| state.sinks.get(&id).cloned())
                .collect()
        };
        tracing::debug!(%node_id, watchers = watchers.len(), "node disconnected");
        for watcher in watchers {
            watcher.deliver(KeeperEvent::SessionLost { node_id });
        }
    }

    /// Transport endpoint for `node_id`
    pub fn transport(&self, node_id: NodeId) -> MemoryTransport {
        MemoryTransport {
            node_id,
            network: self.clone(),
        }
    }

    /// Messages delivered so far
    pub fn delivered(&self) -> u64 {
        self.state.lock().delivered
    }

    fn sink(&self, node_id: NodeId) -> Option<Arc<dyn EventSink>> {
        self.state.lock().sinks.get(&node_id).cloned()
    }
}

/// One node's view of a [`MemoryNetwork`]
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    node_id: NodeId,
    network: MemoryNetwork,
}

#[async_trait]
impl TransportEffects for MemoryTransport {
    async fn send(&self, node_id: NodeId, session_id: SessionId, message: PeerMessage) -> Result<()> {
        let recipient = {
            let mut state = self.network.state.lock();
            if state.live_session(self.node_id, node_id) != Some(session_id) {
                return Err(DistconfError::network(format!(
                    "no session {session_id} between {} and {node_id}",
                    self.node_id
                )));
            }
            let recipient = state.sinks.get(&node_id).cloned().ok_or_else(|| {
                DistconfError::network(format!("node {node_id} is not connected"))
            })?;
            state.delivered += 1;
            recipient
        };
        let bytes = serialize_envelope(&Envelope::new(self.node_id, session_id, message))?;
        recipient.deliver(KeeperEvent::Message(deserialize_envelope(&bytes)?));
        Ok(())
    }

    async fn subscribe(&self, node_id: NodeId) -> Result<()> {
        let own = self
            .network
            .sink(self.node_id)
            .ok_or_else(|| DistconfError::network(format!("node {} is not connected", self.node_id)))?;
        let event = {
            let mut state = self.network.state.lock();
            if state.sinks.contains_key(&node_id) {
                state.subscriptions.insert((self.node_id, node_id));
                KeeperEvent::SessionEstablished {
                    node_id,
                    session_id: state.session(self.node_id, node_id),
                }
            } else {
                KeeperEvent::SessionLost { node_id }
            }
        };
        own.deliver(event);
        Ok(())
    }

    async fn unsubscribe(&self, node_id: NodeId) -> Result<()> {
        self.network
            .state
            .lock()
            .subscriptions
            .remove(&(self.node_id, node_id));
        Ok(())
    }
}

/// Config storage held in memory
#[derive(Debug, Default)]
pub struct MemoryStorage {
    config: Mutex<Option<StorageConfig>>,
    fail_loads: bool,
}

impl MemoryStorage {
    /// Empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that already holds `config`
    pub fn with_config(config: StorageConfig) -> Self {
        Self {
            config: Mutex::new(Some(config)),
            fail_loads: false,
        }
    }

    /// Storage whose loads always fail
    pub fn failing() -> Self {
        Self {
            config: Mutex::new(None),
            fail_loads: true,
        }
    }

    /// Currently persisted config
    pub fn persisted(&self) -> Option<StorageConfig> {
        self.config.lock().clone()
    }
}

#[async_trait]
impl StorageEffects for MemoryStorage {
    async fn load_persisted_config(&self) -> Result<Option<StorageConfig>> {
        if self.fail_loads {
            return Err(DistconfError::storage("storage unavailable"));
        }
        Ok(self.config.lock().clone())
    }

    async fn store_persisted_config(&self, config: &StorageConfig) -> Result<()> {
        *self.config.lock() = Some(config.clone());
        Ok(())
    }
}

/// Membership provider with a settable node list
#[derive(Debug, Default)]
pub struct StaticMembership {
    nodes: Mutex<Vec<NodeId>>,
}

impl StaticMembership {
    /// Membership listing `nodes`
    pub fn new(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            nodes: Mutex::new(nodes.into_iter().collect()),
        }
    }

    /// Replace the node list
    pub fn set(&self, nodes: Vec<NodeId>) {
        *self.nodes.lock() = nodes;
    }

    /// Remove one node from the list
    pub fn remove(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut nodes = self.nodes.lock();
        nodes.retain(|id| *id != node_id);
        nodes.clone()
    }

    /// Current node list
    pub fn nodes(&self) -> Vec<NodeId> {
        self.nodes.lock().clone()
    }
}

#[async_trait]
impl MembershipEffects for StaticMembership {
    async fn list_live_nodes(&self) -> Result<Vec<NodeId>> {
        Ok(self.nodes())
    }
}
