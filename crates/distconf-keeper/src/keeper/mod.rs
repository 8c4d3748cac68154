//! Distributed config keeper
//!
//! One keeper runs per node. It is a synchronous state machine: every call to
//! [`DistributedConfigKeeper::handle`] processes exactly one event and returns
//! the commands the runtime must execute. Handlers are split by concern:
//! - `tree`: binding to a parent, accepting children, subtree bookkeeping
//! - `gather`: scatter request and gather reply plumbing
//! - `root`: the quorum and configuration rounds of the effective root

mod gather;
mod root;
mod tree;

use crate::binding::Binding;
use crate::bound_nodes::BoundNodeRegistry;
use crate::commands::Command;
use crate::root::RootStateMachine;
use crate::router::BootstrapGate;
use crate::scatter::ScatterCoordinator;
use crate::subscriptions::SubscriptionTracker;
use distconf_core::{
    Cookie, KeeperConfig, KeeperEvent, NodeId, PeerMessage, SessionId, StorageConfig,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::time::Duration;

const NODE_SEED_SPREAD: u64 = 0x9E37_79B9_7F4A_7C15;

/// Protocol state of a single node
#[derive(Debug)]
pub struct DistributedConfigKeeper {
    pub(crate) self_id: NodeId,
    pub(crate) config: KeeperConfig,
    pub(crate) node_ids: BTreeSet<NodeId>,
    pub(crate) storage_config: StorageConfig,
    pub(crate) binding: Option<Binding>,
    pub(crate) bound_nodes: BoundNodeRegistry,
    pub(crate) subscriptions: SubscriptionTracker,
    pub(crate) scatter: ScatterCoordinator,
    pub(crate) root: RootStateMachine,
    pub(crate) gate: BootstrapGate,
    next_binding_cookie: u64,
    wakeup_scheduled: bool,
    rng: ChaCha8Rng,
    outbox: Vec<Command>,
}

impl DistributedConfigKeeper {
    /// Create a keeper for `self_id`; nothing happens until [`Self::start`]
    pub fn new(self_id: NodeId, config: KeeperConfig) -> Self {
        let seed = config.rng_seed.unwrap_or_else(rand::random)
            ^ u64::from(self_id.get()).wrapping_mul(NODE_SEED_SPREAD);
        Self {
            self_id,
            config,
            node_ids: BTreeSet::from([self_id]),
            storage_config: StorageConfig::empty(),
            binding: None,
            bound_nodes: BoundNodeRegistry::new(),
            subscriptions: SubscriptionTracker::new(),
            scatter: ScatterCoordinator::new(),
            root: RootStateMachine::new(),
            gate: BootstrapGate::new(),
            next_binding_cookie: 0,
            wakeup_scheduled: false,
            rng: ChaCha8Rng::seed_from_u64(seed),
            outbox: Vec::new(),
        }
    }

    /// Kick off bootstrap: request the node list and the persisted config
    pub fn start(&mut self) -> Vec<Command> {
        tracing::info!(node_id = %self.self_id, "starting distributed config keeper");
        vec![Command::ListNodes, Command::LoadConfig]
    }

    /// Process one event
    pub fn handle(&mut self, event: KeeperEvent) -> Vec<Command> {
        if self.gate.is_steady() {
            self.dispatch(event);
            self.after_dispatch();
        } else {
            self.handle_wait_for_init(event);
        }
        std::mem::take(&mut self.outbox)
    }

    /// This node
    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    /// Tunables in effect
    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    /// Known live node ids, always including this node
    pub fn node_ids(&self) -> &BTreeSet<NodeId> {
        &self.node_ids
    }

    /// Configuration currently applied on this node
    pub fn storage_config(&self) -> &StorageConfig {
        &self.storage_config
    }

    /// Current parent binding
    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    /// Direct children and their subtrees
    pub fn bound_nodes(&self) -> &BoundNodeRegistry {
        &self.bound_nodes
    }

    /// Session subscriptions
    pub fn subscriptions(&self) -> &SubscriptionTracker {
        &self.subscriptions
    }

    /// In-flight scatter tasks
    pub fn scatter(&self) -> &ScatterCoordinator {
        &self.scatter
    }

    /// Root sequence state
    pub fn root_state(&self) -> &RootStateMachine {
        &self.root
    }

    /// Whether bootstrap has completed
    pub fn is_steady(&self) -> bool {
        self.gate.is_steady()
    }

    /// Number of events parked during bootstrap
    pub fn pending_event_count(&self) -> usize {
        self.gate.pending_len()
    }

    /// Whether this node currently acts as root
    pub fn is_root(&self) -> bool {
        self.binding.is_none()
    }

    /// Root of the tree as seen from this node
    pub fn root_node_id(&self) -> NodeId {
        match &self.binding {
            None => self.self_id,
            Some(binding) => binding.root_node_id.unwrap_or(binding.node_id),
        }
    }

    fn handle_wait_for_init(&mut self, event: KeeperEvent) {
        match event {
            KeeperEvent::NodeListReceived(_) if !self.gate.is_ready() => {
                tracing::debug!(node_id = %self.self_id, "node list obtained during bootstrap");
                self.gate.park_node_list(event);
                self.begin_replay_if_ready();
            }
            KeeperEvent::ConfigLoaded { success, config } if !self.gate.storage_config_loaded() => {
                match (success, config) {
                    (true, Some(config)) => {
                        tracing::info!(
                            node_id = %self.self_id,
                            generation = config.generation,
                            fingerprint = %config.short_fingerprint(),
                            "loaded persisted storage config"
                        );
                        self.storage_config = config;
                    }
                    (true, None) => {
                        tracing::info!(node_id = %self.self_id, "no persisted storage config");
                    }
                    (false, _) => {
                        tracing::warn!(
                            node_id = %self.self_id,
                            "failed to load persisted storage config, starting empty"
                        );
                    }
                }
                self.gate.mark_config_loaded();
                self.begin_replay_if_ready();
            }
            KeeperEvent::ProcessPendingEvent => {
                if self.gate.is_ready() {
                    self.process_pending_event();
                } else {
                    tracing::debug!(node_id = %self.self_id, "pending event replay requested too early");
                }
            }
            other => {
                tracing::trace!(node_id = %self.self_id, event = other.kind(), "parking event until bootstrap completes");
                self.gate.park(other);
            }
        }
    }

    fn begin_replay_if_ready(&mut self) {
        if self.gate.is_ready() {
            self.process_pending_event();
        }
    }

    /// Replay one parked event through the steady-state path
    fn process_pending_event(&mut self) {
        if let Some(event) = self.gate.next_pending() {
            self.dispatch(event);
            self.after_dispatch();
        }
        if self.gate.has_pending() {
            self.emit(Command::Yield);
        } else {
            tracing::info!(node_id = %self.self_id, "bootstrap complete");
            self.gate.finish();
        }
    }

    fn dispatch(&mut self, event: KeeperEvent) {
        tracing::trace!(node_id = %self.self_id, event = event.kind(), "dispatch");
        match event {
            KeeperEvent::NodeListReceived(node_ids) => self.apply_node_list(node_ids),
            KeeperEvent::ConfigLoaded { .. } => {
                tracing::debug!(node_id = %self.self_id, "ignoring config load result after bootstrap");
            }
            KeeperEvent::ConfigStored {
                success,
                generation,
            } => self.handle_config_stored(success, generation),
            KeeperEvent::SessionEstablished {
                node_id,
                session_id,
            } => self.handle_session_established(node_id, session_id),
            KeeperEvent::SessionLost { node_id } => self.handle_session_lost(node_id),
            KeeperEvent::Undelivered { recipient, message } => {
                self.handle_undelivered(recipient, &message);
            }
            KeeperEvent::Message(envelope) => {
                let sender = envelope.sender;
                let session_id = envelope.session_id;
                match envelope.message {
                    PeerMessage::BindRequest {
                        cookie,
                        bound_node_ids,
                    } => self.handle_bind_request(sender, session_id, cookie, bound_node_ids),
                    PeerMessage::BindAccepted {
                        cookie,
                        root_node_id,
                        config,
                    } => self.handle_bind_accepted(sender, session_id, cookie, root_node_id, config),
                    PeerMessage::BindRejected { cookie, reason } => {
                        self.handle_bind_rejected(sender, cookie, reason);
                    }
                    PeerMessage::BoundNodesUpdate {
                        cookie,
                        added,
                        removed,
                    } => self.handle_bound_nodes_update(sender, cookie, &added, &removed),
                    PeerMessage::ReversePush {
                        cookie,
                        root_node_id,
                        config,
                    } => self.handle_reverse_push(sender, cookie, root_node_id, config),
                    PeerMessage::Unbind { cookie } => self.handle_unbind(sender, cookie),
                    PeerMessage::ScatterRequest { task_cookie, query } => {
                        self.handle_scatter_request(sender, session_id, task_cookie, query);
                    }
                    PeerMessage::GatherReply {
                        task_cookie,
                        result,
                    } => self.handle_gather_reply(sender, task_cookie, result),
                }
            }
            KeeperEvent::QuorumCheckTimeout { task_cookie } => {
                self.handle_quorum_check_timeout(task_cookie);
            }
            KeeperEvent::Wakeup => {
                self.wakeup_scheduled = false;
                if self.root.arm_retry() {
                    tracing::debug!(node_id = %self.self_id, "retrying root sequence");
                }
                self.issue_next_bind_request();
            }
            KeeperEvent::ProcessPendingEvent => {
                tracing::debug!(node_id = %self.self_id, "no pending events to replay");
            }
        }
    }

    fn after_dispatch(&mut self) {
        self.check_root_state();
        self.reconcile_subscriptions();
        #[cfg(debug_assertions)]
        if let Err(violation) = crate::consistency::check_consistency(self) {
            panic!("node {}: consistency check failed: {violation}", self.self_id);
        }
    }

    fn reconcile_subscriptions(&mut self) {
        let stale = self
            .subscriptions
            .stale_entries(self.binding.as_ref(), &self.bound_nodes);
        for node_id in stale {
            if self.subscriptions.release(node_id) {
                tracing::debug!(node_id = %self.self_id, peer = %node_id, "releasing session subscription");
                self.emit(Command::Unsubscribe { node_id });
            }
        }
    }

    fn emit(&mut self, command: Command) {
        self.outbox.push(command);
    }

    fn send(&mut self, node_id: NodeId, session_id: SessionId, message: PeerMessage) {
        tracing::trace!(node_id = %self.self_id, peer = %node_id, message = message.kind(), "send");
        self.emit(Command::Send {
            node_id,
            session_id,
            message,
        });
    }

    /// Send to the parent if its session is up
    fn send_to_parent(&mut self, message: PeerMessage) -> bool {
        match &self.binding {
            Some(Binding {
                node_id,
                session_id: Some(session_id),
                ..
            }) => {
                let (node_id, session_id) = (*node_id, *session_id);
                self.send(node_id, session_id, message);
                true
            }
            _ => false,
        }
    }

    fn subscribe(&mut self, node_id: NodeId) {
        if self.subscriptions.subscribe(node_id) {
            self.emit(Command::Subscribe { node_id });
        }
    }

    fn persist(&mut self, config: StorageConfig) {
        self.emit(Command::StoreConfig(config));
    }

    fn allocate_binding_cookie(&mut self) -> Cookie {
        self.next_binding_cookie += 1;
        Cookie(self.next_binding_cookie)
    }

    fn schedule(&mut self, after: Duration, event: KeeperEvent) {
        self.emit(Command::Schedule { after, event });
    }
}
