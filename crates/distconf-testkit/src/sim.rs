//! Deterministic cluster simulator
//!
//! Runs a set of [`DistributedConfigKeeper`]s in one thread. Every command a
//! keeper emits is executed against simulated collaborators:
//!
//! - one global FIFO of pending events, so messages between a pair of nodes
//!   keep their order
//! - a virtual clock for scheduled events, advanced only when the FIFO is
//!   empty
//! - a session per unordered node pair, dropped when either side dies
//! - a persisted config per node that survives restarts
//!
//! Keeper invariants are audited after every step.

use crate::assertions::{convergence_report, ConvergenceReport};
use distconf_core::{
    DistconfError, Envelope, KeeperConfig, KeeperEvent, NodeId, SessionId, StorageConfig,
};
use distconf_keeper::{check_consistency, Command, ConsistencyViolation, DistributedConfigKeeper, KeeperStatus};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

/// Failure of a simulation run
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// The cluster kept producing events past the step budget
    #[error("cluster still active after {steps} steps")]
    StepLimit {
        /// Budget that was exhausted
        steps: usize,
    },
    /// A keeper broke one of its invariants
    #[error("node {node_id} violated an invariant after {event}: {violation}")]
    Consistency {
        /// Offending node
        node_id: NodeId,
        /// Kind of the event that was being handled
        event: &'static str,
        /// What was broken
        violation: ConsistencyViolation,
    },
}

#[derive(Debug)]
struct SimNode {
    keeper: DistributedConfigKeeper,
    alive: bool,
}

/// In-process cluster of keepers with simulated collaborators
#[derive(Debug)]
pub struct SimCluster {
    config: KeeperConfig,
    nodes: BTreeMap<NodeId, SimNode>,
    storage: BTreeMap<NodeId, StorageConfig>,
    failing_loads: BTreeSet<NodeId>,
    queue: VecDeque<(NodeId, KeeperEvent)>,
    timers: BTreeMap<(u64, u64), (NodeId, KeeperEvent)>,
    timer_seq: u64,
    now_ms: u64,
    sessions: BTreeMap<(NodeId, NodeId), SessionId>,
    next_session: u128,
    subscriptions: BTreeSet<(NodeId, NodeId)>,
    steps: usize,
}

impl SimCluster {
    /// Create a cluster; keepers are not started until [`Self::start`]
    pub fn new(node_ids: impl IntoIterator<Item = NodeId>, config: KeeperConfig) -> Self {
        let nodes = node_ids
            .into_iter()
            .map(|id| {
                let keeper = DistributedConfigKeeper::new(id, node_config(&config, id));
                (id, SimNode { keeper, alive: true })
            })
            .collect();
        Self {
            config,
            nodes,
            storage: BTreeMap::new(),
            failing_loads: BTreeSet::new(),
            queue: VecDeque::new(),
            timers: BTreeMap::new(),
            timer_seq: 0,
            now_ms: 0,
            sessions: BTreeMap::new(),
            next_session: 1,
            subscriptions: BTreeSet::new(),
            steps: 0,
        }
    }

    /// Cluster of nodes `1..=count`
    pub fn with_nodes(count: u32, config: KeeperConfig) -> Self {
        Self::new((1..=count).map(NodeId), config)
    }

    /// Seed the persisted config of `node_id` before it starts
    pub fn persist(&mut self, node_id: NodeId, config: StorageConfig) -> &mut Self {
        self.storage.insert(node_id, config);
        self
    }

    /// Like [`persist`](Self::persist), but rejects nodes outside the cluster
    pub fn try_persist(
        &mut self,
        node_id: NodeId,
        config: StorageConfig,
    ) -> distconf_core::Result<&mut Self> {
        if !self.nodes.contains_key(&node_id) {
            return Err(DistconfError::invalid(format!(
                "node {node_id} is not part of the simulated cluster"
            )));
        }
        Ok(self.persist(node_id, config))
    }

    /// Make config loads of `node_id` fail
    pub fn fail_loads(&mut self, node_id: NodeId) -> &mut Self {
        self.failing_loads.insert(node_id);
        self
    }

    /// Start every keeper
    pub fn start(&mut self) {
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for node_id in ids {
            self.start_node(node_id);
        }
    }

    fn start_node(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        let commands = node.keeper.start();
        self.execute(node_id, commands);
    }

    /// Deliver `event` to `node_id` at the back of the queue
    pub fn inject(&mut self, node_id: NodeId, event: KeeperEvent) {
        self.queue.push_back((node_id, event));
    }

    /// Process one event; `Ok(false)` once nothing is left
    pub fn step(&mut self) -> Result<bool, SimError> {
        let Some((node_id, event)) = self.next_event() else {
            return Ok(false);
        };
        self.steps += 1;
        let Some(node) = self.nodes.get_mut(&node_id).filter(|node| node.alive) else {
            tracing::trace!(%node_id, event = event.kind(), "dropping event for dead node");
            return Ok(true);
        };
        let kind = event.kind();
        let commands = node.keeper.handle(event);
        check_consistency(&node.keeper).map_err(|violation| SimError::Consistency {
            node_id,
            event: kind,
            violation,
        })?;
        self.execute(node_id, commands);
        Ok(true)
    }

    fn next_event(&mut self) -> Option<(NodeId, KeeperEvent)> {
        if let Some(next) = self.queue.pop_front() {
            return Some(next);
        }
        let ((at_ms, _), next) = self.timers.pop_first()?;
        self.now_ms = self.now_ms.max(at_ms);
        Some(next)
    }

    /// Step until both the queue and the timers are empty.
    ///
    /// Returns the number of steps taken.
    pub fn run_until_quiescent(&mut self, max_steps: usize) -> Result<usize, SimError> {
        let mut taken = 0;
        while self.step()? {
            taken += 1;
            if taken >= max_steps {
                return Err(SimError::StepLimit { steps: max_steps });
            }
        }
        Ok(taken)
    }

    /// Crash `node_id`: its sessions drop and the survivors get a new node list
    pub fn kill(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        if !node.alive {
            return;
        }
        node.alive = false;
        tracing::info!(%node_id, "killing node");

        self.sessions.retain(|&(a, b), _| a != node_id && b != node_id);
        self.queue.retain(|(to, event)| {
            *to != node_id && !matches!(event, KeeperEvent::Message(envelope) if envelope.sender == node_id)
        });
        self.timers.retain(|_, (to, _)| *to != node_id);

        let watchers: Vec<NodeId> = self
            .subscriptions
            .iter()
            .filter(|&&(subscriber, target)| target == node_id && subscriber != node_id)
            .map(|&(subscriber, _)| subscriber)
            .collect();
        self.subscriptions
            .retain(|&(subscriber, target)| subscriber != node_id && target != node_id);
        for watcher in watchers {
            self.queue
                .push_back((watcher, KeeperEvent::SessionLost { node_id }));
        }
        self.broadcast_node_list(None);
    }

    /// Bring a killed node back with a fresh keeper and its persisted config
    pub fn restart(&mut self, node_id: NodeId) {
        let config = node_config(&self.config, node_id);
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        if node.alive {
            return;
        }
        tracing::info!(%node_id, "restarting node");
        node.keeper = DistributedConfigKeeper::new(node_id, config);
        node.alive = true;
        self.start_node(node_id);
        self.broadcast_node_list(Some(node_id));
    }

    fn broadcast_node_list(&mut self, except: Option<NodeId>) {
        let alive = self.alive_nodes();
        for &node_id in &alive {
            if Some(node_id) != except {
                self.queue
                    .push_back((node_id, KeeperEvent::NodeListReceived(alive.clone())));
            }
        }
    }

    fn execute(&mut self, node_id: NodeId, commands: Vec<Command>) {
        for command in commands {
            self.execute_one(node_id, command);
        }
    }

    fn execute_one(&mut self, node_id: NodeId, command: Command) {
        match command {
            Command::ListNodes => {
                let alive = self.alive_nodes();
                self.queue
                    .push_back((node_id, KeeperEvent::NodeListReceived(alive)));
            }
            Command::LoadConfig => {
                let event = if self.failing_loads.contains(&node_id) {
                    KeeperEvent::ConfigLoaded {
                        success: false,
                        config: None,
                    }
                } else {
                    KeeperEvent::ConfigLoaded {
                        success: true,
                        config: self.storage.get(&node_id).cloned(),
                    }
                };
                self.queue.push_back((node_id, event));
            }
            Command::StoreConfig(config) => {
                let generation = config.generation;
                self.storage.insert(node_id, config);
                self.queue.push_back((
                    node_id,
                    KeeperEvent::ConfigStored {
                        success: true,
                        generation,
                    },
                ));
            }
            Command::Send {
                node_id: recipient,
                session_id,
                message,
            } => {
                let delivered = self.is_alive(recipient)
                    && self.sessions.get(&pair(node_id, recipient)) == Some(&session_id);
                if delivered {
                    let envelope = Envelope::new(node_id, session_id, message);
                    self.queue
                        .push_back((recipient, KeeperEvent::Message(envelope)));
                } else {
                    tracing::trace!(%node_id, peer = %recipient, kind = message.kind(), "undelivered");
                    self.queue
                        .push_back((node_id, KeeperEvent::Undelivered { recipient, message }));
                }
            }
            Command::Subscribe { node_id: peer } => {
                let event = if self.is_alive(peer) {
                    self.subscriptions.insert((node_id, peer));
                    KeeperEvent::SessionEstablished {
                        node_id: peer,
                        session_id: self.session(node_id, peer),
                    }
                } else {
                    KeeperEvent::SessionLost { node_id: peer }
                };
                self.queue.push_back((node_id, event));
            }
            Command::Unsubscribe { node_id: peer } => {
                self.subscriptions.remove(&(node_id, peer));
            }
            Command::Schedule { after, event } => {
                let at_ms = self.now_ms + duration_ms(after);
                self.timer_seq += 1;
                self.timers.insert((at_ms, self.timer_seq), (node_id, event));
            }
            Command::Yield => {
                self.queue
                    .push_back((node_id, KeeperEvent::ProcessPendingEvent));
            }
        }
    }

    fn session(&mut self, a: NodeId, b: NodeId) -> SessionId {
        let next = &mut self.next_session;
        *self.sessions.entry(pair(a, b)).or_insert_with(|| {
            let session = SessionId::from_u128(*next);
            *next += 1;
            session
        })
    }

    fn is_alive(&self, node_id: NodeId) -> bool {
        self.nodes.get(&node_id).is_some_and(|node| node.alive)
    }

    /// Ids of the live nodes
    pub fn alive_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.alive)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Keeper of `node_id`, dead or alive
    pub fn keeper(&self, node_id: NodeId) -> Option<&DistributedConfigKeeper> {
        self.nodes.get(&node_id).map(|node| &node.keeper)
    }

    /// Persisted config of `node_id`
    pub fn persisted(&self, node_id: NodeId) -> Option<&StorageConfig> {
        self.storage.get(&node_id)
    }

    /// Live nodes without a parent
    pub fn roots(&self) -> BTreeSet<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.alive && node.keeper.binding().is_none())
            .map(|(&id, _)| id)
            .collect()
    }

    /// Status snapshots of the live nodes
    pub fn statuses(&self) -> Vec<KeeperStatus> {
        self.nodes
            .values()
            .filter(|node| node.alive)
            .map(|node| KeeperStatus::capture(&node.keeper))
            .collect()
    }

    /// Convergence report over the live nodes
    pub fn convergence(&self) -> ConvergenceReport {
        convergence_report(&self.statuses())
    }

    /// Virtual time elapsed
    pub fn now(&self) -> Duration {
        Duration::from_millis(self.now_ms)
    }

    /// Events processed so far
    pub fn steps(&self) -> usize {
        self.steps
    }
}

/// Session key of an unordered node pair
fn pair(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Per-node seed derived from the cluster seed
fn node_config(config: &KeeperConfig, node_id: NodeId) -> KeeperConfig {
    KeeperConfig {
        rng_seed: config
            .rng_seed
            .map(|seed| seed.wrapping_add(u64::from(node_id.get()))),
        ..config.clone()
    }
}
