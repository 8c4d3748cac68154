//! Peer message vocabulary
//!
//! Messages exchanged between keeper instances over transport sessions.
//! Binary encoding is handled by [`crate::wire`].

use crate::types::identifiers::{Cookie, NodeId, SessionId, TaskCookie};
use crate::types::storage_config::StorageConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Why a parent refused (or evicted) a child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// The requesting node is not in the parent's known node set
    UnknownNode,
    /// Accepting would close a cycle through the parent
    Cycle,
    /// A node id would appear twice in the tree
    TopologyConflict,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::UnknownNode => write!(f, "unknown node"),
            RejectReason::Cycle => write!(f, "cycle"),
            RejectReason::TopologyConflict => write!(f, "topology conflict"),
        }
    }
}

/// Query fanned out by a scatter task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScatterQuery {
    /// Report every node reachable through the subtree (quorum check)
    CollectReachable,
    /// Report every reachable node's locally persisted configuration
    CollectConfigs,
}

impl fmt::Display for ScatterQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScatterQuery::CollectReachable => write!(f, "CollectReachable"),
            ScatterQuery::CollectConfigs => write!(f, "CollectConfigs"),
        }
    }
}

/// Aggregated reply of a scatter task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatherResult {
    /// Nodes that answered the reachability query
    Reachable {
        /// Responding node ids
        node_ids: BTreeSet<NodeId>,
    },
    /// Persisted configuration per responding node
    Configs {
        /// Configuration reported by each node
        configs: BTreeMap<NodeId, StorageConfig>,
    },
}

impl GatherResult {
    /// A single node's own answer to `query`
    pub fn contribution(query: ScatterQuery, node_id: NodeId, config: &StorageConfig) -> Self {
        match query {
            ScatterQuery::CollectReachable => GatherResult::Reachable {
                node_ids: BTreeSet::from([node_id]),
            },
            ScatterQuery::CollectConfigs => GatherResult::Configs {
                configs: BTreeMap::from([(node_id, config.clone())]),
            },
        }
    }

    /// Query this result answers
    pub fn query(&self) -> ScatterQuery {
        match self {
            GatherResult::Reachable { .. } => ScatterQuery::CollectReachable,
            GatherResult::Configs { .. } => ScatterQuery::CollectConfigs,
        }
    }

    /// Merge a partial result from a subtree.
    ///
    /// Returns `false` (and leaves `self` unchanged) when `other` answers a
    /// different query.
    pub fn merge(&mut self, other: GatherResult) -> bool {
        match (self, other) {
            (
                GatherResult::Reachable { node_ids },
                GatherResult::Reachable { node_ids: theirs },
            ) => {
                node_ids.extend(theirs);
                true
            }
            (GatherResult::Configs { configs }, GatherResult::Configs { configs: theirs }) => {
                configs.extend(theirs);
                true
            }
            _ => false,
        }
    }

    /// Number of nodes represented in this result
    pub fn node_count(&self) -> usize {
        match self {
            GatherResult::Reachable { node_ids } => node_ids.len(),
            GatherResult::Configs { configs } => configs.len(),
        }
    }
}

/// Messages exchanged between keepers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage {
    /// Child asks to attach below the recipient, reporting its whole subtree
    BindRequest {
        /// Cookie chosen by the child for this binding
        cookie: Cookie,
        /// Every node currently reachable through the child
        bound_node_ids: BTreeSet<NodeId>,
    },
    /// Parent accepted the binding
    BindAccepted {
        /// Echo of the child's cookie
        cookie: Cookie,
        /// Root as currently known by the parent
        root_node_id: NodeId,
        /// Parent's current configuration
        config: StorageConfig,
    },
    /// Parent refused the binding, or evicts an already accepted child
    BindRejected {
        /// Echo of the child's cookie
        cookie: Cookie,
        /// Reason of the rejection
        reason: RejectReason,
    },
    /// Child reports changes of its subtree
    BoundNodesUpdate {
        /// Binding cookie
        cookie: Cookie,
        /// Nodes that became reachable through the child
        added: BTreeSet<NodeId>,
        /// Nodes no longer reachable through the child
        removed: BTreeSet<NodeId>,
    },
    /// Parent pushes root information and configuration down the tree
    ReversePush {
        /// Binding cookie
        cookie: Cookie,
        /// Root as currently known by the parent
        root_node_id: NodeId,
        /// Configuration to apply, if any
        config: Option<StorageConfig>,
    },
    /// Child detaches from the parent
    Unbind {
        /// Binding cookie
        cookie: Cookie,
    },
    /// Fan-out of a scatter task
    ScatterRequest {
        /// Cookie of the sender's task
        task_cookie: TaskCookie,
        /// The distributed query
        query: ScatterQuery,
    },
    /// Aggregated subtree answer to a scatter request
    GatherReply {
        /// Cookie of the task being answered
        task_cookie: TaskCookie,
        /// Merged subtree result
        result: GatherResult,
    },
}

impl PeerMessage {
    /// Short name of the message kind, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::BindRequest { .. } => "BindRequest",
            PeerMessage::BindAccepted { .. } => "BindAccepted",
            PeerMessage::BindRejected { .. } => "BindRejected",
            PeerMessage::BoundNodesUpdate { .. } => "BoundNodesUpdate",
            PeerMessage::ReversePush { .. } => "ReversePush",
            PeerMessage::Unbind { .. } => "Unbind",
            PeerMessage::ScatterRequest { .. } => "ScatterRequest",
            PeerMessage::GatherReply { .. } => "GatherReply",
        }
    }
}

/// A peer message together with its transport addressing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sending node
    pub sender: NodeId,
    /// Session the message travelled over
    pub session_id: SessionId,
    /// Payload
    pub message: PeerMessage,
}

impl Envelope {
    /// Wrap a message
    pub fn new(sender: NodeId, session_id: SessionId, message: PeerMessage) -> Self {
        Self {
            sender,
            session_id,
            message,
        }
    }
}
