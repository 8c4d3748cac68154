//! Inbound events of a keeper
//!
//! Everything a keeper reacts to arrives as a [`KeeperEvent`]: collaborator
//! responses, transport notifications, peer messages and self-scheduled
//! timers. Events are processed strictly one at a time.

use crate::messages::{Envelope, PeerMessage};
use crate::types::identifiers::{NodeId, SessionId, TaskCookie};
use crate::types::storage_config::StorageConfig;
use serde::{Deserialize, Serialize};

/// Event delivered to a keeper's mailbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeeperEvent {
    /// Live node list from the membership collaborator
    NodeListReceived(Vec<NodeId>),
    /// Result of loading the persisted configuration
    ConfigLoaded {
        /// Whether the load succeeded
        success: bool,
        /// Loaded configuration; `None` when nothing was persisted
        config: Option<StorageConfig>,
    },
    /// Result of persisting a configuration
    ConfigStored {
        /// Whether the store succeeded
        success: bool,
        /// Generation that was written
        generation: u64,
    },
    /// A subscribed peer session is (now) established
    SessionEstablished {
        /// Peer node
        node_id: NodeId,
        /// Live session to that peer
        session_id: SessionId,
    },
    /// A subscribed peer session is gone
    SessionLost {
        /// Peer node
        node_id: NodeId,
    },
    /// A message could not be delivered
    Undelivered {
        /// Intended recipient
        recipient: NodeId,
        /// The message that was dropped
        message: PeerMessage,
    },
    /// Message from a peer keeper
    Message(Envelope),
    /// Soft timeout of a locally generated scatter task
    QuorumCheckTimeout {
        /// Task to force-complete
        task_cookie: TaskCookie,
    },
    /// Bind retry timer
    Wakeup,
    /// Replay the next buffered bootstrap event
    ProcessPendingEvent,
}

impl KeeperEvent {
    /// Short name of the event kind, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            KeeperEvent::NodeListReceived(_) => "NodeListReceived",
            KeeperEvent::ConfigLoaded { .. } => "ConfigLoaded",
            KeeperEvent::ConfigStored { .. } => "ConfigStored",
            KeeperEvent::SessionEstablished { .. } => "SessionEstablished",
            KeeperEvent::SessionLost { .. } => "SessionLost",
            KeeperEvent::Undelivered { .. } => "Undelivered",
            KeeperEvent::Message(envelope) => envelope.message.kind(),
            KeeperEvent::QuorumCheckTimeout { .. } => "QuorumCheckTimeout",
            KeeperEvent::Wakeup => "Wakeup",
            KeeperEvent::ProcessPendingEvent => "ProcessPendingEvent",
        }
    }

    /// Whether this event is one of the two bootstrap prerequisites
    pub fn is_bootstrap_prerequisite(&self) -> bool {
        matches!(
            self,
            KeeperEvent::NodeListReceived(_) | KeeperEvent::ConfigLoaded { .. }
        )
    }
}
