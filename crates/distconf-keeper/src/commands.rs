//! Commands emitted by the keeper
//!
//! The keeper never talks to its collaborators directly. Each handled event
//! yields a list of commands that the runtime executes in order; results come
//! back as [`KeeperEvent`]s.

use distconf_core::{KeeperEvent, NodeId, PeerMessage, SessionId, StorageConfig};
use std::time::Duration;

/// Request to a collaborator or the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask membership for the live node list (answered with `NodeListReceived`)
    ListNodes,
    /// Load the persisted configuration (answered with `ConfigLoaded`)
    LoadConfig,
    /// Persist a configuration (answered with `ConfigStored`)
    StoreConfig(StorageConfig),
    /// Send a peer message over a session
    Send {
        /// Recipient
        node_id: NodeId,
        /// Session to send over
        session_id: SessionId,
        /// Payload
        message: PeerMessage,
    },
    /// Subscribe to the session of `node_id`
    Subscribe {
        /// Peer to watch
        node_id: NodeId,
    },
    /// Drop the session subscription of `node_id`
    Unsubscribe {
        /// Peer to forget
        node_id: NodeId,
    },
    /// Deliver `event` back to this keeper after `after`
    Schedule {
        /// Delay
        after: Duration,
        /// Event to deliver
        event: KeeperEvent,
    },
    /// Give other work a chance, then deliver `ProcessPendingEvent`
    Yield,
}

impl Command {
    /// Short name of the command kind, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Command::ListNodes => "ListNodes",
            Command::LoadConfig => "LoadConfig",
            Command::StoreConfig(_) => "StoreConfig",
            Command::Send { .. } => "Send",
            Command::Subscribe { .. } => "Subscribe",
            Command::Unsubscribe { .. } => "Unsubscribe",
            Command::Schedule { .. } => "Schedule",
            Command::Yield => "Yield",
        }
    }
}
