//! Collaborator effect traits
//!
//! The keeper core never performs I/O itself. Runtimes implement these traits
//! (or wrap real services in them) and feed results back as
//! [`KeeperEvent`](crate::events::KeeperEvent)s through an [`EventSink`].
//!
//! Implementations exist for:
//! - Production: file-backed storage ([`crate::store::FileConfigStore`])
//! - Testing: in-memory membership, transport and storage in `distconf-testkit`

pub mod membership;
pub mod storage;
pub mod transport;

pub use membership::MembershipEffects;
pub use storage::StorageEffects;
pub use transport::TransportEffects;

use crate::events::KeeperEvent;
use crate::types::identifiers::NodeId;
use std::sync::Arc;

/// Destination for events addressed to a keeper's mailbox
pub trait EventSink: Send + Sync {
    /// Node whose mailbox this sink feeds
    fn node_id(&self) -> NodeId;

    /// Enqueue an event; delivery to a stopped keeper is silently dropped
    fn deliver(&self, event: KeeperEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn node_id(&self) -> NodeId {
        (**self).node_id()
    }

    fn deliver(&self, event: KeeperEvent) {
        (**self).deliver(event);
    }
}
