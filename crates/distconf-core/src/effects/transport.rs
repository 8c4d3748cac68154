//! Transport effects
//!
//! Point-to-point delivery over sessions owned by the interconnect. Inbound
//! traffic and session notifications are pushed by the transport into the
//! keeper's [`EventSink`](super::EventSink):
//! - `Message(Envelope)` for every received peer message
//! - `SessionEstablished` / `SessionLost` for subscribed peers
//! - `Undelivered` when a send could not reach its recipient

use crate::errors::Result;
use crate::messages::PeerMessage;
use crate::types::identifiers::{NodeId, SessionId};
use async_trait::async_trait;
use std::sync::Arc;

/// Session-oriented message transport
#[async_trait]
pub trait TransportEffects: Send + Sync {
    /// Send `message` to `node_id` over `session_id`
    async fn send(&self, node_id: NodeId, session_id: SessionId, message: PeerMessage)
        -> Result<()>;

    /// Ask to be notified about the session to `node_id`.
    ///
    /// The transport answers asynchronously with `SessionEstablished` (also
    /// when the session already exists) or `SessionLost`.
    async fn subscribe(&self, node_id: NodeId) -> Result<()>;

    /// Drop the subscription for `node_id`
    async fn unsubscribe(&self, node_id: NodeId) -> Result<()>;
}

#[async_trait]
impl<T: TransportEffects + ?Sized> TransportEffects for Arc<T> {
    async fn send(
        &self,
        node_id: NodeId,
        session_id: SessionId,
        message: PeerMessage,
    ) -> Result<()> {
        (**self).send(node_id, session_id, message).await
    }

    async fn subscribe(&self, node_id: NodeId) -> Result<()> {
        (**self).subscribe(node_id).await
    }

    async fn unsubscribe(&self, node_id: NodeId) -> Result<()> {
        (**self).unsubscribe(node_id).await
    }
}
