//! Membership effects
//!
//! The membership collaborator resolves the live node set. It answers the
//! one-shot bootstrap query and may later push refreshed lists as
//! `NodeListReceived` events.

use crate::errors::Result;
use crate::types::identifiers::NodeId;
use async_trait::async_trait;
use std::sync::Arc;

/// Live node list provider
#[async_trait]
pub trait MembershipEffects: Send + Sync {
    /// Current live node ids, including the local node
    async fn list_live_nodes(&self) -> Result<Vec<NodeId>>;
}

#[async_trait]
impl<T: MembershipEffects + ?Sized> MembershipEffects for Arc<T> {
    async fn list_live_nodes(&self) -> Result<Vec<NodeId>> {
        (**self).list_live_nodes().await
    }
}
