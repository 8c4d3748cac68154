//! Upward binding record
//!
//! At most one per keeper: the peer this node currently treats as its parent.

use distconf_core::{Cookie, NodeId, SessionId};
use serde::Serialize;

/// This node's attachment to its parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    /// Parent node
    pub node_id: NodeId,
    /// Cookie chosen for this bind attempt
    pub cookie: Cookie,
    /// Session to the parent, once the transport reported it
    pub session_id: Option<SessionId>,
    /// Root of the tree as last reported by the parent
    pub root_node_id: Option<NodeId>,
}

impl Binding {
    /// Start a bind attempt towards `node_id`
    pub fn new(node_id: NodeId, cookie: Cookie) -> Self {
        Self {
            node_id,
            cookie,
            session_id: None,
            root_node_id: None,
        }
    }

    /// Whether the session to the parent is up
    pub fn is_connected(&self) -> bool {
        self.session_id.is_some()
    }

    /// Whether a parent message with this sender and cookie refers to this binding
    pub fn matches(&self, node_id: NodeId, cookie: Cookie) -> bool {
        self.node_id == node_id && self.cookie == cookie
    }
}
