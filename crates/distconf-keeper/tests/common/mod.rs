//! Shared helpers for keeper tests

#![allow(dead_code)]

use distconf_core::{
    Cookie, Envelope, KeeperConfig, KeeperEvent, NodeId, PeerMessage, SessionId, StorageConfig,
};
use distconf_keeper::{check_consistency, Command, DistributedConfigKeeper};
use std::collections::BTreeSet;

pub fn test_config() -> KeeperConfig {
    KeeperConfig {
        rng_seed: Some(7),
        ..KeeperConfig::default()
    }
}

pub fn nodes(ids: &[u32]) -> Vec<NodeId> {
    ids.iter().copied().map(NodeId).collect()
}

pub fn id_set(ids: &[u32]) -> BTreeSet<NodeId> {
    ids.iter().copied().map(NodeId).collect()
}

/// Session used by tests for traffic with `peer`
pub fn session(peer: u32) -> SessionId {
    SessionId::from_u128(1_000 + u128::from(peer))
}

pub fn message(sender: u32, message: PeerMessage) -> KeeperEvent {
    KeeperEvent::Message(Envelope::new(NodeId(sender), session(sender), message))
}

/// A keeper that finished bootstrap with the given node list
pub fn steady_keeper(self_id: u32, node_list: &[u32]) -> DistributedConfigKeeper {
    steady_keeper_with_config(self_id, node_list, None)
}

pub fn steady_keeper_with_config(
    self_id: u32,
    node_list: &[u32],
    config: Option<StorageConfig>,
) -> DistributedConfigKeeper {
    let mut keeper = DistributedConfigKeeper::new(NodeId(self_id), test_config());
    keeper.start();
    keeper.handle(KeeperEvent::NodeListReceived(nodes(node_list)));
    keeper.handle(KeeperEvent::ConfigLoaded {
        success: true,
        config,
    });
    assert!(keeper.is_steady());
    keeper
}

/// Handle an event and verify the keeper invariants afterwards
pub fn step(keeper: &mut DistributedConfigKeeper, event: KeeperEvent) -> Vec<Command> {
    let commands = keeper.handle(event);
    if let Err(violation) = check_consistency(keeper) {
        panic!("consistency violated: {violation}");
    }
    commands
}

/// Peer messages among `commands`, with their recipients
pub fn sent(commands: &[Command]) -> Vec<(NodeId, PeerMessage)> {
    commands
        .iter()
        .filter_map(|command| match command {
            Command::Send {
                node_id, message, ..
            } => Some((*node_id, message.clone())),
            _ => None,
        })
        .collect()
}

/// Bring `keeper`'s binding to a connected, accepted state with parent `parent`.
///
/// Returns the binding cookie.
pub fn bind_to(keeper: &mut DistributedConfigKeeper, parent: u32) -> Cookie {
    let binding = keeper.binding().expect("bind attempt in progress").clone();
    assert_eq!(binding.node_id, NodeId(parent));
    let commands = step(
        keeper,
        KeeperEvent::SessionEstablished {
            node_id: NodeId(parent),
            session_id: session(parent),
        },
    );
    assert!(sent(&commands)
        .iter()
        .any(|(to, msg)| *to == NodeId(parent) && matches!(msg, PeerMessage::BindRequest { .. })));
    step(
        keeper,
        message(
            parent,
            PeerMessage::BindAccepted {
                cookie: binding.cookie,
                root_node_id: NodeId(parent),
                config: StorageConfig::empty(),
            },
        ),
    );
    binding.cookie
}

/// Have `child` bind below `keeper` with the given subtree
pub fn accept_child(
    keeper: &mut DistributedConfigKeeper,
    child: u32,
    cookie: u64,
    subtree: &[u32],
) -> Vec<Command> {
    step(
        keeper,
        message(
            child,
            PeerMessage::BindRequest {
                cookie: Cookie(cookie),
                bound_node_ids: id_set(subtree),
            },
        ),
    )
}
