//! Tree Management Tests
//!
//! Binding, child admission, subtree updates and disconnect handling of a
//! single keeper, driven event by event.

mod common;

use assert_matches::assert_matches;
use common::*;
use distconf_core::{
    Cookie, GatherResult, KeeperEvent, NodeId, PeerMessage, RejectReason, ScatterQuery,
    StorageConfig, TaskCookie,
};
use distconf_keeper::{Command, RootState};
use std::collections::BTreeMap;
use std::time::Duration;

fn scatter_cookie(commands: &[Command], to: u32) -> TaskCookie {
    sent(commands)
        .into_iter()
        .find_map(|(recipient, msg)| match msg {
            PeerMessage::ScatterRequest { task_cookie, .. } if recipient == NodeId(to) => {
                Some(task_cookie)
            }
            _ => None,
        })
        .expect("scatter request sent")
}

fn gather_replies(commands: &[Command]) -> Vec<(TaskCookie, GatherResult)> {
    sent(commands)
        .into_iter()
        .filter_map(|(_, msg)| match msg {
            PeerMessage::GatherReply {
                task_cookie,
                result,
            } => Some((task_cookie, result)),
            _ => None,
        })
        .collect()
}

fn reachable(ids: &[u32]) -> GatherResult {
    GatherResult::Reachable {
        node_ids: id_set(ids),
    }
}

#[test]
fn bind_request_from_existing_descendant_is_rejected() {
    let mut keeper = steady_keeper(5, &[1, 2, 3, 4, 5]);
    accept_child(&mut keeper, 3, 1, &[1]);

    let commands = accept_child(&mut keeper, 1, 7, &[]);
    assert_eq!(
        sent(&commands),
        vec![(
            NodeId(1),
            PeerMessage::BindRejected {
                cookie: Cookie(7),
                reason: RejectReason::TopologyConflict,
            }
        )]
    );
    assert_eq!(keeper.bound_nodes().node_ids().collect::<Vec<_>>(), nodes(&[3]));
    assert_eq!(keeper.bound_nodes().all_bound_ids(), id_set(&[1, 3]));

    // claiming an existing child as part of a new subtree is just as bad
    let commands = accept_child(&mut keeper, 4, 9, &[3]);
    assert_matches!(
        sent(&commands).as_slice(),
        [(NodeId(4), PeerMessage::BindRejected { reason: RejectReason::TopologyConflict, .. })]
    );
}

#[test]
fn child_rebinding_with_same_subtree_is_accepted() {
    let mut keeper = steady_keeper(5, &[1, 2, 3, 4, 5]);
    accept_child(&mut keeper, 3, 1, &[1]);

    let commands = accept_child(&mut keeper, 3, 2, &[1]);
    assert_matches!(
        sent(&commands).first(),
        Some((NodeId(3), PeerMessage::BindAccepted { cookie: Cookie(2), .. }))
    );
    assert_eq!(keeper.bound_nodes().get(NodeId(3)).map(|c| c.cookie), Some(Cookie(2)));
}

#[test]
fn unknown_sender_and_cycles_are_rejected() {
    let mut keeper = steady_keeper(3, &[1, 2, 3, 4]);
    bind_to(&mut keeper, 4);

    let cases = [
        (9, &[][..], RejectReason::UnknownNode),
        (4, &[][..], RejectReason::Cycle),
        (1, &[4][..], RejectReason::Cycle),
        (2, &[3][..], RejectReason::Cycle),
    ];
    for (sender, subtree, expected) in cases {
        let commands = accept_child(&mut keeper, sender, 50, subtree);
        assert_eq!(
            sent(&commands),
            vec![(
                NodeId(sender),
                PeerMessage::BindRejected {
                    cookie: Cookie(50),
                    reason: expected,
                }
            )],
            "sender {sender}"
        );
    }
    assert!(keeper.bound_nodes().is_empty());
}

#[test]
fn accepted_child_is_reported_to_parent() {
    let mut keeper = steady_keeper(3, &[1, 2, 3, 4]);
    let cookie = bind_to(&mut keeper, 4);

    let commands = accept_child(&mut keeper, 1, 1, &[]);
    let messages = sent(&commands);
    assert!(messages.contains(&(
        NodeId(1),
        PeerMessage::BindAccepted {
            cookie: Cookie(1),
            root_node_id: NodeId(4),
            config: StorageConfig::empty(),
        }
    )));
    assert!(messages.contains(&(
        NodeId(4),
        PeerMessage::BoundNodesUpdate {
            cookie,
            added: id_set(&[1]),
            removed: id_set(&[]),
        }
    )));
    assert!(commands.contains(&Command::Subscribe { node_id: NodeId(1) }));
}

#[test]
fn child_disconnect_completes_both_pending_tasks() {
    let mut keeper = steady_keeper(3, &[1, 2, 3, 4]);
    let cookie = bind_to(&mut keeper, 4);
    accept_child(&mut keeper, 1, 1, &[]);

    for parent_task in [100, 101] {
        step(
            &mut keeper,
            message(
                4,
                PeerMessage::ScatterRequest {
                    task_cookie: TaskCookie(parent_task),
                    query: ScatterQuery::CollectReachable,
                },
            ),
        );
    }
    assert_eq!(keeper.scatter().len(), 2);
    assert_eq!(keeper.bound_nodes().get(NodeId(1)).unwrap().scatter_tasks.len(), 2);

    let commands = step(&mut keeper, KeeperEvent::SessionLost { node_id: NodeId(1) });
    assert_eq!(
        gather_replies(&commands),
        vec![(TaskCookie(100), reachable(&[3])), (TaskCookie(101), reachable(&[3]))]
    );
    assert!(sent(&commands).contains(&(
        NodeId(4),
        PeerMessage::BoundNodesUpdate {
            cookie,
            added: id_set(&[]),
            removed: id_set(&[1]),
        }
    )));
    assert!(keeper.scatter().is_empty());
    assert!(keeper.bound_nodes().is_empty());
}

#[test]
fn gather_replies_are_merged_and_forwarded_upward() {
    let mut keeper = steady_keeper(3, &[1, 2, 3, 4]);
    bind_to(&mut keeper, 4);
    accept_child(&mut keeper, 1, 1, &[]);

    let commands = step(
        &mut keeper,
        message(
            4,
            PeerMessage::ScatterRequest {
                task_cookie: TaskCookie(77),
                query: ScatterQuery::CollectReachable,
            },
        ),
    );
    let local = scatter_cookie(&commands, 1);

    // a reply from a node the task is not waiting for changes nothing
    assert!(step(
        &mut keeper,
        message(2, PeerMessage::GatherReply { task_cookie: local, result: reachable(&[2]) })
    )
    .is_empty());

    let commands = step(
        &mut keeper,
        message(1, PeerMessage::GatherReply { task_cookie: local, result: reachable(&[1]) }),
    );
    assert_eq!(gather_replies(&commands), vec![(TaskCookie(77), reachable(&[1, 3]))]);
}

#[test]
fn scatter_request_from_non_parent_is_ignored() {
    let mut keeper = steady_keeper(3, &[1, 2, 3, 4]);
    bind_to(&mut keeper, 4);

    let commands = step(
        &mut keeper,
        message(
            2,
            PeerMessage::ScatterRequest {
                task_cookie: TaskCookie(1),
                query: ScatterQuery::CollectConfigs,
            },
        ),
    );
    assert!(commands.is_empty());
    assert!(keeper.scatter().is_empty());
}

#[test]
fn stale_bind_acceptance_is_answered_with_unbind() {
    let mut keeper = steady_keeper(3, &[1, 2, 3, 4]);
    let cookie = bind_to(&mut keeper, 4);
    let stale = Cookie(cookie.0 + 10);

    let commands = step(
        &mut keeper,
        message(
            4,
            PeerMessage::BindAccepted {
                cookie: stale,
                root_node_id: NodeId(4),
                config: StorageConfig::empty(),
            },
        ),
    );
    assert_eq!(sent(&commands), vec![(NodeId(4), PeerMessage::Unbind { cookie: stale })]);
    assert_eq!(keeper.binding().map(|b| b.cookie), Some(cookie));
}

#[test]
fn matching_rejection_aborts_binding_and_schedules_retry() {
    let mut keeper = steady_keeper(3, &[1, 2, 3, 4]);
    let cookie = keeper.binding().unwrap().cookie;

    // a rejection for some other attempt is ignored
    step(
        &mut keeper,
        message(4, PeerMessage::BindRejected { cookie: Cookie(cookie.0 + 1), reason: RejectReason::Cycle }),
    );
    assert!(keeper.binding().is_some());

    let commands = step(
        &mut keeper,
        message(4, PeerMessage::BindRejected { cookie, reason: RejectReason::TopologyConflict }),
    );
    assert!(keeper.binding().is_none());
    assert!(sent(&commands).is_empty());
    assert!(commands.contains(&Command::Unsubscribe { node_id: NodeId(4) }));
    let delays: Vec<Duration> = commands
        .iter()
        .filter_map(|command| match command {
            Command::Schedule { after, event: KeeperEvent::Wakeup } => Some(*after),
            _ => None,
        })
        .collect();
    assert_eq!(delays.len(), 1);
    assert!(delays[0] >= Duration::from_millis(100) && delays[0] <= Duration::from_millis(1_000));

    let commands = step(&mut keeper, KeeperEvent::Wakeup);
    assert!(commands.contains(&Command::Subscribe { node_id: NodeId(4) }));
    assert_ne!(keeper.binding().map(|b| b.cookie), Some(cookie));
}

#[test]
fn parent_session_loss_resets_and_retries_once() {
    let mut keeper = steady_keeper(3, &[1, 2, 3, 4]);
    bind_to(&mut keeper, 4);

    let commands = step(&mut keeper, KeeperEvent::SessionLost { node_id: NodeId(4) });
    assert!(keeper.is_root());
    assert_eq!(keeper.root_state().state, RootState::Initial);
    let wakeups = commands
        .iter()
        .filter(|c| matches!(c, Command::Schedule { event: KeeperEvent::Wakeup, .. }))
        .count();
    assert_eq!(wakeups, 1);
}

#[test]
fn acquiring_binding_cancels_root_round() {
    let mut keeper = steady_keeper(3, &[1, 2, 3]);
    accept_child(&mut keeper, 1, 1, &[]);
    accept_child(&mut keeper, 2, 2, &[]);
    assert_eq!(keeper.root_state().state, RootState::QuorumCheckTimeout);
    assert!(keeper.scatter().has_local_tasks());

    step(&mut keeper, KeeperEvent::NodeListReceived(nodes(&[1, 2, 3, 4])));
    assert_eq!(keeper.binding().map(|b| b.node_id), Some(NodeId(4)));
    assert_eq!(keeper.root_state().state, RootState::Initial);
    assert!(!keeper.scatter().has_local_tasks());
    assert!(keeper.bound_nodes().get(NodeId(1)).unwrap().scatter_tasks.is_empty());
}

#[test]
fn conflicting_subtree_update_evicts_child() {
    let mut keeper = steady_keeper(5, &[1, 2, 3, 4, 5]);
    accept_child(&mut keeper, 3, 1, &[1]);
    accept_child(&mut keeper, 4, 2, &[2]);

    // wrong cookie: ignored
    step(
        &mut keeper,
        message(4, PeerMessage::BoundNodesUpdate { cookie: Cookie(9), added: id_set(&[1]), removed: id_set(&[]) }),
    );
    assert_eq!(keeper.bound_nodes().len(), 2);

    let commands = step(
        &mut keeper,
        message(4, PeerMessage::BoundNodesUpdate { cookie: Cookie(2), added: id_set(&[1]), removed: id_set(&[]) }),
    );
    assert!(sent(&commands).contains(&(
        NodeId(4),
        PeerMessage::BindRejected { cookie: Cookie(2), reason: RejectReason::TopologyConflict }
    )));
    assert!(commands.contains(&Command::Unsubscribe { node_id: NodeId(4) }));
    assert_eq!(keeper.bound_nodes().all_bound_ids(), id_set(&[1, 3]));
}

#[test]
fn valid_subtree_update_is_applied() {
    let mut keeper = steady_keeper(5, &[1, 2, 3, 4, 5]);
    accept_child(&mut keeper, 3, 1, &[1]);

    step(
        &mut keeper,
        message(3, PeerMessage::BoundNodesUpdate { cookie: Cookie(1), added: id_set(&[2]), removed: id_set(&[1]) }),
    );
    assert_eq!(keeper.bound_nodes().all_bound_ids(), id_set(&[2, 3]));
}

#[test]
fn membership_change_evicts_departed_children_and_parent() {
    let mut keeper = steady_keeper(3, &[1, 2, 3, 4]);
    let cookie = bind_to(&mut keeper, 4);
    accept_child(&mut keeper, 1, 1, &[]);
    accept_child(&mut keeper, 2, 2, &[]);

    let commands = step(&mut keeper, KeeperEvent::NodeListReceived(nodes(&[2, 3])));
    let messages = sent(&commands);
    assert!(messages.contains(&(NodeId(4), PeerMessage::Unbind { cookie })));
    assert!(messages.contains(&(
        NodeId(1),
        PeerMessage::BindRejected { cookie: Cookie(1), reason: RejectReason::UnknownNode }
    )));
    assert!(keeper.is_root());
    assert_eq!(keeper.bound_nodes().node_ids().collect::<Vec<_>>(), nodes(&[2]));
}

#[test]
fn reverse_push_applies_only_newer_generations() {
    let mut keeper = steady_keeper(3, &[1, 2, 3, 4]);
    let cookie = bind_to(&mut keeper, 4);
    accept_child(&mut keeper, 1, 1, &[]);

    let newer = StorageConfig::new(2, b"b".to_vec());
    let commands = step(
        &mut keeper,
        message(4, PeerMessage::ReversePush { cookie, root_node_id: NodeId(4), config: Some(newer.clone()) }),
    );
    assert!(commands.contains(&Command::StoreConfig(newer.clone())));
    assert!(sent(&commands).contains(&(
        NodeId(1),
        PeerMessage::ReversePush { cookie: Cookie(1), root_node_id: NodeId(4), config: Some(newer.clone()) }
    )));
    assert_eq!(keeper.storage_config(), &newer);

    let commands = step(
        &mut keeper,
        message(4, PeerMessage::ReversePush {
            cookie,
            root_node_id: NodeId(4),
            config: Some(StorageConfig::new(1, b"a".to_vec())),
        }),
    );
    assert!(commands.is_empty());
    assert_eq!(keeper.storage_config(), &newer);

    // a root change alone is still forwarded
    let commands = step(
        &mut keeper,
        message(4, PeerMessage::ReversePush { cookie, root_node_id: NodeId(9), config: None }),
    );
    assert_eq!(
        sent(&commands),
        vec![(NodeId(1), PeerMessage::ReversePush { cookie: Cookie(1), root_node_id: NodeId(9), config: None })]
    );
    assert_eq!(keeper.root_node_id(), NodeId(9));
}

#[test]
fn root_round_proposes_highest_generation_above_every_copy() {
    let mut keeper = steady_keeper(3, &[1, 2, 3]);
    let commands = accept_child(&mut keeper, 1, 1, &[]);
    let quorum_task = scatter_cookie(&commands, 1);

    let commands = step(
        &mut keeper,
        message(1, PeerMessage::GatherReply { task_cookie: quorum_task, result: reachable(&[1]) }),
    );
    assert_eq!(keeper.root_state().state, RootState::CollectConfig);
    let collect = scatter_cookie(&commands, 1);

    let theirs = StorageConfig::new(5, b"x".to_vec());
    let commands = step(
        &mut keeper,
        message(
            1,
            PeerMessage::GatherReply {
                task_cookie: collect,
                result: GatherResult::Configs { configs: BTreeMap::from([(NodeId(1), theirs)]) },
            },
        ),
    );
    let proposed = StorageConfig::new(6, b"x".to_vec());
    assert!(commands.contains(&Command::StoreConfig(proposed.clone())));
    assert_eq!(keeper.root_state().state, RootState::ProposeNewStorageConfig);
    // adopted only once persisted
    assert_eq!(keeper.storage_config().generation, 0);

    let commands = step(&mut keeper, KeeperEvent::ConfigStored { success: true, generation: 6 });
    assert_eq!(
        sent(&commands),
        vec![(
            NodeId(1),
            PeerMessage::ReversePush { cookie: Cookie(1), root_node_id: NodeId(3), config: Some(proposed.clone()) }
        )]
    );
    assert_eq!(keeper.root_state().state, RootState::Initial);
    assert_eq!(keeper.storage_config(), &proposed);
}

fn schedules_wakeup(commands: &[Command]) -> bool {
    commands
        .iter()
        .any(|c| matches!(c, Command::Schedule { event: KeeperEvent::Wakeup, .. }))
}

#[test]
fn failed_store_keeps_previous_config_and_retries() {
    let mut keeper = steady_keeper(3, &[1, 2, 3]);
    let before = keeper.storage_config().clone();
    let commands = accept_child(&mut keeper, 1, 1, &[]);
    let quorum_task = scatter_cookie(&commands, 1);
    let commands = step(
        &mut keeper,
        message(1, PeerMessage::GatherReply { task_cookie: quorum_task, result: reachable(&[1]) }),
    );
    let collect = scatter_cookie(&commands, 1);
    let theirs = StorageConfig::new(5, b"x".to_vec());
    step(
        &mut keeper,
        message(
            1,
            PeerMessage::GatherReply {
                task_cookie: collect,
                result: GatherResult::Configs { configs: BTreeMap::from([(NodeId(1), theirs)]) },
            },
        ),
    );
    assert_eq!(keeper.root_state().state, RootState::ProposeNewStorageConfig);

    let commands = step(&mut keeper, KeeperEvent::ConfigStored { success: false, generation: 6 });
    assert!(sent(&commands).is_empty());
    assert!(schedules_wakeup(&commands));
    assert_eq!(keeper.storage_config(), &before);
    assert_eq!(keeper.root_state().state, RootState::Initial);
    assert_eq!(keeper.root_state().proposed, None);

    let commands = step(&mut keeper, KeeperEvent::Wakeup);
    assert_eq!(keeper.root_state().state, RootState::QuorumCheckTimeout);
    assert_matches!(
        sent(&commands).as_slice(),
        [(NodeId(1), PeerMessage::ScatterRequest { query: ScatterQuery::CollectReachable, .. })]
    );
}

#[test]
fn quorum_check_timeout_without_replies_returns_to_initial() {
    let mut keeper = steady_keeper(3, &[1, 2, 3]);
    let commands = accept_child(&mut keeper, 1, 1, &[]);
    let quorum_task = scatter_cookie(&commands, 1);
    assert!(commands.iter().any(|c| matches!(
        c,
        Command::Schedule { event: KeeperEvent::QuorumCheckTimeout { task_cookie }, .. } if *task_cookie == quorum_task
    )));

    let commands = step(&mut keeper, KeeperEvent::QuorumCheckTimeout { task_cookie: quorum_task });
    assert_eq!(keeper.root_state().state, RootState::Initial);
    assert!(keeper.scatter().is_empty());
    assert!(schedules_wakeup(&commands));

    // a late reply for the abandoned task is ignored
    let commands = step(
        &mut keeper,
        message(1, PeerMessage::GatherReply { task_cookie: quorum_task, result: reachable(&[1]) }),
    );
    assert!(commands.is_empty());

    // the retry starts a fresh round with a new task
    let commands = step(&mut keeper, KeeperEvent::Wakeup);
    assert_eq!(keeper.root_state().state, RootState::QuorumCheckTimeout);
    let retried = scatter_cookie(&commands, 1);
    assert_ne!(retried, quorum_task);

    step(&mut keeper, message(1, PeerMessage::GatherReply { task_cookie: retried, result: reachable(&[1]) }));
    assert_eq!(keeper.root_state().state, RootState::CollectConfig);
}
