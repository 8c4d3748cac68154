//! Consistency checker
//!
//! Pure audit over a keeper's state. Debug builds run it after every
//! steady-state event; tests and the simulator call it directly.

use crate::keeper::DistributedConfigKeeper;
use crate::root::RootState;
use distconf_core::{NodeId, SessionId, TaskCookie};
use thiserror::Error;

/// A broken invariant of the keeper state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyViolation {
    /// Incremental refcount index differs from the fold over children
    #[error("all-bound index diverged from children (id {node_id}: incremental {incremental}, expected {expected})")]
    AllBoundMismatch {
        /// First differing id
        node_id: NodeId,
        /// Count in the incremental index
        incremental: usize,
        /// Count from the fold
        expected: usize,
    },
    /// An id is reachable through more than one path
    #[error("node {node_id} referenced {count} times in the tree")]
    DuplicateInTree {
        /// Duplicated id
        node_id: NodeId,
        /// Reference count
        count: usize,
    },
    /// This node appears in its own subtree
    #[error("local node appears in its own subtree")]
    SelfInTree,
    /// A child or the parent is not a known node
    #[error("{role} {node_id} is not in the known node set")]
    UnknownPeer {
        /// `parent` or `child`
        role: &'static str,
        /// Offending id
        node_id: NodeId,
    },
    /// A task waits for a node that does not list it, or vice versa
    #[error("scatter task {task_cookie} and child {node_id} are not linked both ways")]
    TaskLinkBroken {
        /// Task cookie
        task_cookie: TaskCookie,
        /// Child id
        node_id: NodeId,
    },
    /// A task created for the parent refers to a different binding
    #[error("scatter task {task_cookie} has an origin that does not match the binding")]
    StaleOrigin {
        /// Task cookie
        task_cookie: TaskCookie,
    },
    /// A local task exists while bound or while the root machine is idle
    #[error("local scatter task {task_cookie} exists outside an active root round")]
    StrayLocalTask {
        /// Task cookie
        task_cookie: TaskCookie,
    },
    /// A bound node runs the root sequence
    #[error("root state is {state} while bound to a parent")]
    BoundWhileRootActive {
        /// Offending state
        state: RootState,
    },
    /// Subscription session disagrees with the binding or child session
    #[error("subscription to {node_id} has session {subscribed:?} but {expected} is in use")]
    SessionMismatch {
        /// Peer id
        node_id: NodeId,
        /// Session recorded by the subscription
        subscribed: Option<SessionId>,
        /// Session recorded by the binding or child
        expected: SessionId,
    },
    /// Subscription with a session but neither binding nor child
    #[error("subscription to {node_id} is not explained by the binding or a child")]
    UnexplainedSubscription {
        /// Peer id
        node_id: NodeId,
    },
    /// Binding or child without a subscription
    #[error("{role} {node_id} is not subscribed")]
    MissingSubscription {
        /// `parent` or `child`
        role: &'static str,
        /// Peer id
        node_id: NodeId,
    },
}

/// Check every structural invariant of `keeper`
pub fn check_consistency(keeper: &DistributedConfigKeeper) -> Result<(), ConsistencyViolation> {
    check_all_bound(keeper)?;
    check_known_peers(keeper)?;
    check_task_links(keeper)?;
    check_task_owners(keeper)?;
    check_subscriptions(keeper)
}

fn check_all_bound(keeper: &DistributedConfigKeeper) -> Result<(), ConsistencyViolation> {
    let registry = keeper.bound_nodes();
    let incremental = registry.all_bound();
    let expected = registry.recompute_all_bound();
    let ids = incremental.keys().chain(expected.keys());
    for &node_id in ids {
        let (have, want) = (
            incremental.get(&node_id).copied().unwrap_or(0),
            expected.get(&node_id).copied().unwrap_or(0),
        );
        if have != want {
            return Err(ConsistencyViolation::AllBoundMismatch {
                node_id,
                incremental: have,
                expected: want,
            });
        }
    }
    if let Some((&node_id, &count)) = incremental.iter().find(|&(_, &count)| count != 1) {
        return Err(ConsistencyViolation::DuplicateInTree { node_id, count });
    }
    if incremental.contains_key(&keeper.self_id()) {
        return Err(ConsistencyViolation::SelfInTree);
    }
    Ok(())
}

fn check_known_peers(keeper: &DistributedConfigKeeper) -> Result<(), ConsistencyViolation> {
    let known = keeper.node_ids();
    if let Some(binding) = keeper.binding() {
        if !known.contains(&binding.node_id) {
            return Err(ConsistencyViolation::UnknownPeer {
                role: "parent",
                node_id: binding.node_id,
            });
        }
    }
    match keeper.bound_nodes().node_ids().find(|id| !known.contains(id)) {
        Some(node_id) => Err(ConsistencyViolation::UnknownPeer {
            role: "child",
            node_id,
        }),
        None => Ok(()),
    }
}

fn check_task_links(keeper: &DistributedConfigKeeper) -> Result<(), ConsistencyViolation> {
    let registry = keeper.bound_nodes();
    for task in keeper.scatter().iter() {
        for &node_id in &task.pending_nodes {
            let linked = registry
                .get(node_id)
                .is_some_and(|child| child.scatter_tasks.contains(&task.cookie));
            if !linked {
                return Err(ConsistencyViolation::TaskLinkBroken {
                    task_cookie: task.cookie,
                    node_id,
                });
            }
        }
    }
    for (node_id, child) in registry.iter() {
        for &task_cookie in &child.scatter_tasks {
            let linked = keeper
                .scatter()
                .get(task_cookie)
                .is_some_and(|task| task.pending_nodes.contains(&node_id));
            if !linked {
                return Err(ConsistencyViolation::TaskLinkBroken {
                    task_cookie,
                    node_id,
                });
            }
        }
    }
    Ok(())
}

fn check_task_owners(keeper: &DistributedConfigKeeper) -> Result<(), ConsistencyViolation> {
    let binding = keeper.binding();
    let state = keeper.root_state().state;
    if binding.is_some() && state != RootState::Initial {
        return Err(ConsistencyViolation::BoundWhileRootActive { state });
    }
    for task in keeper.scatter().iter() {
        match &task.origin {
            Some(origin) if !origin.matches(binding) => {
                return Err(ConsistencyViolation::StaleOrigin {
                    task_cookie: task.cookie,
                });
            }
            None if binding.is_some() || state == RootState::Initial => {
                return Err(ConsistencyViolation::StrayLocalTask {
                    task_cookie: task.cookie,
                });
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_subscriptions(keeper: &DistributedConfigKeeper) -> Result<(), ConsistencyViolation> {
    let binding = keeper.binding();
    let registry = keeper.bound_nodes();
    let subscriptions = keeper.subscriptions();

    for (node_id, subscribed) in subscriptions.iter() {
        let mut explained = false;
        if let Some(binding) = binding.filter(|b| b.node_id == node_id) {
            if let (Some(expected), Some(actual)) = (binding.session_id, subscribed) {
                if expected != actual {
                    return Err(ConsistencyViolation::SessionMismatch {
                        node_id,
                        subscribed,
                        expected,
                    });
                }
            }
            explained = true;
        }
        if let Some(child) = registry.get(node_id) {
            if subscribed.is_some_and(|actual| actual != child.session_id) {
                return Err(ConsistencyViolation::SessionMismatch {
                    node_id,
                    subscribed,
                    expected: child.session_id,
                });
            }
            explained = true;
        }
        if !explained && subscribed.is_some() {
            return Err(ConsistencyViolation::UnexplainedSubscription { node_id });
        }
    }

    if let Some(binding) = binding {
        if !subscriptions.contains(binding.node_id) {
            return Err(ConsistencyViolation::MissingSubscription {
                role: "parent",
                node_id: binding.node_id,
            });
        }
    }
    match registry.node_ids().find(|&id| !subscriptions.contains(id)) {
        Some(node_id) => Err(ConsistencyViolation::MissingSubscription {
            role: "child",
            node_id,
        }),
        None => Ok(()),
    }
}
