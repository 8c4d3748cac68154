//! Scatter-gather coordinator
//!
//! A scatter task fans a [`ScatterQuery`] out to every direct child and
//! merges their [`GatherResult`]s into its own contribution. Tasks created
//! on behalf of the parent carry a [`TaskOrigin`] so the merged result can be
//! sent back up; tasks without an origin belong to the local root sequence.
//!
//! Each pending child also records the task cookie in its
//! [`BoundNode::scatter_tasks`](crate::bound_nodes::BoundNode) so that losing
//! the child resolves its share of every task.

use crate::binding::Binding;
use crate::bound_nodes::BoundNodeRegistry;
use distconf_core::{Cookie, GatherResult, NodeId, ScatterQuery, TaskCookie};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Parent task a child task reports to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskOrigin {
    /// Parent node
    pub node_id: NodeId,
    /// Binding cookie at the time the request arrived
    pub cookie: Cookie,
    /// Parent's task cookie to answer with
    pub task_cookie: TaskCookie,
}

impl TaskOrigin {
    /// Whether the origin still refers to the current binding
    pub fn matches(&self, binding: Option<&Binding>) -> bool {
        binding.map_or(false, |b| b.matches(self.node_id, self.cookie))
    }
}

/// An in-flight scatter task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScatterTask {
    /// Task cookie
    pub cookie: TaskCookie,
    /// Parent task, `None` for locally generated tasks
    pub origin: Option<TaskOrigin>,
    /// Query being answered
    pub query: ScatterQuery,
    /// Children that have not replied yet
    pub pending_nodes: BTreeSet<NodeId>,
    /// Merged result so far
    pub result: GatherResult,
}

/// A task that finished, either by collecting every reply or by force
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTask {
    /// Task cookie
    pub cookie: TaskCookie,
    /// Parent task, if any
    pub origin: Option<TaskOrigin>,
    /// Final merged result
    pub result: GatherResult,
    /// Completed by timeout while replies were still missing
    pub forced: bool,
}

/// Effect of applying a gather reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatherOutcome {
    /// Reply merged, more replies outstanding
    Pending,
    /// Reply merged and the task completed
    Completed(CompletedTask),
    /// No such task
    Unknown,
    /// The sender is not pending for this task
    NotPending,
}

/// Owner of all scatter tasks of a keeper
#[derive(Debug, Clone, Default)]
pub struct ScatterCoordinator {
    tasks: BTreeMap<TaskCookie, ScatterTask>,
    next_cookie: u64,
}

impl ScatterCoordinator {
    /// Create a coordinator with no tasks
    pub fn new() -> Self {
        Self::default()
    }

    /// Task by cookie
    pub fn get(&self, cookie: TaskCookie) -> Option<&ScatterTask> {
        self.tasks.get(&cookie)
    }

    /// All tasks in cookie order
    pub fn iter(&self) -> impl Iterator<Item = &ScatterTask> {
        self.tasks.values()
    }

    /// Number of in-flight tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is in flight
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Whether any locally generated task is in flight
    pub fn has_local_tasks(&self) -> bool {
        self.tasks.values().any(|task| task.origin.is_none())
    }

    /// Create a task pending on every current child.
    ///
    /// Returns the completed task right away when there are no children.
    pub fn issue(
        &mut self,
        origin: Option<TaskOrigin>,
        query: ScatterQuery,
        contribution: GatherResult,
        bound_nodes: &mut BoundNodeRegistry,
    ) -> (TaskCookie, Option<CompletedTask>) {
        self.next_cookie += 1;
        let cookie = TaskCookie(self.next_cookie);
        let pending_nodes: BTreeSet<NodeId> = bound_nodes.node_ids().collect();

        if pending_nodes.is_empty() {
            let completed = CompletedTask {
                cookie,
                origin,
                result: contribution,
                forced: false,
            };
            return (cookie, Some(completed));
        }

        for &node_id in &pending_nodes {
            bound_nodes.link_task(node_id, cookie);
        }
        self.tasks.insert(
            cookie,
            ScatterTask {
                cookie,
                origin,
                query,
                pending_nodes,
                result: contribution,
            },
        );
        (cookie, None)
    }

    /// Apply a reply from `sender`
    pub fn gather(
        &mut self,
        cookie: TaskCookie,
        sender: NodeId,
        result: GatherResult,
        bound_nodes: &mut BoundNodeRegistry,
    ) -> GatherOutcome {
        let Some(task) = self.tasks.get_mut(&cookie) else {
            return GatherOutcome::Unknown;
        };
        if !task.pending_nodes.remove(&sender) {
            return GatherOutcome::NotPending;
        }
        bound_nodes.unlink_task(sender, cookie);
        if !task.result.merge(result) {
            tracing::warn!(
                task_cookie = %cookie,
                peer = %sender,
                query = %task.query,
                "gather reply answers a different query, counting it as empty"
            );
        }
        if task.pending_nodes.is_empty() {
            self.finish(cookie, false)
                .map_or(GatherOutcome::Unknown, GatherOutcome::Completed)
        } else {
            GatherOutcome::Pending
        }
    }

    /// Resolve `node_id`'s share of `tasks` as an empty reply.
    ///
    /// The child is expected to be already removed from the registry.
    pub fn node_gone(
        &mut self,
        node_id: NodeId,
        tasks: impl IntoIterator<Item = TaskCookie>,
    ) -> Vec<CompletedTask> {
        let mut completed = Vec::new();
        for cookie in tasks {
            let Some(task) = self.tasks.get_mut(&cookie) else {
                continue;
            };
            if task.pending_nodes.remove(&node_id) && task.pending_nodes.is_empty() {
                completed.extend(self.finish(cookie, false));
            }
        }
        completed
    }

    /// Complete a task with whatever has been gathered so far
    pub fn force_complete(
        &mut self,
        cookie: TaskCookie,
        bound_nodes: &mut BoundNodeRegistry,
    ) -> Option<CompletedTask> {
        let task = self.tasks.get(&cookie)?;
        for &node_id in &task.pending_nodes {
            bound_nodes.unlink_task(node_id, cookie);
        }
        self.finish(cookie, true)
    }

    /// Drop every task matching `predicate` without completing it
    pub fn cancel_where(
        &mut self,
        predicate: impl Fn(&ScatterTask) -> bool,
        bound_nodes: &mut BoundNodeRegistry,
    ) -> Vec<TaskCookie> {
        let cancelled: Vec<TaskCookie> = self
            .tasks
            .values()
            .filter(|task| predicate(task))
            .map(|task| task.cookie)
            .collect();
        for cookie in &cancelled {
            if let Some(task) = self.tasks.remove(cookie) {
                for node_id in task.pending_nodes {
                    bound_nodes.unlink_task(node_id, *cookie);
                }
            }
        }
        cancelled
    }

    fn finish(&mut self, cookie: TaskCookie, forced: bool) -> Option<CompletedTask> {
        self.tasks.remove(&cookie).map(|task| CompletedTask {
            cookie,
            origin: task.origin,
            result: task.result,
            forced,
        })
    }
}
