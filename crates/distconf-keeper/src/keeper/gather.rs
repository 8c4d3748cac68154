//! Scatter request and gather reply handling.

use super::DistributedConfigKeeper;
use crate::scatter::{CompletedTask, GatherOutcome, TaskOrigin};
use distconf_core::{GatherResult, KeeperEvent, NodeId, PeerMessage, ScatterQuery, SessionId, TaskCookie};

impl DistributedConfigKeeper {
    /// Issue a task over the current children, starting from our own answer.
    ///
    /// Locally generated tasks are bounded by the quorum check timeout.
    pub(super) fn start_scatter(
        &mut self,
        origin: Option<TaskOrigin>,
        query: ScatterQuery,
    ) -> (TaskCookie, Option<CompletedTask>) {
        let contribution = GatherResult::contribution(query, self.self_id, &self.storage_config);
        let (cookie, completed) =
            self.scatter
                .issue(origin, query, contribution, &mut self.bound_nodes);

        let targets = self
            .scatter
            .get(cookie)
            .map(|task| task.pending_nodes.clone())
            .unwrap_or_default();
        for node_id in targets {
            if let Some(session_id) = self.bound_nodes.get(node_id).map(|child| child.session_id) {
                self.send(
                    node_id,
                    session_id,
                    PeerMessage::ScatterRequest {
                        task_cookie: cookie,
                        query,
                    },
                );
            }
        }
        tracing::debug!(
            node_id = %self.self_id,
            task_cookie = %cookie,
            %query,
            local = origin.is_none(),
            "scatter issued"
        );

        if origin.is_none() && completed.is_none() {
            let timeout = self.config.quorum_check_timeout();
            self.schedule(timeout, KeeperEvent::QuorumCheckTimeout { task_cookie: cookie });
        }
        (cookie, completed)
    }

    pub(super) fn handle_scatter_request(
        &mut self,
        sender: NodeId,
        session_id: SessionId,
        task_cookie: TaskCookie,
        query: ScatterQuery,
    ) {
        let binding = self
            .binding
            .as_ref()
            .filter(|b| b.node_id == sender && b.session_id == Some(session_id));
        let Some(binding) = binding else {
            tracing::debug!(node_id = %self.self_id, peer = %sender, %task_cookie, "scatter request from non-parent");
            return;
        };
        let origin = TaskOrigin {
            node_id: sender,
            cookie: binding.cookie,
            task_cookie,
        };
        let (_, completed) = self.start_scatter(Some(origin), query);
        if let Some(task) = completed {
            self.finish_task(task);
        }
    }

    pub(super) fn handle_gather_reply(
        &mut self,
        sender: NodeId,
        task_cookie: TaskCookie,
        result: GatherResult,
    ) {
        match self
            .scatter
            .gather(task_cookie, sender, result, &mut self.bound_nodes)
        {
            GatherOutcome::Completed(task) => self.finish_task(task),
            GatherOutcome::Pending => {}
            GatherOutcome::Unknown => {
                tracing::debug!(node_id = %self.self_id, peer = %sender, %task_cookie, "gather reply for unknown task");
            }
            GatherOutcome::NotPending => {
                tracing::debug!(node_id = %self.self_id, peer = %sender, %task_cookie, "gather reply from non-pending node");
            }
        }
    }

    pub(super) fn handle_quorum_check_timeout(&mut self, task_cookie: TaskCookie) {
        match self.scatter.force_complete(task_cookie, &mut self.bound_nodes) {
            Some(task) => {
                tracing::info!(node_id = %self.self_id, %task_cookie, "scatter task timed out");
                self.finish_task(task);
            }
            None => {
                tracing::trace!(node_id = %self.self_id, %task_cookie, "timeout for finished task");
            }
        }
    }

    /// Route a finished task to the parent or to the root sequence
    pub(super) fn finish_task(&mut self, task: CompletedTask) {
        let Some(origin) = task.origin else {
            self.on_root_task_complete(task);
            return;
        };
        if origin.matches(self.binding.as_ref()) {
            let delivered = self.send_to_parent(PeerMessage::GatherReply {
                task_cookie: origin.task_cookie,
                result: task.result,
            });
            if !delivered {
                tracing::debug!(node_id = %self.self_id, task_cookie = %origin.task_cookie, "parent session down, dropping gather result");
            }
        } else {
            tracing::debug!(node_id = %self.self_id, task_cookie = %task.cookie, "origin no longer bound, dropping gather result");
        }
    }
}
