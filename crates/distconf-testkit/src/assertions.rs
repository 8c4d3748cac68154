//! Cluster-level convergence checks
//!
//! Works on [`KeeperStatus`] snapshots so the same check applies to the
//! simulator and to a running [`LocalCluster`](crate::local::LocalCluster).

use distconf_keeper::KeeperStatus;
use std::collections::BTreeSet;
use std::fmt;

/// Outcome of a convergence check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvergenceReport {
    /// Nodes without a parent
    pub roots: Vec<u32>,
    /// Every reason the cluster is not converged
    pub problems: Vec<String>,
}

impl ConvergenceReport {
    /// No problems found
    pub fn is_converged(&self) -> bool {
        self.problems.is_empty()
    }

    /// The single root, when converged
    pub fn root(&self) -> Option<u32> {
        match self.roots.as_slice() {
            [root] if self.is_converged() => Some(*root),
            _ => None,
        }
    }
}

impl fmt::Display for ConvergenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_converged() {
            return write!(f, "converged under root {:?}", self.roots);
        }
        writeln!(f, "not converged (roots {:?}):", self.roots)?;
        for problem in &self.problems {
            writeln!(f, "  - {problem}")?;
        }
        Ok(())
    }
}

/// Check that `statuses` describe one settled tree sharing one config.
///
/// Converged means: every keeper is steady, exactly one has no parent, that
/// root reaches every other node, everyone agrees on the root and the
/// config, and no scatter task is in flight.
pub fn convergence_report(statuses: &[KeeperStatus]) -> ConvergenceReport {
    let mut report = ConvergenceReport {
        roots: statuses
            .iter()
            .filter(|status| status.parent.is_none())
            .map(|status| status.node_id)
            .collect(),
        problems: Vec::new(),
    };
    if statuses.is_empty() {
        report.problems.push("no live nodes".to_string());
        return report;
    }

    for status in statuses {
        let node = status.node_id;
        if !status.steady {
            report.problems.push(format!("node {node} still bootstrapping"));
        }
        if status.parent.is_some() && !status.parent_connected {
            report.problems.push(format!("node {node} has no parent session"));
        }
        if status.scatter_tasks > 0 {
            report
                .problems
                .push(format!("node {node} has {} scatter tasks in flight", status.scatter_tasks));
        }
    }

    let [root] = report.roots.as_slice() else {
        report
            .problems
            .push(format!("expected one root, found {}", report.roots.len()));
        return report;
    };
    let root = *root;

    if let Some(root_status) = statuses.iter().find(|status| status.node_id == root) {
        let reachable: BTreeSet<u32> = root_status.all_bound.iter().copied().collect();
        let missing: Vec<u32> = statuses
            .iter()
            .map(|status| status.node_id)
            .filter(|id| *id != root && !reachable.contains(id))
            .collect();
        if !missing.is_empty() {
            report
                .problems
                .push(format!("root {root} does not reach {missing:?}"));
        }
        if root_status.root_state != "INITIAL" {
            report
                .problems
                .push(format!("root {root} still in {}", root_status.root_state));
        }

        for status in statuses {
            if status.root_node_id != root {
                report.problems.push(format!(
                    "node {} believes the root is {}",
                    status.node_id, status.root_node_id
                ));
            }
            if status.config_generation != root_status.config_generation
                || status.config_fingerprint != root_status.config_fingerprint
            {
                report.problems.push(format!(
                    "node {} holds config {}@{} but root has {}@{}",
                    status.node_id,
                    status.config_fingerprint,
                    status.config_generation,
                    root_status.config_fingerprint,
                    root_status.config_generation
                ));
            }
        }
    }
    report
}

/// Panic with the report unless `statuses` are converged
pub fn assert_converged(statuses: &[KeeperStatus]) -> u32 {
    let report = convergence_report(statuses);
    match report.root() {
        Some(root) => root,
        None => panic!("{report}"),
    }
}
