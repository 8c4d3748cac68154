//! Bound-node registry
//!
//! Tracks the direct children of this node and, per child, every node
//! reachable through it. `all_bound` is a reference-counted index over
//! `{child} ∪ child.bound_node_ids` for all children, maintained
//! incrementally; [`BoundNodeRegistry::recompute_all_bound`] rebuilds it from
//! scratch so the two can be compared.
//!
//! Every mutation returns a [`BoundNodesDelta`] describing which ids entered
//! or left the index (refcount 0→1 or 1→0). That delta is exactly what has to
//! be reported to the parent.

use distconf_core::{Cookie, NodeId, SessionId, TaskCookie};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// A directly attached child
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundNode {
    /// Cookie of the child's binding
    pub cookie: Cookie,
    /// Session the child bound over
    pub session_id: SessionId,
    /// Nodes reachable through the child, excluding the child itself
    pub bound_node_ids: BTreeSet<NodeId>,
    /// Scatter tasks waiting for this child's reply
    pub scatter_tasks: BTreeSet<TaskCookie>,
}

impl BoundNode {
    /// Create an entry for a freshly accepted child
    pub fn new(cookie: Cookie, session_id: SessionId, bound_node_ids: BTreeSet<NodeId>) -> Self {
        Self {
            cookie,
            session_id,
            bound_node_ids,
            scatter_tasks: BTreeSet::new(),
        }
    }
}

/// Ids that entered or left the all-bound index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundNodesDelta {
    /// Ids whose refcount went from zero to one
    pub added: BTreeSet<NodeId>,
    /// Ids whose refcount dropped to zero
    pub removed: BTreeSet<NodeId>,
}

impl BoundNodesDelta {
    /// Whether nothing changed
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    fn note_added(&mut self, node_id: NodeId) {
        // removing and re-adding within one operation is a no-op upstream
        if !self.removed.remove(&node_id) {
            self.added.insert(node_id);
        }
    }

    fn note_removed(&mut self, node_id: NodeId) {
        if !self.added.remove(&node_id) {
            self.removed.insert(node_id);
        }
    }
}

/// Direct children and the reference-counted index of their subtrees
#[derive(Debug, Clone, Default)]
pub struct BoundNodeRegistry {
    nodes: BTreeMap<NodeId, BoundNode>,
    all_bound: BTreeMap<NodeId, usize>,
}

impl BoundNodeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry of a direct child
    pub fn get(&self, node_id: NodeId) -> Option<&BoundNode> {
        self.nodes.get(&node_id)
    }

    pub(crate) fn get_mut(&mut self, node_id: NodeId) -> Option<&mut BoundNode> {
        self.nodes.get_mut(&node_id)
    }

    /// Whether `node_id` is a direct child
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Number of direct children
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether there are no direct children
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct children in id order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &BoundNode)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    /// Ids of the direct children
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// The incrementally maintained refcount index
    pub fn all_bound(&self) -> &BTreeMap<NodeId, usize> {
        &self.all_bound
    }

    /// Every node reachable below this one
    pub fn all_bound_ids(&self) -> BTreeSet<NodeId> {
        self.all_bound.keys().copied().collect()
    }

    /// Number of distinct nodes reachable below this one
    pub fn all_bound_count(&self) -> usize {
        self.all_bound.len()
    }

    /// Whether `node_id` is reachable below this one
    pub fn is_bound(&self, node_id: NodeId) -> bool {
        self.all_bound.contains_key(&node_id)
    }

    /// First id that would appear twice in the tree if `node_id` (re)bound
    /// with `subtree`. The existing entry of `node_id` itself is discounted,
    /// so a child re-binding with the same subtree is not a conflict.
    pub fn conflicts(&self, node_id: NodeId, subtree: &BTreeSet<NodeId>) -> Option<NodeId> {
        let own = self.nodes.get(&node_id);
        let foreign_refs = |id: NodeId| {
            let total = self.all_bound.get(&id).copied().unwrap_or(0);
            let own_refs = match own {
                Some(entry) if id == node_id || entry.bound_node_ids.contains(&id) => 1,
                _ => 0,
            };
            total.saturating_sub(own_refs)
        };
        std::iter::once(node_id)
            .chain(subtree.iter().copied())
            .find(|&id| foreign_refs(id) > 0)
    }

    /// First id in `added` that is already reachable through a different path
    /// than the child `node_id`
    pub fn update_conflicts(&self, node_id: NodeId, added: &BTreeSet<NodeId>) -> Option<NodeId> {
        let own = self.nodes.get(&node_id)?;
        added.iter().copied().find(|&id| {
            id != node_id && !own.bound_node_ids.contains(&id) && self.all_bound.contains_key(&id)
        })
    }

    /// Insert (or replace) a direct child.
    ///
    /// Returns the replaced entry, if any, and the resulting index delta.
    pub fn insert(
        &mut self,
        node_id: NodeId,
        mut node: BoundNode,
    ) -> (Option<BoundNode>, BoundNodesDelta) {
        let mut delta = BoundNodesDelta::default();
        let replaced = self.detach(node_id, &mut delta);
        node.bound_node_ids.remove(&node_id);
        self.reference(node_id, &mut delta);
        for &id in &node.bound_node_ids {
            self.reference(id, &mut delta);
        }
        self.nodes.insert(node_id, node);
        (replaced, delta)
    }

    /// Remove a direct child together with its subtree references
    pub fn remove(&mut self, node_id: NodeId) -> Option<(BoundNode, BoundNodesDelta)> {
        let mut delta = BoundNodesDelta::default();
        self.detach(node_id, &mut delta).map(|node| (node, delta))
    }

    /// Apply a subtree update reported by a direct child.
    ///
    /// Ids already present (or absent) are ignored, as is the child's own id.
    /// Returns `None` when `node_id` is not a direct child.
    pub fn apply_update(
        &mut self,
        node_id: NodeId,
        added: &BTreeSet<NodeId>,
        removed: &BTreeSet<NodeId>,
    ) -> Option<BoundNodesDelta> {
        let mut delta = BoundNodesDelta::default();
        let node = self.nodes.get_mut(&node_id)?;
        let mut referenced = Vec::new();
        let mut dereferenced = Vec::new();
        for &id in removed {
            if node.bound_node_ids.remove(&id) {
                dereferenced.push(id);
            }
        }
        for &id in added {
            if id != node_id && node.bound_node_ids.insert(id) {
                referenced.push(id);
            }
        }
        for id in dereferenced {
            self.dereference(id, &mut delta);
        }
        for id in referenced {
            self.reference(id, &mut delta);
        }
        Some(delta)
    }

    /// Record that `task` waits for a reply from `node_id`
    pub fn link_task(&mut self, node_id: NodeId, task: TaskCookie) -> bool {
        match self.nodes.get_mut(&node_id) {
            Some(node) => node.scatter_tasks.insert(task),
            None => false,
        }
    }

    /// Forget that `task` waits for `node_id`
    pub fn unlink_task(&mut self, node_id: NodeId, task: TaskCookie) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.scatter_tasks.remove(&task);
        }
    }

    /// Rebuild the refcount index from the children (O(n) fold)
    pub fn recompute_all_bound(&self) -> BTreeMap<NodeId, usize> {
        let mut counts = BTreeMap::new();
        for (&node_id, node) in &self.nodes {
            *counts.entry(node_id).or_insert(0) += 1;
            for &id in &node.bound_node_ids {
                *counts.entry(id).or_insert(0) += 1;
            }
        }
        counts
    }

    fn detach(&mut self, node_id: NodeId, delta: &mut BoundNodesDelta) -> Option<BoundNode> {
        let node = self.nodes.remove(&node_id)?;
        self.dereference(node_id, delta);
        for &id in &node.bound_node_ids {
            self.dereference(id, delta);
        }
        Some(node)
    }

    fn reference(&mut self, node_id: NodeId, delta: &mut BoundNodesDelta) {
        let count = self.all_bound.entry(node_id).or_insert(0);
        *count += 1;
        if *count == 1 {
            delta.note_added(node_id);
        }
    }

    fn dereference(&mut self, node_id: NodeId, delta: &mut BoundNodesDelta) {
        if let Some(count) = self.all_bound.get_mut(&node_id) {
            *count -= 1;
            if *count == 0 {
                self.all_bound.remove(&node_id);
                delta.note_removed(node_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[u32]) -> BTreeSet<NodeId> {
        values.iter().copied().map(NodeId).collect()
    }

    fn child(cookie: u64, subtree: &[u32]) -> BoundNode {
        BoundNode::new(Cookie(cookie), SessionId::from_u128(cookie as u128), ids(subtree))
    }

    #[test]
    fn insert_reports_child_and_subtree_as_added() {
        let mut registry = BoundNodeRegistry::new();
        let (replaced, delta) = registry.insert(NodeId(3), child(1, &[1, 2]));

        assert!(replaced.is_none());
        assert_eq!(delta.added, ids(&[1, 2, 3]));
        assert!(delta.removed.is_empty());
        assert_eq!(registry.all_bound(), &registry.recompute_all_bound());
    }

    #[test]
    fn replacing_child_only_reports_net_change() {
        let mut registry = BoundNodeRegistry::new();
        registry.insert(NodeId(3), child(1, &[1, 2]));
        let (replaced, delta) = registry.insert(NodeId(3), child(2, &[2]));

        assert_eq!(replaced.map(|n| n.cookie), Some(Cookie(1)));
        assert!(delta.added.is_empty());
        assert_eq!(delta.removed, ids(&[1]));
        assert_eq!(registry.all_bound(), &registry.recompute_all_bound());
    }

    #[test]
    fn remove_drops_all_references() {
        let mut registry = BoundNodeRegistry::new();
        registry.insert(NodeId(3), child(1, &[1]));
        registry.insert(NodeId(4), child(2, &[2]));

        let (_, delta) = registry.remove(NodeId(3)).unwrap();
        assert_eq!(delta.removed, ids(&[1, 3]));
        assert_eq!(registry.all_bound_ids(), ids(&[2, 4]));
        assert!(registry.remove(NodeId(3)).is_none());
    }

    #[test]
    fn descendant_of_other_child_is_a_conflict() {
        let mut registry = BoundNodeRegistry::new();
        registry.insert(NodeId(5), child(1, &[1, 2]));

        assert_eq!(registry.conflicts(NodeId(2), &ids(&[])), Some(NodeId(2)));
        assert_eq!(registry.conflicts(NodeId(4), &ids(&[3, 1])), Some(NodeId(1)));
        assert_eq!(registry.conflicts(NodeId(4), &ids(&[3])), None);
        // re-binding with its own subtree is fine
        assert_eq!(registry.conflicts(NodeId(5), &ids(&[1, 2])), None);
    }

    #[test]
    fn update_applies_additions_and_removals() {
        let mut registry = BoundNodeRegistry::new();
        registry.insert(NodeId(5), child(1, &[1]));

        let delta = registry
            .apply_update(NodeId(5), &ids(&[2, 5]), &ids(&[1, 9]))
            .unwrap();
        assert_eq!(delta.added, ids(&[2]));
        assert_eq!(delta.removed, ids(&[1]));
        assert_eq!(registry.get(NodeId(5)).unwrap().bound_node_ids, ids(&[2]));
        assert!(registry.apply_update(NodeId(7), &ids(&[1]), &ids(&[])).is_none());
    }

    #[test]
    fn update_adding_a_sibling_subtree_id_conflicts() {
        let mut registry = BoundNodeRegistry::new();
        registry.insert(NodeId(5), child(1, &[1]));
        registry.insert(NodeId(6), child(2, &[2]));

        assert_eq!(registry.update_conflicts(NodeId(5), &ids(&[2])), Some(NodeId(2)));
        assert_eq!(registry.update_conflicts(NodeId(5), &ids(&[1, 3])), None);
    }

    #[test]
    fn task_links_follow_children() {
        let mut registry = BoundNodeRegistry::new();
        registry.insert(NodeId(2), child(1, &[]));

        assert!(registry.link_task(NodeId(2), TaskCookie(7)));
        assert!(!registry.link_task(NodeId(3), TaskCookie(7)));
        registry.unlink_task(NodeId(2), TaskCookie(7));
        assert!(registry.get(NodeId(2)).unwrap().scatter_tasks.is_empty());
    }
}
