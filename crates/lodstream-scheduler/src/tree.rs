//! Key-indexed block trees.
//!
//! Nodes are owned by the tree's map and refer to each other only by key, so
//! "does this node still exist" is a single lookup and removal never leaves a
//! dangling reference behind.

use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::InvariantViolation;
use crate::invariants::describe;
use crate::key::BlockKey;
use crate::state::NodeState;

/// A node of a [`BlockTree`]. `S` is per-node state (`()` for stateless trees).
#[derive(Clone, Debug)]
pub struct BlockTreeNode<K, S = ()> {
    pub parent: Option<K>,
    pub children: FxHashSet<K>,
    pub distance_from_camera: f64,
    pub state: S,
}

impl<K, S> BlockTreeNode<K, S> {
    pub fn new(parent: Option<K>, children: FxHashSet<K>, distance_from_camera: f64, state: S) -> Self {
        Self {
            parent,
            children,
            distance_from_camera,
            state,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

impl<K> BlockTreeNode<K, NodeState> {
    /// A freshly inserted live node, always pending.
    pub fn pending(parent: Option<K>, children: FxHashSet<K>, distance_from_camera: f64) -> Self {
        Self::new(parent, children, distance_from_camera, NodeState::Pending)
    }
}

/// Mapping from key to node. Root keys are nodes without a parent.
#[derive(Clone, Debug)]
pub struct BlockTree<K, S = ()> {
    nodes: FxHashMap<K, BlockTreeNode<K, S>>,
}

/// The stateless requested tree of one identity.
pub type RequestedTree<T> = BlockTree<BlockKey<T>>;

/// The stateful live tree of one identity.
pub type LiveTree<T> = BlockTree<BlockKey<T>, NodeState>;

impl<K, S> Default for BlockTree<K, S> {
    fn default() -> Self {
        Self {
            nodes: FxHashMap::default(),
        }
    }
}

impl<K, S> BlockTree<K, S>
where
    K: Clone + Eq + Hash + fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&BlockTreeNode<K, S>> {
        self.nodes.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut BlockTreeNode<K, S>> {
        self.nodes.get_mut(key)
    }

    /// Inserts a node without touching its neighbours' links.
    pub fn insert(&mut self, key: K, node: BlockTreeNode<K, S>) -> Option<BlockTreeNode<K, S>> {
        self.nodes.insert(key, node)
    }

    /// Removes a node without touching its neighbours' links.
    pub fn remove(&mut self, key: &K) -> Option<BlockTreeNode<K, S>> {
        self.nodes.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.nodes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &BlockTreeNode<K, S>)> {
        self.nodes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut BlockTreeNode<K, S>)> {
        self.nodes.iter_mut()
    }

    pub fn root_keys(&self) -> Vec<K> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn leaf_keys(&self) -> Vec<K> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.is_leaf())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// `true` if the node exists and has no parent.
    pub fn is_root(&self, key: &K) -> bool {
        self.nodes.get(key).is_some_and(|node| node.parent.is_none())
    }

    /// `true` if the node exists and has no children.
    pub fn is_leaf(&self, key: &K) -> bool {
        self.nodes.get(key).is_some_and(BlockTreeNode::is_leaf)
    }

    /// Visits `key` and then each of its ancestors up to the root.
    pub fn traverse_ancestors(&self, key: &K, mut visit: impl FnMut(&K, &BlockTreeNode<K, S>)) {
        let mut cursor = Some(key);
        while let Some(current) = cursor {
            let Some(node) = self.nodes.get(current) else {
                break;
            };
            visit(current, node);
            cursor = node.parent.as_ref();
        }
    }

    /// Breadth-first traversal of the subtree rooted at `key`. The visitor
    /// returns whether to descend into the visited node's children.
    pub fn traverse_subtree(&self, key: &K, mut visit: impl FnMut(&K, &BlockTreeNode<K, S>) -> bool) {
        let mut queue = VecDeque::from([key.clone()]);
        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            if visit(&current, node) {
                queue.extend(node.children.iter().cloned());
            }
        }
    }

    /// Like [`traverse_subtree`](Self::traverse_subtree) but skips `key` itself.
    pub fn traverse_subtree_skip_root(
        &self,
        key: &K,
        mut visit: impl FnMut(&K, &BlockTreeNode<K, S>) -> bool,
    ) {
        let Some(root) = self.nodes.get(key) else {
            return;
        };
        let mut queue: VecDeque<K> = root.children.iter().cloned().collect();
        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            if visit(&current, node) {
                queue.extend(node.children.iter().cloned());
            }
        }
    }

    /// All descendants of `key`, excluding `key`.
    pub fn descendants(&self, key: &K) -> Vec<K> {
        let mut keys = Vec::new();
        self.traverse_subtree_skip_root(key, |child, _| {
            keys.push(child.clone());
            true
        });
        keys
    }

    /// `true` if `ancestor` lies strictly above `key`.
    pub fn is_ancestor(&self, ancestor: &K, key: &K) -> bool {
        let mut cursor = self.nodes.get(key).and_then(|node| node.parent.as_ref());
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.nodes.get(current).and_then(|node| node.parent.as_ref());
        }
        false
    }

    /// Keeps only the nodes in `keep` and prunes children lists to match.
    pub fn retain_keys(&mut self, keep: &FxHashSet<K>) {
        self.nodes.retain(|key, _| keep.contains(key));
        for node in self.nodes.values_mut() {
            node.children.retain(|child| keep.contains(child));
        }
    }

    /// Checks that parent and child links agree in both directions.
    pub fn validate_structure(&self) -> Result<(), InvariantViolation> {
        for (key, node) in &self.nodes {
            if let Some(parent_key) = &node.parent {
                let Some(parent) = self.nodes.get(parent_key) else {
                    return Err(InvariantViolation::MissingParent {
                        key: describe(key),
                        parent: describe(parent_key),
                    });
                };
                if !parent.children.contains(key) {
                    return Err(InvariantViolation::BrokenParentLink {
                        key: describe(key),
                        parent: describe(parent_key),
                    });
                }
            }

            for child_key in &node.children {
                let Some(child) = self.nodes.get(child_key) else {
                    return Err(InvariantViolation::MissingChild {
                        key: describe(key),
                        child: describe(child_key),
                    });
                };
                if child.parent.as_ref() != Some(key) {
                    return Err(InvariantViolation::BrokenChildLink {
                        key: describe(key),
                        child: describe(child_key),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(keys: &[u32]) -> FxHashSet<u32> {
        keys.iter().copied().collect()
    }

    /// Root 0 with children 1 and 2; 2 has child 3.
    fn sample() -> BlockTree<u32> {
        let mut tree = BlockTree::new();
        tree.insert(0, BlockTreeNode::new(None, set(&[1, 2]), 5.0, ()));
        tree.insert(1, BlockTreeNode::new(Some(0), set(&[]), 4.0, ()));
        tree.insert(2, BlockTreeNode::new(Some(0), set(&[3]), 3.0, ()));
        tree.insert(3, BlockTreeNode::new(Some(2), set(&[]), 2.0, ()));
        tree
    }

    /// Roots and leaves are derived from the links.
    #[test]
    fn test_roots_and_leaves() {
        let tree = sample();
        assert_eq!(tree.root_keys(), vec![0]);
        let mut leaves = tree.leaf_keys();
        leaves.sort();
        assert_eq!(leaves, vec![1, 3]);
        assert!(tree.is_root(&0));
        assert!(!tree.is_leaf(&2));
        assert!(!tree.is_leaf(&42));
    }

    /// Ancestor traversal starts at the node itself and ends at the root.
    #[test]
    fn test_traverse_ancestors_order() {
        let tree = sample();
        let mut visited = Vec::new();
        tree.traverse_ancestors(&3, |key, _| visited.push(*key));
        assert_eq!(visited, vec![3, 2, 0]);
    }

    /// Subtree traversal can stop descending below a node.
    #[test]
    fn test_traverse_subtree_pruned() {
        let tree = sample();
        let mut visited = Vec::new();
        tree.traverse_subtree(&0, |key, _| {
            visited.push(*key);
            *key != 2
        });
        visited.sort();
        assert_eq!(visited, vec![0, 1, 2]);
    }

    /// Descendants exclude the starting node.
    #[test]
    fn test_descendants_skip_root() {
        let tree = sample();
        let mut desc = tree.descendants(&0);
        desc.sort();
        assert_eq!(desc, vec![1, 2, 3]);
        assert!(tree.is_ancestor(&0, &3));
        assert!(!tree.is_ancestor(&1, &3));
    }

    /// Retaining a subset prunes dangling child links.
    #[test]
    fn test_retain_keys_prunes_children() {
        let mut tree = sample();
        tree.retain_keys(&set(&[0, 1]));
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.get(&0).map(|n| n.children.clone()), Some(set(&[1])));
        assert!(tree.validate_structure().is_ok());
    }

    /// A child whose parent does not list it is reported.
    #[test]
    fn test_validate_detects_broken_parent_link() {
        let mut tree = sample();
        if let Some(root) = tree.get_mut(&0) {
            root.children.remove(&1);
        }
        assert!(matches!(
            tree.validate_structure(),
            Err(InvariantViolation::BrokenParentLink { .. })
        ));
    }

    /// A listed child that is missing is reported.
    #[test]
    fn test_validate_detects_missing_child() {
        let mut tree = sample();
        tree.remove(&3);
        assert!(matches!(
            tree.validate_structure(),
            Err(InvariantViolation::MissingChild { .. })
        ));
    }
}
