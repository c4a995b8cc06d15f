//! Merging a freshly requested tree into the live tree.

use rustc_hash::FxHashSet;

use crate::Identity;
use crate::invariants::ensure_invariant;
use crate::key::BlockKey;
use crate::state::NodeState;
use crate::tree::{BlockTreeNode, LiveTree, RequestedTree};

/// What the caller has to do after a merge.
#[derive(Debug)]
pub struct DiffOutcome<T> {
    /// Blocks that need a new generation task.
    pub to_render: FxHashSet<BlockKey<T>>,
    /// Size of the requested tree.
    pub total_blocks: usize,
    /// Coarse blocks that were still converging and are now superseded. They
    /// are already `Removed`; their rendered entries and tasks must go.
    pub retired: Vec<BlockKey<T>>,
}

/// Updates `live` so that it contains the requested tree plus whatever finer
/// blocks must stay on screen until their coarser replacement is ready.
///
/// Every node the new request does not reach is dropped from `live`; the
/// caller evicts rendered entries and tasks of dropped keys.
pub fn merge_requested_tree<T: Identity>(
    live: &mut LiveTree<T>,
    last_requested: &RequestedTree<T>,
    requested: &RequestedTree<T>,
) -> DiffOutcome<T> {
    let total_blocks = requested.len();

    if live.is_empty() {
        ensure_invariant!(
            last_requested.is_empty(),
            "live tree is empty but the last request had {} blocks",
            last_requested.len()
        );
        for (key, node) in requested.iter() {
            live.insert(
                key.clone(),
                BlockTreeNode::pending(node.parent.clone(), node.children.clone(), node.distance_from_camera),
            );
        }
        return DiffOutcome {
            to_render: requested.keys().cloned().collect(),
            total_blocks,
            retired: Vec::new(),
        };
    }

    let retired = retire_converging_blocks(live, last_requested, requested);

    let mut to_render = FxHashSet::default();
    let mut touched = FxHashSet::default();

    for leaf in requested.leaf_keys() {
        match live.get(&leaf).map(|node| (node.is_leaf(), node.state)) {
            Some((true, state)) => {
                ensure_invariant!(
                    state != NodeState::Removed,
                    "requested leaf {leaf:?} is a live leaf in state REMOVED"
                );
            }
            Some((false, state)) => {
                // Resolution decreases here.
                let keep_subtree = if last_requested.is_leaf(&leaf) {
                    ensure_invariant!(
                        matches!(state, NodeState::Pending | NodeState::Rendered),
                        "converging block {leaf:?} is in state {state}"
                    );
                    true
                } else if state == NodeState::Removed {
                    if let Some(node) = live.get_mut(&leaf) {
                        node.state = NodeState::Pending;
                    }
                    to_render.insert(leaf.clone());
                    true
                } else {
                    false
                };

                if keep_subtree {
                    touch_replaced_subtree(live, &leaf, &mut touched);
                }
            }
            None => insert_with_ancestors(live, requested, &leaf, &mut to_render),
        }

        requested.traverse_ancestors(&leaf, |key, _| {
            touched.insert(key.clone());
        });
    }

    live.retain_keys(&touched);

    for (key, node) in live.iter_mut() {
        node.distance_from_camera = requested
            .get(key)
            .map_or(f64::INFINITY, |requested_node| requested_node.distance_from_camera);
    }

    ensure_invariant!(
        requested.keys().all(|key| live.contains(key)),
        "live tree is missing requested blocks after the merge"
    );

    DiffOutcome {
        to_render,
        total_blocks,
        retired,
    }
}

/// A leaf of the last request that is internal in the live tree is a coarse
/// block still being generated to replace its finer subtree. If the new
/// request no longer wants it as a leaf, it is marked `Removed`.
fn retire_converging_blocks<T: Identity>(
    live: &mut LiveTree<T>,
    last_requested: &RequestedTree<T>,
    requested: &RequestedTree<T>,
) -> Vec<BlockKey<T>> {
    let mut retired = Vec::new();
    for key in last_requested.leaf_keys() {
        let Some(node) = live.get_mut(&key) else {
            ensure_invariant!(false, "last requested leaf {key:?} is not in the live tree");
            continue;
        };
        if node.is_leaf() {
            ensure_invariant!(
                node.state != NodeState::Removed,
                "last requested leaf {key:?} is a live leaf in state REMOVED"
            );
            continue;
        }
        ensure_invariant!(
            matches!(node.state, NodeState::Pending | NodeState::Rendered),
            "converging block {key:?} is in state {}",
            node.state
        );
        if !requested.is_leaf(&key) {
            node.state = NodeState::Removed;
            retired.push(key);
        }
    }
    retired
}

/// Keeps the visible finer blocks below `key` (and the removed blocks on the
/// way down to them) until `key` itself is ready.
fn touch_replaced_subtree<T: Identity>(
    live: &LiveTree<T>,
    key: &BlockKey<T>,
    touched: &mut FxHashSet<BlockKey<T>>,
) {
    live.traverse_subtree_skip_root(key, |child, node| match node.state {
        NodeState::Removed => {
            ensure_invariant!(
                !node.is_leaf(),
                "removed block {child:?} has no subtree to show in its place"
            );
            touched.insert(child.clone());
            true
        }
        NodeState::Visible => {
            touched.insert(child.clone());
            false
        }
        _ => false,
    });
}

/// Inserts `leaf` and every missing ancestor as pending nodes, linking each
/// into its parent.
fn insert_with_ancestors<T: Identity>(
    live: &mut LiveTree<T>,
    requested: &RequestedTree<T>,
    leaf: &BlockKey<T>,
    to_render: &mut FxHashSet<BlockKey<T>>,
) {
    let mut chain = Vec::new();
    requested.traverse_ancestors(leaf, |key, node| {
        chain.push((key.clone(), node.parent.clone(), node.distance_from_camera));
    });

    let mut last_child: Option<BlockKey<T>> = None;
    for (key, parent, distance) in chain {
        if !live.contains(&key) {
            to_render.insert(key.clone());
            live.insert(key.clone(), BlockTreeNode::pending(parent, FxHashSet::default(), distance));
        }
        if let (Some(child), Some(node)) = (last_child.take(), live.get_mut(&key)) {
            node.children.insert(child);
        }
        last_child = Some(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{BlockInterval, GenerationSettings};

    fn key(level: u32, x: i64) -> BlockKey<u32> {
        BlockKey::new(
            1,
            level,
            BlockInterval::new([x, 0, 0], [x, 0, 0]),
            GenerationSettings::default(),
        )
    }

    fn root() -> BlockKey<u32> {
        key(1, 0)
    }

    fn child(x: i64) -> BlockKey<u32> {
        key(0, x)
    }

    fn coarse_request() -> RequestedTree<u32> {
        let mut tree = RequestedTree::new();
        tree.insert(root(), BlockTreeNode::new(None, FxHashSet::default(), 3.0, ()));
        tree
    }

    fn fine_request() -> RequestedTree<u32> {
        let mut tree = RequestedTree::new();
        tree.insert(root(), BlockTreeNode::new(None, [child(0), child(1)].into_iter().collect(), 3.0, ()));
        tree.insert(child(0), BlockTreeNode::new(Some(root()), FxHashSet::default(), 1.0, ()));
        tree.insert(child(1), BlockTreeNode::new(Some(root()), FxHashSet::default(), 2.0, ()));
        tree
    }

    fn set_state(live: &mut LiveTree<u32>, key: &BlockKey<u32>, state: NodeState) {
        if let Some(node) = live.get_mut(key) {
            node.state = state;
        }
    }

    fn state(live: &LiveTree<u32>, key: &BlockKey<u32>) -> Option<NodeState> {
        live.get(key).map(|node| node.state)
    }

    /// An empty live tree adopts the request wholesale.
    #[test]
    fn test_first_request_adopted() {
        let mut live = LiveTree::new();
        let outcome = merge_requested_tree(&mut live, &RequestedTree::new(), &fine_request());
        assert_eq!(outcome.total_blocks, 3);
        assert_eq!(outcome.to_render.len(), 3);
        assert!(live.iter().all(|(_, node)| node.state == NodeState::Pending));
        assert!(live.validate_structure().is_ok());
    }

    /// Subdividing a visible root inserts pending children and keeps the root.
    #[test]
    fn test_resolution_increase_inserts_children() {
        let mut live = LiveTree::new();
        merge_requested_tree(&mut live, &RequestedTree::new(), &coarse_request());
        set_state(&mut live, &root(), NodeState::Visible);

        let outcome = merge_requested_tree(&mut live, &coarse_request(), &fine_request());
        let expected: FxHashSet<_> = [child(0), child(1)].into_iter().collect();
        assert_eq!(outcome.to_render, expected);
        assert_eq!(state(&live, &root()), Some(NodeState::Visible));
        assert_eq!(state(&live, &child(0)), Some(NodeState::Pending));
        assert_eq!(live.get(&root()).map(|n| n.children.len()), Some(2));
        assert!(live.validate_structure().is_ok());
    }

    /// Coarsening a removed root revives it and keeps the visible children.
    #[test]
    fn test_resolution_decrease_keeps_visible_children() {
        let mut live = LiveTree::new();
        merge_requested_tree(&mut live, &RequestedTree::new(), &fine_request());
        set_state(&mut live, &root(), NodeState::Removed);
        set_state(&mut live, &child(0), NodeState::Visible);
        set_state(&mut live, &child(1), NodeState::Visible);

        let outcome = merge_requested_tree(&mut live, &fine_request(), &coarse_request());
        assert_eq!(outcome.to_render, [root()].into_iter().collect());
        assert_eq!(state(&live, &root()), Some(NodeState::Pending));
        assert_eq!(state(&live, &child(0)), Some(NodeState::Visible));
        assert_eq!(
            live.get(&child(1)).map(|n| n.distance_from_camera),
            Some(f64::INFINITY)
        );
    }

    /// Re-subdividing while a coarse block converges retires it.
    #[test]
    fn test_converging_block_retired() {
        let mut live = LiveTree::new();
        merge_requested_tree(&mut live, &RequestedTree::new(), &fine_request());
        set_state(&mut live, &root(), NodeState::Removed);
        set_state(&mut live, &child(0), NodeState::Visible);
        set_state(&mut live, &child(1), NodeState::Visible);
        merge_requested_tree(&mut live, &fine_request(), &coarse_request());

        let outcome = merge_requested_tree(&mut live, &coarse_request(), &fine_request());
        assert_eq!(outcome.retired, vec![root()]);
        assert_eq!(state(&live, &root()), Some(NodeState::Removed));
        assert!(outcome.to_render.is_empty());
        assert_eq!(live.get(&child(0)).map(|n| n.distance_from_camera), Some(1.0));
    }

    /// Coarsening a visible parent with unfinished children drops them.
    #[test]
    fn test_unfinished_children_dropped() {
        let mut live = LiveTree::new();
        merge_requested_tree(&mut live, &RequestedTree::new(), &fine_request());
        set_state(&mut live, &root(), NodeState::Visible);

        let outcome = merge_requested_tree(&mut live, &fine_request(), &coarse_request());
        assert!(outcome.to_render.is_empty());
        assert_eq!(live.len(), 1);
        assert!(live.is_leaf(&root()));
    }

    /// Merging the same request twice changes nothing the second time.
    #[test]
    fn test_merge_is_idempotent() {
        let mut live = LiveTree::new();
        merge_requested_tree(&mut live, &RequestedTree::new(), &coarse_request());
        set_state(&mut live, &root(), NodeState::Visible);
        let first = merge_requested_tree(&mut live, &coarse_request(), &fine_request());
        let snapshot: Vec<_> = {
            let mut keys: Vec<_> = live.keys().cloned().collect();
            keys.sort_by_key(|k| (k.level, k.interval));
            keys
        };
        let second = merge_requested_tree(&mut live, &fine_request(), &fine_request());
        assert_eq!(first.to_render.len(), 2);
        assert!(second.to_render.is_empty());
        let mut keys: Vec<_> = live.keys().cloned().collect();
        keys.sort_by_key(|k| (k.level, k.interval));
        assert_eq!(keys, snapshot);
    }
}
