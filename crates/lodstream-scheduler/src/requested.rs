//! Construction of the requested tree of one identity from the scene-level
//! tree supplied by the camera/LOD policy.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::Identity;
use crate::engine::SpatialIndex;
use crate::grid::BlockGrid;
use crate::key::{BlockKey, GenerationSettings, SceneKey};
use crate::tree::{BlockTree, BlockTreeNode, RequestedTree};

/// Everything a scene update needs, shared by all identities.
#[derive(Clone, Debug)]
pub struct SceneUpdateParams {
    /// Blocks the view wants, with their camera distances.
    pub scene_tree: BlockTree<SceneKey>,
    /// Renderer block grid for each level, indexed by level.
    pub grids: Vec<BlockGrid>,
    pub settings: GenerationSettings,
}

impl SceneUpdateParams {
    pub fn new(scene_tree: BlockTree<SceneKey>, grids: Vec<BlockGrid>, settings: GenerationSettings) -> Self {
        Self {
            scene_tree,
            grids,
            settings,
        }
    }
}

/// Builds the tree of blocks of `id` the scene wants right now.
///
/// Scene nodes the identity has no data for are dropped. A leaf whose scene
/// node was subdivided upstream is dropped too, together with any parent that
/// loses its last child this way, so coarse geometry never covers a region
/// where finer data was expected.
pub fn build_requested_tree<T: Identity>(
    id: &T,
    index: &dyn SpatialIndex<T>,
    params: &SceneUpdateParams,
) -> RequestedTree<T> {
    let scene = &params.scene_tree;
    let mut mapping: FxHashMap<SceneKey, BlockKey<T>> = FxHashMap::default();

    let finest_scene_level = scene.keys().map(|key| key.level).min();
    if let Some(finest_scene_level) = finest_scene_level {
        for level in (finest_scene_level..index.num_levels()).rev() {
            let Some(grid) = params.grids.get(level as usize) else {
                tracing::warn!(level, "no renderer grid for level, skipping");
                continue;
            };
            for interval in index.blocks_for(level, id) {
                for block_index in grid.intersecting_blocks(&interval) {
                    let scene_key = SceneKey::new(level, block_index);
                    if mapping.contains_key(&scene_key) || !scene.contains(&scene_key) {
                        continue;
                    }
                    let key = BlockKey::new(
                        id.clone(),
                        level,
                        grid.cell_interval(block_index),
                        params.settings,
                    );
                    mapping.insert(scene_key, key);
                }
            }
        }
    }

    let mut requested = RequestedTree::new();
    for (scene_key, key) in &mapping {
        let Some(scene_node) = scene.get(scene_key) else {
            continue;
        };
        let parent = scene_node
            .parent
            .as_ref()
            .and_then(|parent| mapping.get(parent))
            .cloned();
        let children: FxHashSet<_> = scene_node
            .children
            .iter()
            .filter_map(|child| mapping.get(child))
            .cloned()
            .collect();
        requested.insert(
            key.clone(),
            BlockTreeNode::new(parent, children, scene_node.distance_from_camera, ()),
        );
    }

    let inverse: FxHashMap<&BlockKey<T>, &SceneKey> =
        mapping.iter().map(|(scene_key, key)| (key, scene_key)).collect();
    prune_overhanging_leaves(&mut requested, |key| {
        inverse
            .get(key)
            .is_some_and(|scene_key| !scene.is_leaf(scene_key))
    });
    requested
}

/// Removes leaves for which `subdivided_upstream` holds, cascading to parents
/// left without children.
pub fn prune_overhanging_leaves<T: Identity>(
    requested: &mut RequestedTree<T>,
    subdivided_upstream: impl Fn(&BlockKey<T>) -> bool,
) {
    let mut queue: VecDeque<BlockKey<T>> = requested.leaf_keys().into();
    while let Some(leaf) = queue.pop_front() {
        if !subdivided_upstream(&leaf) {
            continue;
        }
        let Some(removed) = requested.remove(&leaf) else {
            continue;
        };
        let Some(parent_key) = removed.parent else {
            continue;
        };
        if let Some(parent) = requested.get_mut(&parent_key) {
            parent.children.remove(&leaf);
            if parent.children.is_empty() {
                queue.push_back(parent_key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::BlockInterval;

    /// Identity 1 has data everywhere, identity 2 only in the first octant
    /// at the coarse level.
    struct TwoLevelIndex;

    impl SpatialIndex<u32> for TwoLevelIndex {
        fn num_levels(&self) -> u32 {
            2
        }

        fn blocks_for(&self, level: u32, id: &u32) -> Vec<BlockInterval> {
            match (id, level) {
                (1, 0) => vec![BlockInterval::new([0, 0, 0], [63, 31, 31])],
                (1, 1) => vec![BlockInterval::new([0, 0, 0], [31, 15, 15])],
                (2, 1) => vec![BlockInterval::new([0, 0, 0], [31, 15, 15])],
                _ => Vec::new(),
            }
        }
    }

    fn grids() -> Vec<BlockGrid> {
        vec![
            BlockGrid::new([64, 32, 32], [32, 32, 32]),
            BlockGrid::new([32, 16, 16], [32, 16, 16]),
        ]
    }

    /// Coarse root (level 1) subdivided into two level-0 children.
    fn subdivided_scene() -> BlockTree<SceneKey> {
        let root = SceneKey::new(1, 0);
        let left = SceneKey::new(0, 0);
        let right = SceneKey::new(0, 1);
        let mut tree = BlockTree::new();
        tree.insert(root, BlockTreeNode::new(None, [left, right].into_iter().collect(), 10.0, ()));
        tree.insert(left, BlockTreeNode::new(Some(root), FxHashSet::default(), 5.0, ()));
        tree.insert(right, BlockTreeNode::new(Some(root), FxHashSet::default(), 15.0, ()));
        tree
    }

    fn params(scene_tree: BlockTree<SceneKey>) -> SceneUpdateParams {
        SceneUpdateParams::new(scene_tree, grids(), GenerationSettings::default())
    }

    /// The requested tree mirrors the scene structure for covered blocks.
    #[test]
    fn test_requested_tree_mirrors_scene() {
        let requested = build_requested_tree(&1, &TwoLevelIndex, &params(subdivided_scene()));
        assert_eq!(requested.len(), 3);
        let roots = requested.root_keys();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].level, 1);
        assert_eq!(requested.leaf_keys().len(), 2);
        assert!(requested.validate_structure().is_ok());
        let near = requested
            .iter()
            .find(|(key, _)| key.level == 0 && key.interval.min[0] == 0)
            .map(|(_, node)| node.distance_from_camera);
        assert_eq!(near, Some(5.0));
    }

    /// A coarse leaf whose scene node is subdivided is pruned.
    #[test]
    fn test_overhanging_leaf_pruned() {
        let requested = build_requested_tree(&2, &TwoLevelIndex, &params(subdivided_scene()));
        assert!(requested.is_empty());
    }

    /// Without a subdivision upstream the coarse leaf stays.
    #[test]
    fn test_coarse_leaf_kept_when_scene_is_coarse() {
        let mut scene = BlockTree::new();
        scene.insert(SceneKey::new(1, 0), BlockTreeNode::new(None, FxHashSet::default(), 1.0, ()));
        let requested = build_requested_tree(&2, &TwoLevelIndex, &params(scene));
        assert_eq!(requested.len(), 1);
    }

    /// Pruning cascades up through parents that lose every child.
    #[test]
    fn test_pruning_cascades_to_parent() {
        let k = |level: u32, x: i64| {
            BlockKey::new(
                0u32,
                level,
                BlockInterval::new([x, 0, 0], [x, 0, 0]),
                GenerationSettings::default(),
            )
        };
        let (root, mid, leaf, sibling) = (k(2, 0), k(1, 0), k(0, 0), k(1, 1));
        let mut tree = RequestedTree::new();
        tree.insert(root.clone(), BlockTreeNode::new(None, [mid.clone(), sibling.clone()].into_iter().collect(), 0.0, ()));
        tree.insert(mid.clone(), BlockTreeNode::new(Some(root.clone()), [leaf.clone()].into_iter().collect(), 0.0, ()));
        tree.insert(leaf.clone(), BlockTreeNode::new(Some(mid.clone()), FxHashSet::default(), 0.0, ()));
        tree.insert(sibling.clone(), BlockTreeNode::new(Some(root.clone()), FxHashSet::default(), 0.0, ()));

        let doomed = [leaf.clone(), mid.clone()];
        prune_overhanging_leaves(&mut tree, |key| doomed.contains(key));

        assert!(!tree.contains(&leaf));
        assert!(!tree.contains(&mid));
        assert!(tree.contains(&sibling));
        assert_eq!(tree.get(&root).map(|n| n.children.len()), Some(1));
        assert!(tree.validate_structure().is_ok());
    }

    /// An empty scene yields an empty request.
    #[test]
    fn test_empty_scene() {
        let requested = build_requested_tree(&1, &TwoLevelIndex, &params(BlockTree::new()));
        assert!(requested.is_empty());
    }
}
