//! Reporting of invariant violations and whole-state consistency checks.
//!
//! Debug and test builds panic on the first violation. Release builds log at
//! error severity and keep going.

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::InvariantViolation;
use crate::key::BlockKey;
use crate::registry::TaskRegistry;
use crate::state::NodeState;
use crate::tree::{BlockTree, LiveTree};
use crate::Identity;

/// Checks a condition at a transition point and reports a violation if it
/// does not hold.
macro_rules! ensure_invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::invariants::report(&$crate::error::InvariantViolation::Transition(
                format!($($arg)+),
            ));
        }
    };
}

pub(crate) use ensure_invariant;

/// Reports a violation: panics in debug builds, logs in release builds.
pub(crate) fn report(violation: &InvariantViolation) {
    if cfg!(debug_assertions) {
        panic!("invariant violated: {violation}");
    }
    tracing::error!("invariant violated: {violation}");
}

/// Reports the error of a whole-state check, if any.
pub(crate) fn report_result(result: Result<(), InvariantViolation>) {
    if let Err(violation) = result {
        report(&violation);
    }
}

pub(crate) fn describe<K: fmt::Debug>(key: &K) -> String {
    format!("{key:?}")
}

/// Checks that the requested tree and the live tree agree on the parent and
/// children of every key present in both.
pub fn check_shared_structure<K, A, B>(
    requested: &BlockTree<K, A>,
    live: &BlockTree<K, B>,
) -> Result<(), InvariantViolation>
where
    K: Clone + Eq + std::hash::Hash + fmt::Debug,
{
    for (key, requested_node) in requested.iter() {
        let Some(live_node) = live.get(key) else {
            continue;
        };
        if requested_node.parent != live_node.parent {
            return Err(InvariantViolation::StructureMismatch {
                key: describe(key),
            });
        }
        // The live tree may keep finer children of a requested leaf until the
        // coarse block replaces them, so only requested children are compared.
        if !requested_node.children.is_subset(&live_node.children) {
            return Err(InvariantViolation::StructureMismatch {
                key: describe(key),
            });
        }
    }
    Ok(())
}

/// Checks the state invariants tying the live tree, the rendered set and the
/// task registry together.
pub(crate) fn check_scene_states<T: Identity>(
    live: &LiveTree<T>,
    rendered: &FxHashMap<BlockKey<T>, bool>,
    tasks: &TaskRegistry<T>,
) -> Result<(), InvariantViolation> {
    live.validate_structure()?;

    for key in rendered.keys() {
        let Some(node) = live.get(key) else {
            return Err(InvariantViolation::RenderedNotInTree {
                key: describe(key),
            });
        };
        if !node.state.holds_payload() {
            return Err(InvariantViolation::RenderedStateMismatch {
                key: describe(key),
                state: node.state.to_string(),
                rendered: true,
            });
        }
    }

    for (key, node) in live.iter() {
        if node.state.holds_payload() && !rendered.contains_key(key) {
            return Err(InvariantViolation::RenderedStateMismatch {
                key: describe(key),
                state: node.state.to_string(),
                rendered: false,
            });
        }
        if node.state == NodeState::Hidden {
            let parent_visible = node
                .parent
                .as_ref()
                .and_then(|parent| live.get(parent))
                .is_some_and(|parent| parent.state == NodeState::Visible);
            if !parent_visible {
                return Err(InvariantViolation::HiddenWithoutVisibleParent {
                    key: describe(key),
                });
            }
        }
    }

    for key in tasks.keys() {
        match live.get(key) {
            None => {
                return Err(InvariantViolation::TaskNotInTree {
                    key: describe(key),
                });
            }
            Some(node) if node.state == NodeState::Removed => {
                return Err(InvariantViolation::TaskForRemovedNode {
                    key: describe(key),
                });
            }
            Some(_) => {}
        }
    }

    check_visible_antichain(live)
}

/// Checks that no visible node has a visible ancestor.
pub fn check_visible_antichain<K>(tree: &BlockTree<K, NodeState>) -> Result<(), InvariantViolation>
where
    K: Clone + Eq + std::hash::Hash + fmt::Debug,
{
    let visible: FxHashSet<&K> = tree
        .iter()
        .filter(|(_, node)| node.state == NodeState::Visible)
        .map(|(key, _)| key)
        .collect();

    for key in &visible {
        let mut cursor = tree.get(key).and_then(|node| node.parent.as_ref());
        while let Some(ancestor) = cursor {
            if visible.contains(ancestor) {
                return Err(InvariantViolation::VisibleNotAntichain {
                    ancestor: describe(ancestor),
                    descendant: describe(*key),
                });
            }
            cursor = tree.get(ancestor).and_then(|node| node.parent.as_ref());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::BlockTreeNode;

    fn chain() -> BlockTree<u32, NodeState> {
        let mut tree = BlockTree::new();
        tree.insert(0, BlockTreeNode::new(None, [1].into_iter().collect(), 0.0, NodeState::Removed));
        tree.insert(1, BlockTreeNode::new(Some(0), [2].into_iter().collect(), 0.0, NodeState::Visible));
        tree.insert(2, BlockTreeNode::new(Some(1), Default::default(), 0.0, NodeState::Pending));
        tree
    }

    /// A chain with a single visible node satisfies the antichain check.
    #[test]
    fn test_single_visible_node_is_antichain() {
        assert!(check_visible_antichain(&chain()).is_ok());
    }

    /// A visible node below a visible ancestor is rejected.
    #[test]
    fn test_visible_descendant_breaks_antichain() {
        let mut tree = chain();
        if let Some(node) = tree.get_mut(&2) {
            node.state = NodeState::Visible;
        }
        let err = check_visible_antichain(&tree).unwrap_err();
        assert!(matches!(err, InvariantViolation::VisibleNotAntichain { .. }));
    }

    /// Diverging parent links between trees are reported.
    #[test]
    fn test_shared_structure_mismatch_detected() {
        let live = chain();
        let mut requested: BlockTree<u32> = BlockTree::new();
        requested.insert(1, BlockTreeNode::new(None, Default::default(), 0.0, ()));
        let err = check_shared_structure(&requested, &live).unwrap_err();
        assert!(matches!(err, InvariantViolation::StructureMismatch { .. }));
    }

    /// Reporting panics in debug builds.
    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invariant violated")]
    fn test_report_panics_in_debug() {
        report(&InvariantViolation::Transition("boom".into()));
    }
}
