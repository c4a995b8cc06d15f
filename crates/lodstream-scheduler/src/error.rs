//! Error types for block generation and internal consistency checks.

/// Errors reported by a [`GenerationEngine`](crate::GenerationEngine).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// The engine observed the cancellation token and aborted.
    #[error("generation was interrupted")]
    Interrupted,

    /// The engine failed for a reason unrelated to cancellation.
    #[error("generation failed: {0}")]
    Failed(String),
}

/// A broken structural or state invariant of the scheduler.
///
/// These are programming errors, never user-facing failures. Keys are carried
/// in their `Debug` form so the error stays independent of the identity type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    /// A node names a parent that does not exist in the tree.
    #[error("node {key} names parent {parent} which is not in the tree")]
    MissingParent { key: String, parent: String },

    /// A node's parent does not list the node among its children.
    #[error("parent {parent} does not list {key} as a child")]
    BrokenParentLink { key: String, parent: String },

    /// A node lists a child that does not exist in the tree.
    #[error("node {key} lists child {child} which is not in the tree")]
    MissingChild { key: String, child: String },

    /// A child's parent key disagrees with the node listing it.
    #[error("child {child} of {key} names a different parent")]
    BrokenChildLink { key: String, child: String },

    /// The requested tree and the live tree disagree on a shared key's links.
    #[error("requested and live trees disagree on the structure of {key}")]
    StructureMismatch { key: String },

    /// Two visible nodes are in an ancestor/descendant relation.
    #[error("visible node {descendant} has visible ancestor {ancestor}")]
    VisibleNotAntichain { ancestor: String, descendant: String },

    /// A key in the rendered set is not in the live tree.
    #[error("rendered block {key} is not in the live tree")]
    RenderedNotInTree { key: String },

    /// A rendered block is in a state that does not allow holding a payload,
    /// or a block that holds no payload is in a state that requires one.
    #[error("block {key} is in state {state} but rendered={rendered}")]
    RenderedStateMismatch {
        key: String,
        state: String,
        rendered: bool,
    },

    /// A task exists for a node in the REMOVED state.
    #[error("task exists for removed block {key}")]
    TaskForRemovedNode { key: String },

    /// A task exists for a key that is not in the live tree.
    #[error("task exists for block {key} which is not in the live tree")]
    TaskNotInTree { key: String },

    /// A second task was requested for a key that already has one.
    #[error("a task for block {key} already exists")]
    DuplicateTask { key: String },

    /// A hidden node whose parent is not visible.
    #[error("hidden block {key} does not have a visible parent")]
    HiddenWithoutVisibleParent { key: String },

    /// Generic state machine violation detected at a transition point.
    #[error("{0}")]
    Transition(String),
}
