//! Per-block LOD transition states and per-task lifecycle states.

use std::fmt;

/// State of a block in the live tree.
///
/// A block replacing a visible coarser block moves through
/// `Pending -> Rendered -> Hidden` and waits there until every sibling is
/// hidden too; then the whole sibling group becomes `Visible` at once and the
/// parent moves to `Removed`.
///
/// ```text
///          +---------+
///          | Visible |          parent stays on screen
///          +---------+
///           /       \
///     +--------+  +---------+
///     | Hidden |  | Pending |   children wait for each other
///     +--------+  +---------+
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum NodeState {
    /// Payload still needs to be generated (queued, running, or not yet scheduled).
    #[default]
    Pending,
    /// Payload generated and handed to the integration queue, not yet in the sink.
    Rendered,
    /// Payload is in the sink but hidden while its visible parent is still shown.
    Hidden,
    /// Payload is shown.
    Visible,
    /// Block was superseded by finer children, or is being replaced by a coarser block.
    Removed,
}

impl NodeState {
    /// Whether a block in this state owns an entry in the rendered set.
    pub fn holds_payload(self) -> bool {
        matches!(self, Self::Rendered | Self::Hidden | Self::Visible)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Rendered => "RENDERED",
            Self::Hidden => "HIDDEN",
            Self::Visible => "VISIBLE",
            Self::Removed => "REMOVED",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a generation task.
///
/// `Created -> Scheduled -> Running -> Completed`, with `Interrupted`
/// reachable from the first three.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    Created,
    Scheduled,
    Running,
    Completed,
    Interrupted,
}

impl TaskState {
    /// Whether the task may still be re-prioritised.
    pub fn is_waiting(self) -> bool {
        matches!(self, Self::Created | Self::Scheduled)
    }

    /// Whether the task may be moved to `Interrupted`.
    pub fn is_interruptible(self) -> bool {
        matches!(self, Self::Created | Self::Scheduled | Self::Running)
    }
}
