//! Block-tree diffing and LOD-transition scheduling: streams multi-resolution
//! blocks of identity-keyed data into a scene without gaps, overlaps or stale
//! results.

mod context;
mod diff;
mod driver;
mod engine;
mod error;
mod executor;
mod grid;
mod integration;
mod invariants;
mod key;
mod manager;
mod priority_queue;
mod progress;
mod registry;
mod requested;
mod state;
mod streamer;
mod tree;

use std::fmt::Debug;
use std::hash::Hash;

pub use context::{SchedulerContext, SchedulerOptions};
pub use diff::{DiffOutcome, merge_requested_tree};
pub use driver::{DriverSnapshot, SceneUpdateDriver, TaskSnapshot};
pub use engine::{CancellationToken, GenerationEngine, SpatialIndex};
pub use error::{GenerationError, InvariantViolation};
pub use executor::{PriorityTaskExecutor, UnitId, WorkUnit, default_worker_threads};
pub use grid::BlockGrid;
pub use integration::{IntegrationCallback, ResultIntegrationQueue, SceneSink, SinkCommand};
pub use invariants::{check_shared_structure, check_visible_antichain};
pub use key::{BlockInterval, BlockKey, BlockPriority, GenerationSettings, SceneKey};
pub use manager::ManagerExecutor;
pub use priority_queue::IndexedPriorityQueue;
pub use progress::BlockProgress;
pub use registry::{Task, TaskRegistry};
pub use requested::{SceneUpdateParams, build_requested_tree, prune_overhanging_leaves};
pub use state::{NodeState, TaskState};
pub use streamer::SceneStreamer;
pub use tree::{BlockTree, BlockTreeNode, LiveTree, RequestedTree};

/// Identifies one object of the dataset. Every block key is scoped to one.
pub trait Identity: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + Debug + Send + Sync + 'static> Identity for T {}
