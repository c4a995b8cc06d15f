//! Deterministic fixture: a three-level dataset, a scriptable engine and a
//! sink that records what is on screen.
//!
//! Levels double in size: a level-`L` cell spans `2^L` world cells along x.
//! Level 2 has 2 blocks, level 1 has 4 and level 0 has 8, all along x.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use lodstream_scheduler::{
    BlockGrid, BlockInterval, BlockKey, BlockTree, BlockTreeNode, CancellationToken, GenerationEngine,
    GenerationError, GenerationSettings, SceneKey, SceneSink, SceneUpdateDriver, SceneUpdateParams,
    SchedulerContext, SpatialIndex,
};
use rustc_hash::{FxHashMap, FxHashSet};

pub type Key = BlockKey<u32>;
pub type Hook = Box<dyn FnOnce() + Send>;

pub const BLOCK: i64 = 32;
pub const NUM_LEVELS: u32 = 3;

/// Identity with data at every level.
pub const DENSE: u32 = 1;
/// Identity without level-0 data.
pub const SPARSE: u32 = 2;

pub fn grids() -> Vec<BlockGrid> {
    (0..NUM_LEVELS)
        .map(|level| {
            let scale = 1 << level;
            BlockGrid::new([256 / scale, 32 / scale, 32 / scale], [BLOCK, BLOCK / scale, BLOCK / scale])
        })
        .collect()
}

pub struct FixtureIndex;

impl SpatialIndex<u32> for FixtureIndex {
    fn num_levels(&self) -> u32 {
        NUM_LEVELS
    }

    fn blocks_for(&self, level: u32, id: &u32) -> Vec<BlockInterval> {
        if *id == SPARSE && level == 0 {
            return Vec::new();
        }
        let dims = grids()[level as usize].dimensions();
        vec![BlockInterval::new([0, 0, 0], [dims[0] - 1, dims[1] - 1, dims[2] - 1])]
    }
}

/// Generates `key.level` as payload. Blocks can be scripted to come back
/// empty or to fail once, and a hook can run in the middle of a generation.
/// With `ignore_cancel` set the engine finishes even after cancellation.
#[derive(Default)]
pub struct ScriptedEngine {
    pub empty: Mutex<FxHashSet<(u32, u64)>>,
    pub fail_once: Mutex<FxHashSet<(u32, u64)>>,
    pub hook: Mutex<Option<((u32, u64), Hook)>>,
    pub generated: Mutex<Vec<(u32, u64)>>,
    pub ignore_cancel: AtomicBool,
}

impl ScriptedEngine {
    pub fn generated_count(&self, block: (u32, u64)) -> usize {
        self.generated
            .lock()
            .unwrap()
            .iter()
            .filter(|&&b| b == block)
            .count()
    }

    pub fn set_hook(&self, block: (u32, u64), hook: impl FnOnce() + Send + 'static) {
        *self.hook.lock().unwrap() = Some((block, Box::new(hook)));
    }
}

impl GenerationEngine<u32> for ScriptedEngine {
    type Payload = u32;

    fn generate(&self, key: &Key, cancel: &CancellationToken) -> Result<Option<u32>, GenerationError> {
        let block = block_of(key);
        self.generated.lock().unwrap().push(block);

        let hook = {
            let mut slot = self.hook.lock().unwrap();
            match slot.take() {
                Some((target, hook)) if target == block => Some(hook),
                other => {
                    *slot = other;
                    None
                }
            }
        };
        if let Some(hook) = hook {
            hook();
        }

        if !self.ignore_cancel.load(Ordering::SeqCst) {
            cancel.check()?;
        }
        if self.fail_once.lock().unwrap().remove(&block) {
            return Err(GenerationError::Failed(format!("scripted failure for {block:?}")));
        }
        if self.empty.lock().unwrap().contains(&block) {
            return Ok(None);
        }
        Ok(Some(key.level))
    }
}

/// `(level, flat index)` of a key.
pub fn block_of(key: &Key) -> (u32, u64) {
    (key.level, (key.interval.min[0] / BLOCK) as u64)
}

pub fn key(id: u32, level: u32, index: u64) -> Key {
    BlockKey::new(
        id,
        level,
        grids()[level as usize].cell_interval(index),
        GenerationSettings::default(),
    )
}

/// World x-range of a key.
fn world_range(key: &Key) -> (i64, i64) {
    let scale = 1 << key.level;
    (key.interval.min[0] * scale, (key.interval.max[0] + 1) * scale - 1)
}

#[derive(Default)]
pub struct RecordingSink {
    pub present: FxHashMap<Key, u32>,
    pub shown: FxHashSet<Key>,
    pub adds: Vec<Key>,
}

impl RecordingSink {
    /// Shown blocks never cover the same region twice.
    pub fn assert_no_overlap(&self) {
        let shown: Vec<_> = self.shown.iter().collect();
        for (i, a) in shown.iter().enumerate() {
            for b in &shown[i + 1..] {
                let (a0, a1) = world_range(a);
                let (b0, b1) = world_range(b);
                assert!(a1 < b0 || b1 < a0, "{a:?} and {b:?} are shown together");
            }
        }
    }

    pub fn shown_blocks(&self) -> FxHashSet<(u32, u64)> {
        self.shown.iter().map(block_of).collect()
    }

    pub fn present_blocks(&self) -> FxHashSet<(u32, u64)> {
        self.present.keys().map(block_of).collect()
    }
}

impl SceneSink<Key, u32> for RecordingSink {
    fn add(&mut self, key: Key, payload: u32, visible: bool) {
        assert!(!visible, "payloads enter the sink hidden");
        assert!(!self.present.contains_key(&key), "{key:?} added twice");
        self.adds.push(key.clone());
        self.present.insert(key, payload);
    }

    fn remove(&mut self, key: &Key) {
        assert!(self.present.remove(key).is_some(), "removing absent {key:?}");
        self.shown.remove(key);
    }

    fn set_visible(&mut self, key: &Key, visible: bool) {
        assert!(self.present.contains_key(key), "toggling absent {key:?}");
        if visible {
            self.shown.insert(key.clone());
        } else {
            self.shown.remove(key);
        }
    }
}

/// Builds a scene tree from `(level, index, parent, distance)` rows.
pub fn scene(rows: &[(u32, u64, Option<(u32, u64)>, f64)]) -> Arc<SceneUpdateParams> {
    let mut tree = BlockTree::new();
    for &(level, index, parent, distance) in rows {
        let children: FxHashSet<_> = rows
            .iter()
            .filter(|row| row.2 == Some((level, index)))
            .map(|row| SceneKey::new(row.0, row.1))
            .collect();
        tree.insert(
            SceneKey::new(level, index),
            BlockTreeNode::new(parent.map(|(l, i)| SceneKey::new(l, i)), children, distance, ()),
        );
    }
    Arc::new(SceneUpdateParams::new(tree, grids(), GenerationSettings::default()))
}

pub struct Harness {
    pub engine: Arc<ScriptedEngine>,
    pub context: SchedulerContext<u32, u32>,
    pub driver: SceneUpdateDriver<u32, u32>,
    pub sink: RecordingSink,
}

impl Harness {
    pub fn new(id: u32) -> Self {
        let engine = Arc::new(ScriptedEngine::default());
        let context = SchedulerContext::manual(engine.clone(), Arc::new(FixtureIndex), 64);
        let driver = SceneUpdateDriver::new(id, context.clone());
        Self {
            engine,
            context,
            driver,
            sink: RecordingSink::default(),
        }
    }

    pub fn run_updates(&self) -> usize {
        self.context.manager.run_pending()
    }

    pub fn run_worker(&self) -> bool {
        self.context.workers.run_next()
    }

    pub fn run_workers(&self) -> usize {
        let mut ran = 0;
        while self.run_worker() {
            ran += 1;
        }
        ran
    }

    pub fn tick(&mut self) -> usize {
        let added = self.context.integration.tick(&mut self.sink);
        self.sink.assert_no_overlap();
        added
    }

    /// Runs updates, workers and ticks until nothing is left to do.
    pub fn settle(&mut self) {
        loop {
            let progressed = self.run_updates() + self.run_workers() + self.tick();
            if progressed == 0 && self.context.integration.is_idle() {
                break;
            }
        }
        assert_eq!(self.driver.check_invariants(), Ok(()));
    }

    pub fn submit(&self, params: &Arc<SceneUpdateParams>) {
        self.driver.submit(Arc::clone(params));
    }

    pub fn state(&self, id: u32, level: u32, index: u64) -> Option<lodstream_scheduler::NodeState> {
        self.driver.snapshot().state_of(&key(id, level, index))
    }
}

/// Root `(2, 0)` alone.
pub fn coarse_root() -> Arc<SceneUpdateParams> {
    scene(&[(2, 0, None, 10.0)])
}

/// Root `(2, 0)` split into `(1, 0)` and `(1, 1)`.
pub fn split_root() -> Arc<SceneUpdateParams> {
    scene(&[
        (2, 0, None, 10.0),
        (1, 0, Some((2, 0)), 5.0),
        (1, 1, Some((2, 0)), 8.0),
    ])
}
