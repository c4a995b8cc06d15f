//! Camera path and the distance-threshold scene tree built for it.

use glam::DVec3;
use lodstream_config::SceneConfig;
use lodstream_scheduler::{BlockGrid, BlockInterval, BlockTree, BlockTreeNode, SceneKey};
use rustc_hash::FxHashSet;

/// Piecewise linear loop through a list of waypoints.
pub struct CameraPath {
    waypoints: Vec<DVec3>,
}

impl CameraPath {
    /// # Panics
    ///
    /// Panics if `waypoints` is empty.
    pub fn new(waypoints: Vec<DVec3>) -> Self {
        assert!(!waypoints.is_empty(), "camera path needs a waypoint");
        Self { waypoints }
    }

    /// A fly-by along the x axis of a dataset, close in the middle and far
    /// away at both ends.
    pub fn fly_by(dimensions: [i64; 3]) -> Self {
        let [x, y, z] = dimensions.map(|d| d as f64);
        Self::new(vec![
            DVec3::new(-x, y / 2.0, z * 4.0),
            DVec3::new(x * 0.25, y / 2.0, z * 1.2),
            DVec3::new(x * 0.75, y / 2.0, z * 1.2),
            DVec3::new(x * 2.0, y / 2.0, z * 4.0),
        ])
    }

    /// Position at `t` in `[0, 1]`, looping back to the first waypoint.
    pub fn position_at(&self, t: f64) -> DVec3 {
        let n = self.waypoints.len();
        if n == 1 {
            return self.waypoints[0];
        }
        let scaled = t.rem_euclid(1.0) * n as f64;
        let segment = (scaled.floor() as usize).min(n - 1);
        let from = self.waypoints[segment];
        let to = self.waypoints[(segment + 1) % n];
        from.lerp(to, scaled - segment as f64)
    }
}

/// Builds the scene tree the renderer wants for a camera position.
///
/// Every block of the coarsest level is a root. A block of level `L` is split
/// into the level `L - 1` blocks it covers while the camera is closer to its
/// center than the level's threshold.
pub struct LodSceneBuilder {
    grids: Vec<BlockGrid>,
    scene: SceneConfig,
}

impl LodSceneBuilder {
    pub fn new(dimensions: [i64; 3], scene: &SceneConfig) -> Self {
        let block = scene.renderer_block_size.max(1);
        let grids = (0..scene.num_levels.max(1))
            .map(|level| {
                let scale = 1i64 << level;
                let dims = dimensions.map(|d| ((d + scale - 1) / scale).max(1));
                BlockGrid::new(dims, [block; 3])
            })
            .collect();
        Self {
            grids,
            scene: scene.clone(),
        }
    }

    /// Renderer grid per level, indexed by level.
    pub fn grids(&self) -> &[BlockGrid] {
        &self.grids
    }

    pub fn build(&self, camera: DVec3) -> BlockTree<SceneKey> {
        let coarsest = self.scene.clamped_coarsest_level().min(self.grids.len() as u32 - 1);
        let mut tree = BlockTree::new();
        let mut stack: Vec<(SceneKey, Option<SceneKey>)> = (0..self.grids[coarsest as usize].num_blocks())
            .map(|index| (SceneKey::new(coarsest, index), None))
            .collect();

        while let Some((key, parent)) = stack.pop() {
            let distance = self.distance(key, camera);
            let split = self
                .scene
                .split_distance(key.level)
                .is_some_and(|threshold| distance < threshold);
            let children: FxHashSet<SceneKey> = if split {
                self.children(key)
            } else {
                FxHashSet::default()
            };
            stack.extend(children.iter().map(|&child| (child, Some(key))));
            tree.insert(key, BlockTreeNode::new(parent, children, distance, ()));
        }
        tree
    }

    /// Level `key.level - 1` blocks covering the same region as `key`.
    fn children(&self, key: SceneKey) -> FxHashSet<SceneKey> {
        let interval = self.grids[key.level as usize].cell_interval(key.index);
        let finer = BlockInterval::new(interval.min.map(|v| v * 2), interval.max.map(|v| v * 2 + 1));
        let level = key.level - 1;
        self.grids[level as usize]
            .intersecting_blocks(&finer)
            .into_iter()
            .map(|index| SceneKey::new(level, index))
            .collect()
    }

    /// Distance from the camera to the block center, in level-0 cells.
    fn distance(&self, key: SceneKey, camera: DVec3) -> f64 {
        let interval = self.grids[key.level as usize].cell_interval(key.index);
        let scale = (1i64 << key.level) as f64;
        let min = DVec3::new(interval.min[0] as f64, interval.min[1] as f64, interval.min[2] as f64);
        let max = DVec3::new(interval.max[0] as f64, interval.max[1] as f64, interval.max[2] as f64);
        let center = (min + max + DVec3::ONE) * 0.5 * scale;
        center.distance(camera)
    }
}
