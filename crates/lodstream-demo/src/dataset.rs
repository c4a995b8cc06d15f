//! Synthetic labelled volume standing in for a real segmentation dataset.
//!
//! Every identity is a solid sphere of cells. The spatial index reports the
//! sphere's bounding box at each level, and the meshing engine counts the
//! sphere's surface cells inside a block.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use glam::DVec3;
use lodstream_scheduler::{
    BlockInterval, BlockKey, CancellationToken, GenerationEngine, GenerationError, SpatialIndex,
};
use rustc_hash::FxHashMap;

/// A sphere in level-0 cell coordinates.
#[derive(Clone, Copy, Debug)]
pub struct Blob {
    pub center: DVec3,
    pub radius: f64,
}

impl Blob {
    fn contains(&self, point: DVec3) -> bool {
        point.distance_squared(self.center) <= self.radius * self.radius
    }
}

pub struct SyntheticVolume {
    dimensions: [i64; 3],
    num_levels: u32,
    blobs: FxHashMap<u32, Blob>,
}

impl SyntheticVolume {
    pub fn new(dimensions: [i64; 3], num_levels: u32, blobs: FxHashMap<u32, Blob>) -> Self {
        Self {
            dimensions,
            num_levels,
            blobs,
        }
    }

    /// `count` spheres spread along the x axis, identities starting at 1.
    pub fn spread(dimensions: [i64; 3], num_levels: u32, count: u32) -> Self {
        let spacing = dimensions[0] as f64 / (count.max(1) as f64 + 1.0);
        let radius = (spacing * 0.45).min(dimensions[1] as f64 * 0.45);
        let blobs = (1..=count)
            .map(|id| {
                let center = DVec3::new(
                    spacing * id as f64,
                    dimensions[1] as f64 / 2.0,
                    dimensions[2] as f64 / 2.0,
                );
                (id, Blob { center, radius })
            })
            .collect();
        Self::new(dimensions, num_levels, blobs)
    }

    pub fn dimensions(&self) -> [i64; 3] {
        self.dimensions
    }

    pub fn identities(&self) -> Vec<u32> {
        let mut ids: Vec<_> = self.blobs.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn blob(&self, id: u32) -> Option<&Blob> {
        self.blobs.get(&id)
    }
}

impl SpatialIndex<u32> for SyntheticVolume {
    fn num_levels(&self) -> u32 {
        self.num_levels
    }

    fn blocks_for(&self, level: u32, id: &u32) -> Vec<BlockInterval> {
        let Some(blob) = self.blobs.get(id) else {
            return Vec::new();
        };
        if level >= self.num_levels {
            return Vec::new();
        }
        let scale = (1i64 << level) as f64;
        let lo = (blob.center - DVec3::splat(blob.radius)) / scale;
        let hi = (blob.center + DVec3::splat(blob.radius)) / scale;
        let min = [lo.x.floor() as i64, lo.y.floor() as i64, lo.z.floor() as i64];
        let max = [hi.x.floor() as i64, hi.y.floor() as i64, hi.z.floor() as i64];
        vec![BlockInterval::new(min, max)]
    }
}

/// What the sink receives for one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockMesh {
    pub level: u32,
    /// Cells on the sphere's surface, a stand-in for the triangle count.
    pub surface_cells: u64,
}

/// Generates [`BlockMesh`]es. Keeps the cancellation tokens of running
/// generations so an interruption reaches them even before the scheduler's
/// own flag is polled.
pub struct MeshingEngine {
    volume: Arc<SyntheticVolume>,
    /// Artificial cost per z-slice, to make cancellation observable.
    slice_cost: Duration,
    active: DashMap<BlockKey<u32>, CancellationToken>,
    stats: DashMap<u32, GenerationStats>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GenerationStats {
    pub generated: u64,
    pub empty: u64,
    pub interrupted: u64,
    pub busy: Duration,
}

impl MeshingEngine {
    pub fn new(volume: Arc<SyntheticVolume>, slice_cost: Duration) -> Self {
        Self {
            volume,
            slice_cost,
            active: DashMap::new(),
            stats: DashMap::new(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.active.len()
    }

    /// Statistics summed over all identities.
    pub fn totals(&self) -> GenerationStats {
        self.stats.iter().fold(GenerationStats::default(), |acc, entry| {
            let stats = entry.value();
            GenerationStats {
                generated: acc.generated + stats.generated,
                empty: acc.empty + stats.empty,
                interrupted: acc.interrupted + stats.interrupted,
                busy: acc.busy + stats.busy,
            }
        })
    }

    fn mesh(&self, key: &BlockKey<u32>, blob: &Blob, cancel: &CancellationToken) -> Result<u64, GenerationError> {
        let scale = (1i64 << key.level) as f64;
        let inside = |x: i64, y: i64, z: i64| {
            blob.contains(DVec3::new(x as f64 + 0.5, y as f64 + 0.5, z as f64 + 0.5) * scale)
        };
        let [x0, y0, z0] = key.interval.min;
        let [x1, y1, z1] = key.interval.max;

        let mut surface = 0;
        for z in z0..=z1 {
            cancel.check()?;
            if !self.slice_cost.is_zero() {
                std::thread::sleep(self.slice_cost);
            }
            for y in y0..=y1 {
                for x in x0..=x1 {
                    if !inside(x, y, z) {
                        continue;
                    }
                    let exposed = [(1, 0, 0), (-1, 0, 0), (0, 1, 0), (0, -1, 0), (0, 0, 1), (0, 0, -1)]
                        .iter()
                        .any(|&(dx, dy, dz)| !inside(x + dx, y + dy, z + dz));
                    if exposed {
                        surface += 1;
                    }
                }
            }
        }
        Ok(surface)
    }

    fn record(&self, id: u32, started: Instant, update: impl FnOnce(&mut GenerationStats)) {
        let mut stats = self.stats.entry(id).or_default();
        stats.busy += started.elapsed();
        update(stats.value_mut());
    }
}

impl GenerationEngine<u32> for MeshingEngine {
    type Payload = BlockMesh;

    fn generate(
        &self,
        key: &BlockKey<u32>,
        cancel: &CancellationToken,
    ) -> Result<Option<BlockMesh>, GenerationError> {
        let Some(blob) = self.volume.blob(key.id) else {
            return Err(GenerationError::Failed(format!("unknown identity {}", key.id)));
        };
        let started = Instant::now();
        self.active.insert(key.clone(), cancel.clone());
        let result = self.mesh(key, blob, cancel);
        self.active.remove(key);

        match result {
            Ok(0) => {
                self.record(key.id, started, |stats| stats.empty += 1);
                Ok(None)
            }
            Ok(surface_cells) => {
                self.record(key.id, started, |stats| stats.generated += 1);
                Ok(Some(BlockMesh {
                    level: key.level,
                    surface_cells,
                }))
            }
            Err(err) => {
                self.record(key.id, started, |stats| stats.interrupted += 1);
                Err(err)
            }
        }
    }

    fn interrupt_for(&self, key: &BlockKey<u32>) {
        if let Some(token) = self.active.get(key) {
            tracing::trace!(?key, "cancelling running generation");
            token.cancel();
        }
    }
}
