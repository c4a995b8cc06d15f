//! Block identifiers and scheduling priorities.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Axis-aligned integer interval of a block, inclusive on both ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockInterval {
    pub min: [i64; 3],
    pub max: [i64; 3],
}

impl BlockInterval {
    pub fn new(min: [i64; 3], max: [i64; 3]) -> Self {
        Self { min, max }
    }

    /// Extent along each axis (number of cells).
    pub fn dimensions(&self) -> [i64; 3] {
        [
            self.max[0] - self.min[0] + 1,
            self.max[1] - self.min[1] + 1,
            self.max[2] - self.min[2] + 1,
        ]
    }

    /// Returns `true` if the two intervals share at least one cell.
    pub fn intersects(&self, other: &BlockInterval) -> bool {
        (0..3).all(|d| self.min[d] <= other.max[d] && other.min[d] <= self.max[d])
    }
}

/// Opaque generation parameters baked into every block key.
///
/// Changing any of them produces new keys, so blocks generated with old
/// settings are never mistaken for current ones.
#[derive(Clone, Copy, Debug)]
pub struct GenerationSettings {
    pub simplification_iterations: u32,
    pub smoothing_lambda: f64,
    pub smoothing_iterations: u32,
    pub min_label_ratio: f64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            simplification_iterations: 0,
            smoothing_lambda: 0.5,
            smoothing_iterations: 5,
            min_label_ratio: 0.25,
        }
    }
}

impl PartialEq for GenerationSettings {
    fn eq(&self, other: &Self) -> bool {
        self.simplification_iterations == other.simplification_iterations
            && self.smoothing_lambda.to_bits() == other.smoothing_lambda.to_bits()
            && self.smoothing_iterations == other.smoothing_iterations
            && self.min_label_ratio.to_bits() == other.min_label_ratio.to_bits()
    }
}

impl Eq for GenerationSettings {}

impl Hash for GenerationSettings {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.simplification_iterations.hash(state);
        self.smoothing_lambda.to_bits().hash(state);
        self.smoothing_iterations.hash(state);
        self.min_label_ratio.to_bits().hash(state);
    }
}

/// Key of a node in the externally supplied scene-level tree: a flat block
/// index in the block grid of one resolution level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneKey {
    pub level: u32,
    pub index: u64,
}

impl SceneKey {
    pub fn new(level: u32, index: u64) -> Self {
        Self { level, index }
    }
}

/// Identifies one spatial block of one object identity at one resolution level.
///
/// Level 0 is the finest resolution. Equality and hashing are structural.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BlockKey<T> {
    pub id: T,
    pub level: u32,
    pub interval: BlockInterval,
    pub settings: GenerationSettings,
}

impl<T> BlockKey<T> {
    pub fn new(id: T, level: u32, interval: BlockInterval, settings: GenerationSettings) -> Self {
        Self {
            id,
            level,
            interval,
            settings,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for BlockKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{id={:?}, level={}, min={:?}, max={:?}}}",
            self.id, self.level, self.interval.min, self.interval.max
        )
    }
}

/// Scheduling priority of a block: nearer blocks first, and at equal
/// distance finer (numerically lower) levels first.
///
/// Ordering is ascending, so the *smallest* priority is served first.
#[derive(Clone, Copy, Debug)]
pub struct BlockPriority {
    pub distance_from_camera: f64,
    pub level: i32,
}

impl BlockPriority {
    pub fn new(distance_from_camera: f64, level: i32) -> Self {
        Self {
            distance_from_camera,
            level,
        }
    }
}

impl PartialEq for BlockPriority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BlockPriority {}

impl PartialOrd for BlockPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BlockPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance_from_camera
            .total_cmp(&other.distance_from_camera)
            .then(self.level.cmp(&other.level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn key(level: u32, x: i64, settings: GenerationSettings) -> BlockKey<u64> {
        BlockKey::new(
            7,
            level,
            BlockInterval::new([x, 0, 0], [x + 31, 31, 31]),
            settings,
        )
    }

    /// Keys built from the same parts are equal and hash alike.
    #[test]
    fn test_structural_equality() {
        let a = key(1, 0, GenerationSettings::default());
        let b = key(1, 0, GenerationSettings::default());
        assert_eq!(a, b);
        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    /// Different generation settings yield different keys.
    #[test]
    fn test_settings_distinguish_keys() {
        let smoother = GenerationSettings {
            smoothing_iterations: 10,
            ..Default::default()
        };
        assert_ne!(
            key(0, 0, GenerationSettings::default()),
            key(0, 0, smoother)
        );
    }

    /// Nearer blocks are served before farther ones.
    #[test]
    fn test_nearer_block_first() {
        let near = BlockPriority::new(10.0, 3);
        let far = BlockPriority::new(100.0, 0);
        assert!(near < far);
    }

    /// At equal distance the finer level is served first.
    #[test]
    fn test_finer_level_breaks_ties() {
        let fine = BlockPriority::new(10.0, 0);
        let coarse = BlockPriority::new(10.0, 2);
        assert!(fine < coarse);
    }

    /// Infinite distance sorts after every finite distance.
    #[test]
    fn test_infinite_distance_sorts_last() {
        let replaced = BlockPriority::new(f64::INFINITY, 0);
        let normal = BlockPriority::new(1e12, 9);
        assert!(normal < replaced);
    }

    /// Intervals sharing a single cell intersect.
    #[test]
    fn test_interval_intersection() {
        let a = BlockInterval::new([0, 0, 0], [31, 31, 31]);
        let b = BlockInterval::new([31, 31, 31], [63, 63, 63]);
        let c = BlockInterval::new([32, 0, 0], [63, 31, 31]);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert_eq!(a.dimensions(), [32, 32, 32]);
    }
}
