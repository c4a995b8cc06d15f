//! Headless stand-in for a renderer's scene graph.

use lodstream_scheduler::{BlockKey, SceneSink};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::dataset::BlockMesh;

/// Holds the meshes handed over by the scheduler and counts what a frame
/// would draw.
#[derive(Default)]
pub struct FrameSink {
    meshes: FxHashMap<BlockKey<u32>, BlockMesh>,
    visible: FxHashSet<BlockKey<u32>>,
    pub adds: u64,
    pub removals: u64,
    pub toggles: u64,
}

/// What one frame would draw.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub loaded: usize,
    pub visible: usize,
    pub visible_surface: u64,
    /// Visible blocks per level, finest first.
    pub visible_per_level: Vec<usize>,
}

impl FrameSink {
    pub fn stats(&self) -> FrameStats {
        let mut stats = FrameStats {
            loaded: self.meshes.len(),
            visible: self.visible.len(),
            ..FrameStats::default()
        };
        for key in &self.visible {
            let Some(mesh) = self.meshes.get(key) else {
                continue;
            };
            stats.visible_surface += mesh.surface_cells;
            let level = mesh.level as usize;
            if stats.visible_per_level.len() <= level {
                stats.visible_per_level.resize(level + 1, 0);
            }
            stats.visible_per_level[level] += 1;
        }
        stats
    }

    /// Loaded meshes belonging to `id`.
    pub fn loaded_for(&self, id: u32) -> usize {
        self.meshes.keys().filter(|key| key.id == id).count()
    }
}

impl SceneSink<BlockKey<u32>, BlockMesh> for FrameSink {
    fn add(&mut self, key: BlockKey<u32>, payload: BlockMesh, visible: bool) {
        self.adds += 1;
        if visible {
            self.visible.insert(key.clone());
        }
        if self.meshes.insert(key, payload).is_some() {
            tracing::warn!("mesh replaced without removal");
        }
    }

    fn remove(&mut self, key: &BlockKey<u32>) {
        self.removals += 1;
        self.visible.remove(key);
        self.meshes.remove(key);
    }

    fn set_visible(&mut self, key: &BlockKey<u32>, visible: bool) {
        self.toggles += 1;
        if !self.meshes.contains_key(key) {
            tracing::warn!(?key, "visibility change for an unknown mesh");
            return;
        }
        if visible {
            self.visible.insert(key.clone());
        } else {
            self.visible.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodstream_scheduler::{BlockInterval, GenerationSettings};

    fn key(id: u32, level: u32) -> BlockKey<u32> {
        BlockKey::new(id, level, BlockInterval::new([0; 3], [7; 3]), GenerationSettings::default())
    }

    fn mesh(level: u32, surface_cells: u64) -> BlockMesh {
        BlockMesh { level, surface_cells }
    }

    /// Hidden meshes are loaded but not drawn.
    #[test]
    fn test_hidden_mesh_not_counted() {
        let mut sink = FrameSink::default();
        sink.add(key(1, 0), mesh(0, 10), false);
        sink.add(key(1, 1), mesh(1, 4), false);
        sink.set_visible(&key(1, 1), true);

        let stats = sink.stats();
        assert_eq!(stats.loaded, 2);
        assert_eq!(stats.visible, 1);
        assert_eq!(stats.visible_surface, 4);
        assert_eq!(stats.visible_per_level, vec![0, 1]);
    }

    #[test]
    fn test_remove_drops_visibility() {
        let mut sink = FrameSink::default();
        sink.add(key(2, 0), mesh(0, 3), false);
        sink.set_visible(&key(2, 0), true);
        sink.remove(&key(2, 0));
        assert_eq!(sink.stats(), FrameStats::default());
        assert_eq!(sink.loaded_for(2), 0);
        assert_eq!((sink.adds, sink.removals, sink.toggles), (1, 1, 1));
    }

    /// Toggling a mesh that was never added changes nothing.
    #[test]
    fn test_toggle_unknown_mesh() {
        let mut sink = FrameSink::default();
        sink.set_visible(&key(3, 0), true);
        assert_eq!(sink.stats().visible, 0);
    }
}
