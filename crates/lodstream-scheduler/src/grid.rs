//! Regular block grid over the dataset at one resolution level.

use crate::key::BlockInterval;

/// Partition of a dataset of `dimensions` cells into blocks of `block_size`
/// cells. Blocks on the upper border are clipped to the dataset.
///
/// Flat block indices run x-fastest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockGrid {
    dimensions: [i64; 3],
    block_size: [i64; 3],
    grid_size: [i64; 3],
}

impl BlockGrid {
    /// # Panics
    ///
    /// Panics if any dimension or block size is not positive.
    pub fn new(dimensions: [i64; 3], block_size: [i64; 3]) -> Self {
        assert!(
            dimensions.iter().chain(&block_size).all(|&v| v > 0),
            "grid dimensions and block size must be positive"
        );
        let grid_size = [
            (dimensions[0] + block_size[0] - 1) / block_size[0],
            (dimensions[1] + block_size[1] - 1) / block_size[1],
            (dimensions[2] + block_size[2] - 1) / block_size[2],
        ];
        Self {
            dimensions,
            block_size,
            grid_size,
        }
    }

    pub fn dimensions(&self) -> [i64; 3] {
        self.dimensions
    }

    pub fn block_size(&self) -> [i64; 3] {
        self.block_size
    }

    /// Number of blocks along each axis.
    pub fn grid_size(&self) -> [i64; 3] {
        self.grid_size
    }

    pub fn num_blocks(&self) -> u64 {
        (self.grid_size[0] * self.grid_size[1] * self.grid_size[2]) as u64
    }

    /// Flat index of the block at grid position `pos`.
    pub fn flat_index(&self, pos: [i64; 3]) -> u64 {
        (pos[0] + self.grid_size[0] * (pos[1] + self.grid_size[1] * pos[2])) as u64
    }

    /// Grid position of the block with flat index `index`.
    pub fn grid_position(&self, index: u64) -> [i64; 3] {
        let index = index as i64;
        let plane = self.grid_size[0] * self.grid_size[1];
        [
            index % self.grid_size[0],
            (index % plane) / self.grid_size[0],
            index / plane,
        ]
    }

    /// Cell interval covered by the block with flat index `index`.
    pub fn cell_interval(&self, index: u64) -> BlockInterval {
        let pos = self.grid_position(index);
        let mut min = [0; 3];
        let mut max = [0; 3];
        for d in 0..3 {
            min[d] = pos[d] * self.block_size[d];
            max[d] = (min[d] + self.block_size[d]).min(self.dimensions[d]) - 1;
        }
        BlockInterval::new(min, max)
    }

    /// Flat indices of every block intersecting `interval`.
    ///
    /// Parts of the interval outside the dataset are ignored.
    pub fn intersecting_blocks(&self, interval: &BlockInterval) -> Vec<u64> {
        let mut lo = [0; 3];
        let mut hi = [0; 3];
        for d in 0..3 {
            let min = interval.min[d].max(0);
            let max = interval.max[d].min(self.dimensions[d] - 1);
            if min > max {
                return Vec::new();
            }
            lo[d] = min / self.block_size[d];
            hi[d] = max / self.block_size[d];
        }

        let mut blocks = Vec::new();
        for z in lo[2]..=hi[2] {
            for y in lo[1]..=hi[1] {
                for x in lo[0]..=hi[0] {
                    blocks.push(self.flat_index([x, y, z]));
                }
            }
        }
        blocks
    }
}
