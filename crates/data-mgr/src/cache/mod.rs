//! Region cache and the block pool it allocates from.

mod block_pool;
mod region_cache;

use std::sync::Arc;

pub use block_pool::{BlockPool, BlockSpan};
pub use region_cache::RegionCache;

use crate::index::{box_dims, linearize_coords};
use crate::types::RegionKey;

/// A cached region bound to the voxel box it covers.
///
/// Grids hold these instead of owning sample data. The key identifies the
/// cache entry whose lock the holder may have to release.
#[derive(Debug, Clone)]
pub struct RegionRef {
    key: RegionKey,
    data: Arc<[f32]>,
    vmin: Vec<usize>,
    vmax: Vec<usize>,
}

impl RegionRef {
    pub(crate) fn new(
        key: RegionKey,
        data: Arc<[f32]>,
        vmin: Vec<usize>,
        vmax: Vec<usize>,
    ) -> Self {
        Self {
            key,
            data,
            vmin,
            vmax,
        }
    }

    pub fn key(&self) -> &RegionKey {
        &self.key
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Shared buffer; equal pointers mean the same cached region.
    pub fn buffer(&self) -> &Arc<[f32]> {
        &self.data
    }

    /// First voxel covered, in full-domain coordinates.
    pub fn vmin(&self) -> &[usize] {
        &self.vmin
    }

    /// Last voxel covered, in full-domain coordinates.
    pub fn vmax(&self) -> &[usize] {
        &self.vmax
    }

    pub fn dims(&self) -> Vec<usize> {
        box_dims(&self.vmin, &self.vmax)
    }

    /// Value at a full-domain voxel coordinate, if covered.
    pub fn get(&self, coord: &[usize]) -> Option<f32> {
        let inside = coord.len() == self.vmin.len()
            && coord
                .iter()
                .zip(self.vmin.iter().zip(&self.vmax))
                .all(|(&c, (&lo, &hi))| c >= lo && c <= hi);
        if !inside {
            return None;
        }
        self.data
            .get(linearize_coords(coord, &self.vmin, &self.vmax))
            .copied()
    }
}
