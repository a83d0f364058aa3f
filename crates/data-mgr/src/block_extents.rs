//! Per-block user-coordinate bounding boxes.
//!
//! Each block's box is padded with a one-voxel halo on every face that is
//! not on the domain boundary, so a block range found by [`BlockExtents::intersect`]
//! also contains the neighbour samples needed to interpolate across block
//! edges.

use crate::grid::Grid;
use crate::index::{linearize_coords, map_blk_to_vox, num_blocks, vectorize_coords};

/// Identity of a block extents index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockExtentsKey {
    /// Time step, only for time-varying coordinates.
    pub ts: Option<usize>,
    pub coord_vars: Vec<String>,
    pub level: i32,
    pub lod: i32,
}

/// Dense array of block bounding boxes addressed by linearized block
/// coordinate.
#[derive(Debug, Clone)]
pub struct BlockExtents {
    bmin: Vec<usize>,
    bmax: Vec<usize>,
    /// `ndims` values per block.
    mins: Vec<f64>,
    maxs: Vec<f64>,
}

impl BlockExtents {
    /// Empty index over the block range `[bmin, bmax]`.
    pub fn new(bmin: Vec<usize>, bmax: Vec<usize>) -> Self {
        let n: usize = bmin.iter().zip(&bmax).map(|(lo, hi)| hi - lo + 1).product();
        let ndims = bmin.len();
        Self {
            bmin,
            bmax,
            mins: vec![f64::INFINITY; n * ndims],
            maxs: vec![f64::NEG_INFINITY; n * ndims],
        }
    }

    /// Compute the box of every block of a coordinate-only grid spanning
    /// the full domain `dims`, blocked by `bs`.
    pub fn build(grid: &Grid, bs: &[usize], dims: &[usize]) -> Self {
        let nblocks = num_blocks(bs, dims);
        let bmin = vec![0; dims.len()];
        let bmax: Vec<usize> = nblocks.iter().map(|n| n - 1).collect();
        let mut extents = Self::new(bmin.clone(), bmax.clone());

        let total: usize = nblocks.iter().product();
        for offset in 0..total {
            let block = vectorize_coords(offset, &bmin, &bmax);
            let (mut vmin, mut vmax) = map_blk_to_vox(bs, dims, &block, &block);
            for a in 0..dims.len() {
                if vmin[a] > 0 {
                    vmin[a] -= 1;
                }
                if vmax[a] + 1 < dims[a] {
                    vmax[a] += 1;
                }
            }
            if let Some((min, max)) = grid.bounding_box(&vmin, &vmax) {
                extents.insert(&block, &min, &max);
            }
        }

        tracing::debug!(
            varname = %grid.varname(),
            level = grid.level(),
            blocks = total,
            "Built block extents index"
        );
        extents
    }

    fn ndims(&self) -> usize {
        self.bmin.len()
    }

    /// Number of blocks covered.
    pub fn len(&self) -> usize {
        self.mins.len() / self.ndims().max(1)
    }

    pub fn is_empty(&self) -> bool {
        self.mins.is_empty()
    }

    /// Store the box of one block. Coordinates outside the index are ignored.
    pub fn insert(&mut self, block: &[usize], min: &[f64], max: &[f64]) -> bool {
        let n = self.ndims();
        let inside = block.len() == n
            && block
                .iter()
                .zip(self.bmin.iter().zip(&self.bmax))
                .all(|(&b, (&lo, &hi))| b >= lo && b <= hi);
        if !inside || min.len() < n || max.len() < n {
            return false;
        }
        let offset = linearize_coords(block, &self.bmin, &self.bmax) * n;
        self.mins[offset..offset + n].copy_from_slice(&min[..n]);
        self.maxs[offset..offset + n].copy_from_slice(&max[..n]);
        true
    }

    /// Box of one block, if it has been inserted.
    pub fn get(&self, block: &[usize]) -> Option<(&[f64], &[f64])> {
        let n = self.ndims();
        let inside = block.len() == n
            && block
                .iter()
                .zip(self.bmin.iter().zip(&self.bmax))
                .all(|(&b, (&lo, &hi))| b >= lo && b <= hi);
        if !inside {
            return None;
        }
        let offset = linearize_coords(block, &self.bmin, &self.bmax) * n;
        let min = &self.mins[offset..offset + n];
        let max = &self.maxs[offset..offset + n];
        min.iter().all(|v| v.is_finite()).then_some((min, max))
    }

    /// Smallest block range containing every block whose box overlaps the
    /// user-coordinate box `[min, max]`, or `None` if no block overlaps.
    pub fn intersect(&self, min: &[f64], max: &[f64]) -> Option<(Vec<usize>, Vec<usize>)> {
        let n = self.ndims();
        if min.len() < n || max.len() < n {
            return None;
        }

        let mut found: Option<(Vec<usize>, Vec<usize>)> = None;
        for (i, (bmins, bmaxs)) in self.mins.chunks(n).zip(self.maxs.chunks(n)).enumerate() {
            let overlaps = (0..n).all(|a| bmins[a] <= max[a] && bmaxs[a] >= min[a]);
            if !overlaps {
                continue;
            }
            let block = vectorize_coords(i, &self.bmin, &self.bmax);
            found = Some(match found.take() {
                None => (block.clone(), block),
                Some((mut lo, mut hi)) => {
                    for a in 0..n {
                        lo[a] = lo[a].min(block[a]);
                        hi[a] = hi[a].max(block[a]);
                    }
                    (lo, hi)
                }
            });
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridCore, RegularGrid};

    /// 16x16 voxels in 4x4 blocks, coordinates equal to voxel indices.
    fn index() -> BlockExtents {
        let core = GridCore::new("T", 0, 0, 0, vec![0, 0], &[15, 15], None, false);
        let axis: Vec<f64> = (0..16).map(f64::from).collect();
        let grid = Grid::Regular(RegularGrid::new(core, vec![axis.clone(), axis]).unwrap());
        BlockExtents::build(&grid, &[4, 4], &[16, 16])
    }

    #[test]
    fn test_halo_on_interior_faces_only() {
        let ext = index();
        assert_eq!(ext.len(), 16);

        // Corner block: no halo on the domain boundary
        let (min, max) = ext.get(&[0, 0]).unwrap();
        assert_eq!(min, &[0.0, 0.0]);
        assert_eq!(max, &[4.0, 4.0]);

        let (min, max) = ext.get(&[2, 3]).unwrap();
        assert_eq!(min, &[7.0, 11.0]);
        assert_eq!(max, &[12.0, 15.0]);
    }

    #[test]
    fn test_intersect_inside_one_block() {
        let ext = index();
        let (bmin, bmax) = ext.intersect(&[9.5, 9.5], &[10.5, 10.5]).unwrap();
        assert_eq!(bmin, vec![2, 2]);
        assert_eq!(bmax, vec![2, 2]);
    }

    #[test]
    fn test_intersect_whole_domain() {
        let ext = index();
        let (bmin, bmax) = ext.intersect(&[-100.0, -100.0], &[100.0, 100.0]).unwrap();
        assert_eq!(bmin, vec![0, 0]);
        assert_eq!(bmax, vec![3, 3]);
    }

    #[test]
    fn test_intersect_includes_halo_neighbours() {
        let ext = index();
        // Voxel 8 lies in block 2 and in the halo of block 1
        let (bmin, bmax) = ext.intersect(&[8.0, 9.0], &[8.0, 10.0]).unwrap();
        assert_eq!(bmin, vec![1, 2]);
        assert_eq!(bmax, vec![2, 2]);
    }

    #[test]
    fn test_intersect_outside() {
        let ext = index();
        assert!(ext.intersect(&[20.0, 20.0], &[30.0, 30.0]).is_none());
        assert!(ext.intersect(&[1.0], &[2.0]).is_none());
    }

    #[test]
    fn test_insert_out_of_range() {
        let mut ext = BlockExtents::new(vec![0, 0], vec![1, 1]);
        assert!(!ext.insert(&[2, 0], &[0.0, 0.0], &[1.0, 1.0]));
        assert!(ext.get(&[1, 1]).is_none());
        assert!(ext.insert(&[1, 1], &[0.0, 0.0], &[1.0, 1.0]));
        assert!(ext.get(&[1, 1]).is_some());
    }
}
