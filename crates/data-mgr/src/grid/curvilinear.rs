//! Grid with 2-D horizontal coordinate fields.
//!
//! Point queries cannot invert the coordinate fields arithmetically, so the
//! grid carries a 2-D search tree over its horizontal sample positions. The
//! tree is expensive to build and is shared through the grid factory's cache.

use std::sync::Arc;

use rstar::primitives::GeomWithData;
use rstar::RTree;

use super::{min_max, nearest_in, GridCore};
use crate::cache::RegionRef;
use crate::error::{DataMgrError, Result};

type TreePoint = GeomWithData<[f64; 2], [usize; 2]>;

/// Nearest-neighbour index over the horizontal sample positions of a
/// curvilinear grid. Each entry maps a user-space `(x, y)` to the
/// full-domain voxel `(i, j)` it was sampled at.
pub struct CurvilinearSearchTree {
    tree: RTree<TreePoint>,
}

impl CurvilinearSearchTree {
    /// Build the tree over the voxel box `[vmin, vmax]` of the x and y fields.
    pub fn build(x: &RegionRef, y: &RegionRef, vmin: &[usize], vmax: &[usize]) -> Self {
        let mut points = Vec::new();
        for j in vmin[1]..=vmax[1] {
            for i in vmin[0]..=vmax[0] {
                let (Some(px), Some(py)) = (x.get(&[i, j]), y.get(&[i, j])) else {
                    continue;
                };
                if px.is_nan() || py.is_nan() {
                    continue;
                }
                points.push(TreePoint::new([f64::from(px), f64::from(py)], [i, j]));
            }
        }
        Self {
            tree: RTree::bulk_load(points),
        }
    }

    /// Full-domain voxel of the sample nearest to `point`.
    pub fn nearest(&self, point: [f64; 2]) -> Option<[usize; 2]> {
        self.tree.nearest_neighbor(&point).map(|p| p.data)
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

impl std::fmt::Debug for CurvilinearSearchTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurvilinearSearchTree")
            .field("len", &self.len())
            .finish()
    }
}

/// Curvilinear grid: 2-D x and y fields, optional 1-D z axis.
#[derive(Debug)]
pub struct CurvilinearGrid {
    core: GridCore,
    x: RegionRef,
    y: RegionRef,
    z: Option<Vec<f64>>,
    tree: Arc<CurvilinearSearchTree>,
    horizontal: ([f64; 2], [f64; 2]),
}

impl CurvilinearGrid {
    pub(crate) fn new(
        core: GridCore,
        x: RegionRef,
        y: RegionRef,
        z: Option<Vec<f64>>,
        tree: Arc<CurvilinearSearchTree>,
    ) -> Result<Self> {
        let dims = core.dims().to_vec();
        let max_abs = core.max_abs();
        let covers = |r: &RegionRef| {
            r.vmin().len() == 2
                && (0..2).all(|a| r.vmin()[a] <= core.min_abs()[a] && r.vmax()[a] >= max_abs[a])
        };
        let z_ok = match (&z, dims.len()) {
            (None, 2) => true,
            (Some(z), 3) => z.len() == dims[2],
            _ => false,
        };
        if !covers(&x) || !covers(&y) || !z_ok {
            return Err(DataMgrError::invalid_metadata(format!(
                "{}: coordinates do not cover curvilinear grid {dims:?}",
                core.varname
            )));
        }

        let mut grid = Self {
            core,
            x,
            y,
            z,
            tree,
            horizontal: ([0.0; 2], [0.0; 2]),
        };
        let last = [dims[0] - 1, dims[1] - 1];
        let (lo, hi) = grid.horizontal_bounds(&[0, 0], &last);
        grid.horizontal = (lo, hi);
        Ok(grid)
    }

    pub(crate) fn core(&self) -> &GridCore {
        &self.core
    }

    /// Cached region of the x coordinate field.
    pub fn x_region(&self) -> &RegionRef {
        &self.x
    }

    /// Cached region of the y coordinate field.
    pub fn y_region(&self) -> &RegionRef {
        &self.y
    }

    pub fn z(&self) -> Option<&[f64]> {
        self.z.as_deref()
    }

    pub fn search_tree(&self) -> &Arc<CurvilinearSearchTree> {
        &self.tree
    }

    fn horizontal_abs(&self, i: usize, j: usize) -> [usize; 2] {
        [self.core.min_abs()[0] + i, self.core.min_abs()[1] + j]
    }

    fn horizontal_bounds(&self, vmin: &[usize], vmax: &[usize]) -> ([f64; 2], [f64; 2]) {
        let cells = (vmin[1]..=vmax[1])
            .flat_map(|j| (vmin[0]..=vmax[0]).map(move |i| (i, j)))
            .map(|(i, j)| self.horizontal_abs(i, j));
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for abs in cells {
            if let Some(v) = self.x.get(&abs) {
                xs.push(f64::from(v));
            }
            if let Some(v) = self.y.get(&abs) {
                ys.push(f64::from(v));
            }
        }
        let (xlo, xhi) = min_max(xs.into_iter()).unwrap_or((0.0, 0.0));
        let (ylo, yhi) = min_max(ys.into_iter()).unwrap_or((0.0, 0.0));
        ([xlo, ylo], [xhi, yhi])
    }

    pub(crate) fn user_coordinates(&self, idx: &[usize]) -> Option<Vec<f64>> {
        let abs = self.horizontal_abs(idx[0], idx[1]);
        let mut coords = vec![f64::from(self.x.get(&abs)?), f64::from(self.y.get(&abs)?)];
        if let Some(z) = &self.z {
            coords.push(*z.get(idx[2])?);
        }
        Some(coords)
    }

    pub(crate) fn bounds(&self, vmin: &[usize], vmax: &[usize]) -> (Vec<f64>, Vec<f64>) {
        let (lo, hi) = self.horizontal_bounds(vmin, vmax);
        let mut min = lo.to_vec();
        let mut max = hi.to_vec();
        if let Some(z) = &self.z {
            let (zlo, zhi) = min_max(z[vmin[2]..=vmax[2]].iter().copied()).unwrap_or((0.0, 0.0));
            min.push(zlo);
            max.push(zhi);
        }
        (min, max)
    }

    pub(crate) fn nearest_index(&self, point: &[f64]) -> Option<Vec<usize>> {
        let (lo, hi) = self.horizontal;
        if point[0] < lo[0] || point[0] > hi[0] || point[1] < lo[1] || point[1] > hi[1] {
            return None;
        }
        let [i, j] = self.tree.nearest([point[0], point[1]])?;
        let mut idx = vec![
            i.checked_sub(self.core.min_abs()[0])?,
            j.checked_sub(self.core.min_abs()[1])?,
        ];
        if let Some(z) = &self.z {
            idx.push(nearest_in(z, point[2])?);
        }
        self.core.contains_index(&idx).then_some(idx)
    }
}
