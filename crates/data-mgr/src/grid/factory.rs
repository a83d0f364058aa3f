//! Grid topology classification and construction.

use std::collections::HashMap;
use std::sync::Arc;

use super::{
    CurvilinearGrid, CurvilinearSearchTree, Grid, GridCore, GridType, LayeredGrid, RegularGrid,
};
use crate::cache::RegionRef;
use crate::error::{DataMgrError, Result};
use crate::types::RegionKey;

/// What the factory needs to know about one coordinate variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordVarDesc {
    pub name: String,
    /// Number of dimensions of the coordinate variable.
    pub ndims: usize,
    /// Evenly spaced samples.
    pub uniform: bool,
}

impl CoordVarDesc {
    pub fn new(name: impl Into<String>, ndims: usize, uniform: bool) -> Self {
        Self {
            name: name.into(),
            ndims,
            uniform,
        }
    }
}

/// Pick the grid topology for a data variable with `data_ndims` dimensions
/// defined on `coords` (ordered by axis).
///
/// Rules are tried in order and the first match wins.
pub fn classify(data_ndims: usize, coords: &[CoordVarDesc]) -> Result<GridType> {
    let uniform_1d = |c: &CoordVarDesc| c.ndims == 1 && c.uniform;
    let curvilinear_2d = |c: &CoordVarDesc| c.ndims == 2 && !c.uniform;

    if data_ndims > 0 && coords.len() == data_ndims && coords.iter().all(uniform_1d) {
        return Ok(GridType::Regular);
    }

    if data_ndims == 3
        && coords.len() == 3
        && uniform_1d(&coords[0])
        && uniform_1d(&coords[1])
        && coords[2].ndims == 3
    {
        return Ok(GridType::Layered);
    }

    let horizontal =
        coords.len() >= 2 && curvilinear_2d(&coords[0]) && curvilinear_2d(&coords[1]);
    let vertical = match (data_ndims, coords.len()) {
        (2, 2) => true,
        (3, 3) => coords[2].ndims == 1,
        _ => false,
    };
    if horizontal && vertical {
        return Ok(GridType::Curvilinear);
    }

    let shape: Vec<String> = coords
        .iter()
        .map(|c| {
            format!(
                "{}({}-D, {})",
                c.name,
                c.ndims,
                if c.uniform { "uniform" } else { "non-uniform" }
            )
        })
        .collect();
    Err(DataMgrError::unsupported_topology(format!(
        "{data_ndims}-D variable on [{}]",
        shape.join(", ")
    )))
}

/// Data axes spanned by coordinate variable `i` of a grid.
pub(crate) fn coord_axes(grid_type: GridType, i: usize) -> Vec<usize> {
    match (grid_type, i) {
        (GridType::Regular, i) => vec![i],
        (GridType::Layered, 2) => vec![0, 1, 2],
        (GridType::Curvilinear, 0 | 1) => vec![0, 1],
        (_, i) => vec![i],
    }
}

/// Cache key of a curvilinear search tree: the x and y regions it reads
/// and the horizontal voxel box it indexes.
///
/// Coordinate regions can be blocked more coarsely than the data, so one
/// pair of regions may back grids over different voxel boxes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchTreeKey {
    pub x: RegionKey,
    pub y: RegionKey,
    pub vmin: [usize; 2],
    pub vmax: [usize; 2],
}

/// Builds grids from acquired regions and caches curvilinear search trees.
#[derive(Debug, Default)]
pub struct GridFactory {
    trees: HashMap<SearchTreeKey, Arc<CurvilinearSearchTree>>,
}

impl GridFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a grid of `grid_type` to already acquired regions.
    ///
    /// `coords` holds one region per coordinate variable, in axis order.
    /// Never reads from the cache or the data collection.
    pub fn make_grid(
        &mut self,
        grid_type: GridType,
        core: GridCore,
        coords: &[RegionRef],
    ) -> Result<Grid> {
        let ndims = core.dims().len();
        let expected = match grid_type {
            GridType::Regular => ndims,
            GridType::Layered => 3,
            GridType::Curvilinear => ndims,
        };
        if coords.len() != expected {
            return Err(DataMgrError::invalid_metadata(format!(
                "{}: {grid_type} grid needs {expected} coordinate regions, got {}",
                core.varname,
                coords.len()
            )));
        }

        match grid_type {
            GridType::Regular => {
                let axes = (0..ndims)
                    .map(|a| axis_values(&core, &coords[a], a))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Grid::Regular(RegularGrid::new(core, axes)?))
            }
            GridType::Layered => {
                let x = axis_values(&core, &coords[0], 0)?;
                let y = axis_values(&core, &coords[1], 1)?;
                Ok(Grid::Layered(LayeredGrid::new(core, x, y, coords[2].clone())?))
            }
            GridType::Curvilinear => {
                let (x, y) = (&coords[0], &coords[1]);
                let z = match coords.get(2) {
                    Some(z) => Some(axis_values(&core, z, 2)?),
                    None => None,
                };
                let tree = self.search_tree(&core, x, y);
                Ok(Grid::Curvilinear(CurvilinearGrid::new(
                    core,
                    x.clone(),
                    y.clone(),
                    z,
                    tree,
                )?))
            }
        }
    }

    fn search_tree(
        &mut self,
        core: &GridCore,
        x: &RegionRef,
        y: &RegionRef,
    ) -> Arc<CurvilinearSearchTree> {
        let (min_abs, max_abs) = (core.min_abs(), core.max_abs());
        let key = SearchTreeKey {
            x: x.key().clone(),
            y: y.key().clone(),
            vmin: [min_abs[0], min_abs[1]],
            vmax: [max_abs[0], max_abs[1]],
        };
        self.trees
            .entry(key)
            .or_insert_with_key(|key| {
                let tree = CurvilinearSearchTree::build(x, y, &key.vmin, &key.vmax);
                tracing::debug!(
                    x = %x.key().varname,
                    y = %y.key().varname,
                    level = x.key().level,
                    vmin = ?key.vmin,
                    vmax = ?key.vmax,
                    points = tree.len(),
                    "Built curvilinear search tree"
                );
                Arc::new(tree)
            })
            .clone()
    }

    /// Number of cached search trees.
    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Drop every cached search tree.
    pub fn clear(&mut self) {
        self.trees.clear();
    }
}

/// Values of a 1-D coordinate region over the grid's range along `axis`.
fn axis_values(core: &GridCore, region: &RegionRef, axis: usize) -> Result<Vec<f64>> {
    let lo = core.min_abs()[axis];
    (lo..lo + core.dims()[axis])
        .map(|v| {
            region.get(&[v]).map(f64::from).ok_or_else(|| {
                DataMgrError::invalid_metadata(format!(
                    "{}: coordinate {} does not cover voxel {v} on axis {axis}",
                    core.varname,
                    region.key().varname
                ))
            })
        })
        .collect()
}
