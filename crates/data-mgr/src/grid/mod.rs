//! Grid views over cached regions.
//!
//! A [`Grid`] is one of three structurally different layouts, chosen once by
//! [`classify`] from the coordinate variables of the data variable:
//!
//! - [`RegularGrid`]: one uniform 1-D coordinate per axis
//! - [`LayeredGrid`]: uniform 1-D x and y plus a 3-D terrain-following z field
//! - [`CurvilinearGrid`]: 2-D x and y fields plus an optional 1-D z axis
//!
//! Grids share sample buffers with the region cache and never own block
//! data. A grid obtained with a lock must be handed back through
//! `DataMgr::unlock_grid`.

mod curvilinear;
mod factory;
mod layered;
mod regular;

use std::fmt;

pub use curvilinear::{CurvilinearGrid, CurvilinearSearchTree};
pub(crate) use factory::coord_axes;
pub use factory::{classify, CoordVarDesc, GridFactory, SearchTreeKey};
pub use layered::LayeredGrid;
pub use regular::RegularGrid;

use crate::cache::RegionRef;
use crate::index::{box_dims, vectorize_coords};
use crate::types::RegionKey;

/// Grid topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridType {
    Regular,
    Layered,
    Curvilinear,
}

impl fmt::Display for GridType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridType::Regular => write!(f, "regular"),
            GridType::Layered => write!(f, "layered"),
            GridType::Curvilinear => write!(f, "curvilinear"),
        }
    }
}

/// State shared by every grid variant.
#[derive(Debug)]
pub struct GridCore {
    varname: String,
    ts: usize,
    level: i32,
    lod: i32,
    min_abs: Vec<usize>,
    dims: Vec<usize>,
    data: Option<RegionRef>,
    missing_value: Option<f64>,
    periodic: Vec<bool>,
    locked: bool,
}

impl GridCore {
    /// Grid covering the voxel box `[vmin, vmax]` of a variable.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        varname: impl Into<String>,
        ts: usize,
        level: i32,
        lod: i32,
        vmin: Vec<usize>,
        vmax: &[usize],
        data: Option<RegionRef>,
        locked: bool,
    ) -> Self {
        let dims = box_dims(&vmin, vmax);
        let periodic = vec![false; dims.len()];
        Self {
            varname: varname.into(),
            ts,
            level,
            lod,
            min_abs: vmin,
            dims,
            data,
            missing_value: None,
            periodic,
            locked,
        }
    }

    pub(crate) fn with_missing_value(mut self, missing_value: Option<f64>) -> Self {
        self.missing_value = missing_value;
        self
    }

    pub(crate) fn with_periodic(mut self, periodic: Vec<bool>) -> Self {
        if periodic.len() == self.dims.len() {
            self.periodic = periodic;
        }
        self
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn min_abs(&self) -> &[usize] {
        &self.min_abs
    }

    /// Last voxel covered, in full-domain coordinates.
    pub fn max_abs(&self) -> Vec<usize> {
        self.min_abs
            .iter()
            .zip(&self.dims)
            .map(|(&lo, &n)| lo + n - 1)
            .collect()
    }

    /// Full-domain voxel coordinate of a grid-relative index.
    pub(crate) fn to_abs(&self, idx: &[usize]) -> Vec<usize> {
        idx.iter().zip(&self.min_abs).map(|(&i, &lo)| i + lo).collect()
    }

    pub(crate) fn contains_index(&self, idx: &[usize]) -> bool {
        idx.len() == self.dims.len() && idx.iter().zip(&self.dims).all(|(&i, &n)| i < n)
    }

    fn value_at_index(&self, idx: &[usize]) -> Option<f32> {
        if !self.contains_index(idx) {
            return None;
        }
        self.data.as_ref()?.get(&self.to_abs(idx))
    }

    fn is_missing(&self, v: f32) -> bool {
        v.is_nan() || self.missing_value.is_some_and(|m| m as f32 == v)
    }
}

/// Position of the sample nearest to `p` along an evenly spaced axis, or
/// `None` when `p` lies outside the axis.
pub(crate) fn nearest_uniform(coords: &[f64], p: f64) -> Option<usize> {
    let first = *coords.first()?;
    let last = *coords.last()?;
    if p < first.min(last) || p > first.max(last) {
        return None;
    }
    if coords.len() == 1 || first == last {
        return Some(0);
    }
    let delta = (last - first) / (coords.len() - 1) as f64;
    let i = ((p - first) / delta).round().max(0.0) as usize;
    Some(i.min(coords.len() - 1))
}

/// Position of the sample nearest to `p` along an arbitrarily spaced axis,
/// or `None` when `p` lies outside the axis.
pub(crate) fn nearest_in(coords: &[f64], p: f64) -> Option<usize> {
    let (lo, hi) = min_max(coords.iter().copied())?;
    if p < lo || p > hi {
        return None;
    }
    coords
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - p).abs().total_cmp(&(b.1 - p).abs()))
        .map(|(i, _)| i)
}

pub(crate) fn min_max(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.filter(|v| !v.is_nan()).fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// A grid view bound to cached regions.
#[derive(Debug)]
pub enum Grid {
    Regular(RegularGrid),
    Layered(LayeredGrid),
    Curvilinear(CurvilinearGrid),
}

impl Grid {
    fn core(&self) -> &GridCore {
        match self {
            Grid::Regular(g) => g.core(),
            Grid::Layered(g) => g.core(),
            Grid::Curvilinear(g) => g.core(),
        }
    }

    pub fn grid_type(&self) -> GridType {
        match self {
            Grid::Regular(_) => GridType::Regular,
            Grid::Layered(_) => GridType::Layered,
            Grid::Curvilinear(_) => GridType::Curvilinear,
        }
    }

    /// Number of samples along each axis.
    pub fn dims(&self) -> &[usize] {
        self.core().dims()
    }

    /// Offset of the grid's first voxel within the full domain.
    pub fn min_abs(&self) -> &[usize] {
        self.core().min_abs()
    }

    pub fn level(&self) -> i32 {
        self.core().level
    }

    pub fn lod(&self) -> i32 {
        self.core().lod
    }

    pub fn timestep(&self) -> usize {
        self.core().ts
    }

    pub fn varname(&self) -> &str {
        &self.core().varname
    }

    /// False for coordinate-only grids.
    pub fn has_data(&self) -> bool {
        self.core().data.is_some()
    }

    /// True if the grid holds cache locks that must be released.
    pub fn is_locked(&self) -> bool {
        self.core().locked
    }

    pub fn missing_value(&self) -> Option<f64> {
        self.core().missing_value
    }

    pub fn periodic(&self) -> &[bool] {
        &self.core().periodic
    }

    /// The cached region holding the grid's samples.
    pub fn data(&self) -> Option<&RegionRef> {
        self.core().data.as_ref()
    }

    /// Sample at a grid-relative index.
    pub fn value_at_index(&self, idx: &[usize]) -> Option<f32> {
        self.core().value_at_index(idx)
    }

    /// User coordinates of the sample at a grid-relative index.
    pub fn user_coordinates(&self, idx: &[usize]) -> Option<Vec<f64>> {
        if !self.core().contains_index(idx) {
            return None;
        }
        match self {
            Grid::Regular(g) => g.user_coordinates(idx),
            Grid::Layered(g) => g.user_coordinates(idx),
            Grid::Curvilinear(g) => g.user_coordinates(idx),
        }
    }

    /// User-coordinate bounding box of the grid-relative voxel box
    /// `[vmin, vmax]`.
    pub fn bounding_box(&self, vmin: &[usize], vmax: &[usize]) -> Option<(Vec<f64>, Vec<f64>)> {
        let core = self.core();
        if !core.contains_index(vmin) || !core.contains_index(vmax) {
            return None;
        }
        if vmin.iter().zip(vmax).any(|(lo, hi)| lo > hi) {
            return None;
        }
        Some(match self {
            Grid::Regular(g) => g.bounds(vmin, vmax),
            Grid::Layered(g) => g.bounds(vmin, vmax),
            Grid::Curvilinear(g) => g.bounds(vmin, vmax),
        })
    }

    /// User-coordinate bounding box of the whole grid.
    pub fn user_extents(&self) -> (Vec<f64>, Vec<f64>) {
        let core = self.core();
        let vmin = vec![0; core.dims.len()];
        let vmax: Vec<usize> = core.dims.iter().map(|n| n - 1).collect();
        self.bounding_box(&vmin, &vmax).unwrap_or_default()
    }

    /// Sample nearest to a point in user coordinates.
    ///
    /// Returns `None` for points outside the grid or grids without data.
    /// Missing samples are returned as stored.
    pub fn value_at(&self, point: &[f64]) -> Option<f32> {
        if point.len() < self.dims().len() || !self.has_data() {
            return None;
        }
        let idx = match self {
            Grid::Regular(g) => g.nearest_index(point),
            Grid::Layered(g) => g.nearest_index(point),
            Grid::Curvilinear(g) => g.nearest_index(point),
        }?;
        self.value_at_index(&idx)
    }

    /// Samples in storage order, first axis fastest.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.core()
            .data
            .as_ref()
            .map(|region| region.data())
            .unwrap_or_default()
            .iter()
            .copied()
    }

    /// Grid-relative index of every sample, in the order of [`iter`](Self::iter).
    pub fn indices(&self) -> impl Iterator<Item = Vec<usize>> + '_ {
        let dims = self.dims();
        let n: usize = if self.has_data() { dims.iter().product() } else { 0 };
        let vmin = vec![0; dims.len()];
        let vmax: Vec<usize> = dims.iter().map(|d| d - 1).collect();
        (0..n).map(move |offset| vectorize_coords(offset, &vmin, &vmax))
    }

    /// Minimum and maximum sample, skipping missing values.
    pub fn range(&self) -> Option<(f32, f32)> {
        let core = self.core();
        self.iter()
            .filter(|&v| !core.is_missing(v))
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Keys of the cached regions the grid refers to: the data region and
    /// any coordinate regions it keeps.
    pub fn region_keys(&self) -> Vec<RegionKey> {
        let mut keys: Vec<RegionKey> = self.core().data.iter().map(|r| r.key().clone()).collect();
        match self {
            Grid::Regular(_) => {}
            Grid::Layered(g) => keys.push(g.z_region().key().clone()),
            Grid::Curvilinear(g) => {
                keys.push(g.x_region().key().clone());
                keys.push(g.y_region().key().clone());
            }
        }
        keys
    }
}
