//! Grid with one evenly spaced coordinate per axis.

use super::{nearest_uniform, GridCore};
use crate::error::{DataMgrError, Result};

/// Regular grid: separable, uniform 1-D coordinates.
#[derive(Debug)]
pub struct RegularGrid {
    core: GridCore,
    /// Coordinates along each axis, covering only the grid's voxel range.
    coords: Vec<Vec<f64>>,
}

impl RegularGrid {
    pub(crate) fn new(core: GridCore, coords: Vec<Vec<f64>>) -> Result<Self> {
        let dims = core.dims();
        if coords.len() != dims.len() || coords.iter().zip(dims).any(|(c, &n)| c.len() != n) {
            return Err(DataMgrError::invalid_metadata(format!(
                "{}: coordinate lengths do not match grid dimensions {dims:?}",
                core.varname
            )));
        }
        Ok(Self { core, coords })
    }

    pub(crate) fn core(&self) -> &GridCore {
        &self.core
    }

    /// Coordinates along `axis`.
    pub fn coords(&self, axis: usize) -> &[f64] {
        self.coords.get(axis).map(Vec::as_slice).unwrap_or_default()
    }

    pub(crate) fn user_coordinates(&self, idx: &[usize]) -> Option<Vec<f64>> {
        idx.iter()
            .zip(&self.coords)
            .map(|(&i, c)| c.get(i).copied())
            .collect()
    }

    pub(crate) fn bounds(&self, vmin: &[usize], vmax: &[usize]) -> (Vec<f64>, Vec<f64>) {
        let mut min = Vec::with_capacity(vmin.len());
        let mut max = Vec::with_capacity(vmin.len());
        for ((c, &lo), &hi) in self.coords.iter().zip(vmin).zip(vmax) {
            min.push(c[lo].min(c[hi]));
            max.push(c[lo].max(c[hi]));
        }
        (min, max)
    }

    pub(crate) fn nearest_index(&self, point: &[f64]) -> Option<Vec<usize>> {
        self.coords
            .iter()
            .zip(point)
            .map(|(c, &p)| nearest_uniform(c, p))
            .collect()
    }
}
