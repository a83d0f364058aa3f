//! Grid with uniform horizontal axes and a terrain-following vertical field.

use super::{min_max, nearest_uniform, GridCore};
use crate::cache::RegionRef;
use crate::error::{DataMgrError, Result};

/// Layered grid: uniform 1-D x and y, and a 3-D field giving the height of
/// every sample.
#[derive(Debug)]
pub struct LayeredGrid {
    core: GridCore,
    x: Vec<f64>,
    y: Vec<f64>,
    z: RegionRef,
}

impl LayeredGrid {
    pub(crate) fn new(core: GridCore, x: Vec<f64>, y: Vec<f64>, z: RegionRef) -> Result<Self> {
        let dims = core.dims();
        let max_abs = core.max_abs();
        let covers = dims.len() == 3
            && z.vmin().len() == 3
            && z.vmin().iter().zip(core.min_abs()).all(|(zlo, lo)| zlo <= lo)
            && z.vmax().iter().zip(&max_abs).all(|(zhi, hi)| zhi >= hi);
        if !covers || x.len() != dims[0] || y.len() != dims[1] {
            return Err(DataMgrError::invalid_metadata(format!(
                "{}: coordinates do not cover layered grid {dims:?}",
                core.varname
            )));
        }
        Ok(Self { core, x, y, z })
    }

    pub(crate) fn core(&self) -> &GridCore {
        &self.core
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    /// Cached region of the vertical coordinate field.
    pub fn z_region(&self) -> &RegionRef {
        &self.z
    }

    fn z_at(&self, idx: &[usize]) -> Option<f64> {
        self.z.get(&self.core.to_abs(idx)).map(f64::from)
    }

    pub(crate) fn user_coordinates(&self, idx: &[usize]) -> Option<Vec<f64>> {
        Some(vec![*self.x.get(idx[0])?, *self.y.get(idx[1])?, self.z_at(idx)?])
    }

    pub(crate) fn bounds(&self, vmin: &[usize], vmax: &[usize]) -> (Vec<f64>, Vec<f64>) {
        let (xa, xb) = (self.x[vmin[0]], self.x[vmax[0]]);
        let (ya, yb) = (self.y[vmin[1]], self.y[vmax[1]]);

        let heights = (vmin[2]..=vmax[2]).flat_map(|k| {
            (vmin[1]..=vmax[1])
                .flat_map(move |j| (vmin[0]..=vmax[0]).map(move |i| [i, j, k]))
        });
        let (zlo, zhi) = min_max(heights.filter_map(|idx| self.z_at(&idx))).unwrap_or((0.0, 0.0));

        (
            vec![xa.min(xb), ya.min(yb), zlo],
            vec![xa.max(xb), ya.max(yb), zhi],
        )
    }

    /// Nearest sample: horizontal position on the uniform axes, then the
    /// closest layer within that column.
    pub(crate) fn nearest_index(&self, point: &[f64]) -> Option<Vec<usize>> {
        let i = nearest_uniform(&self.x, point[0])?;
        let j = nearest_uniform(&self.y, point[1])?;
        let column: Vec<f64> = (0..self.core.dims()[2])
            .filter_map(|k| self.z_at(&[i, j, k]))
            .collect();
        let k = super::nearest_in(&column, point[2])?;
        Some(vec![i, j, k])
    }
}
