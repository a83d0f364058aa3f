//! The data collection interface the data manager reads through.
//!
//! A data collection is the format-specific side of the system: it knows
//! which variables exist, how they are dimensioned at each refinement level
//! and how to read a block-aligned region of one of them. The data manager
//! owns all caching and grid construction on top of it.

mod memory;

pub use memory::MemoryCollection;

use crate::error::Result;
use crate::types::VarInfo;

/// Handle to a variable opened for reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarHandle(pub u64);

/// Source of variable metadata and raw block reads.
pub trait DataCollection {
    /// Metadata for a variable, or `None` if the collection does not define it.
    fn var_info(&self, varname: &str) -> Option<VarInfo>;

    /// Dimensions and block size of a variable at a refinement level.
    fn dim_lens_at_level(&self, varname: &str, level: i32) -> Result<(Vec<usize>, Vec<usize>)>;

    /// Whether data for the variable is available at the given time step,
    /// refinement level and level of detail.
    fn variable_exists(&self, ts: usize, varname: &str, level: i32, lod: i32) -> bool;

    /// Open a variable for reading at a time step, level and level of detail.
    fn open_variable_read(
        &mut self,
        ts: usize,
        varname: &str,
        level: i32,
        lod: i32,
    ) -> Result<VarHandle>;

    /// Read the block range `[bmin, bmax]` of an open variable into `region`.
    ///
    /// `region` receives the voxel box covered by the block range, clamped
    /// to the variable's dimensions, with the first axis varying fastest.
    fn read_region_block(
        &mut self,
        fd: VarHandle,
        bmin: &[usize],
        bmax: &[usize],
        region: &mut [f32],
    ) -> Result<()>;

    /// Close a handle returned by [`open_variable_read`](Self::open_variable_read).
    fn close_variable(&mut self, fd: VarHandle) -> Result<()>;

    /// Whether the collection stores the given refinement level directly.
    ///
    /// Levels that are not stored are built by the data manager by
    /// decimating the next finer level.
    fn level_is_stored(&self, _varname: &str, level: i32) -> bool {
        level == 0
    }

    /// Spatial coordinate variables of a variable, ordered by axis.
    fn coord_vars(&self, varname: &str) -> Option<Vec<String>> {
        self.var_info(varname).map(|v| v.coord_vars)
    }

    /// Compression ratios available for a variable.
    fn cratios(&self, varname: &str) -> Vec<usize> {
        self.var_info(varname).map(|v| v.cratios).unwrap_or_default()
    }

    fn is_time_varying(&self, varname: &str) -> bool {
        self.var_info(varname).is_some_and(|v| v.time_varying)
    }

    fn periodic(&self, varname: &str) -> Vec<bool> {
        self.var_info(varname).map(|v| v.periodic).unwrap_or_default()
    }

    fn missing_value(&self, varname: &str) -> Option<f64> {
        self.var_info(varname).and_then(|v| v.missing_value)
    }

    /// Number of refinement levels declared for a variable.
    fn num_ref_levels(&self, varname: &str) -> usize {
        self.var_info(varname).map_or(0, |v| v.num_levels)
    }
}
