//! In-memory data collection.
//!
//! Holds native-resolution arrays for each variable and time step. Useful
//! for embedding derived or synthetic datasets and for exercising the data
//! manager without a file format behind it.

use std::collections::{HashMap, HashSet};

use super::{DataCollection, VarHandle};
use crate::error::{DataMgrError, Result};
use crate::index::{box_dims, linearize_coords, map_blk_to_vox, vectorize_coords};
use crate::pyramid::decimate_dims;
use crate::types::VarInfo;

struct MemoryVar {
    info: VarInfo,
    dims: Vec<usize>,
    bs: Vec<usize>,
    steps: Vec<Vec<f32>>,
}

struct OpenVar {
    varname: String,
    ts: usize,
    level: i32,
}

/// Data collection backed by arrays held in memory.
#[derive(Default)]
pub struct MemoryCollection {
    vars: HashMap<String, MemoryVar>,
    open: HashMap<u64, OpenVar>,
    next_handle: u64,
    reads: usize,
    failing: HashSet<String>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable with its native dimensions, block size and one array
    /// per time step (a single array for time-invariant variables).
    pub fn with_variable(
        mut self,
        info: VarInfo,
        dims: Vec<usize>,
        bs: Vec<usize>,
        steps: Vec<Vec<f32>>,
    ) -> Self {
        self.insert_variable(info, dims, bs, steps);
        self
    }

    /// Add or replace a variable.
    pub fn insert_variable(
        &mut self,
        info: VarInfo,
        dims: Vec<usize>,
        bs: Vec<usize>,
        steps: Vec<Vec<f32>>,
    ) {
        self.vars.insert(
            info.name.clone(),
            MemoryVar {
                info,
                dims,
                bs,
                steps,
            },
        );
    }

    /// Remove a variable.
    pub fn remove_variable(&mut self, varname: &str) -> bool {
        self.vars.remove(varname).is_some()
    }

    /// Make every subsequent read of `varname` fail (or succeed again).
    pub fn set_read_failure(&mut self, varname: &str, fail: bool) {
        if fail {
            self.failing.insert(varname.to_string());
        } else {
            self.failing.remove(varname);
        }
    }

    /// Number of block reads served so far.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.open.len()
    }

    /// Number of time steps stored for a variable.
    pub fn num_timesteps(&self, varname: &str) -> usize {
        self.vars.get(varname).map_or(0, |v| v.steps.len())
    }

    fn var(&self, varname: &str) -> Result<&MemoryVar> {
        self.vars
            .get(varname)
            .ok_or_else(|| DataMgrError::variable_not_found(varname))
    }
}

impl DataCollection for MemoryCollection {
    fn var_info(&self, varname: &str) -> Option<VarInfo> {
        self.vars.get(varname).map(|v| v.info.clone())
    }

    fn dim_lens_at_level(&self, varname: &str, level: i32) -> Result<(Vec<usize>, Vec<usize>)> {
        let var = self.var(varname)?;
        let coarsest = var.info.coarsest_level();
        if level > 0 || level < coarsest {
            return Err(DataMgrError::invalid_metadata(format!(
                "{varname}: level {level} outside [{coarsest}, 0]"
            )));
        }
        Ok((decimate_dims(&var.dims, level.unsigned_abs() as usize), var.bs.clone()))
    }

    fn variable_exists(&self, ts: usize, varname: &str, level: i32, lod: i32) -> bool {
        let Some(var) = self.vars.get(varname) else {
            return false;
        };
        let step_ok = if var.info.time_varying {
            ts < var.steps.len()
        } else {
            !var.steps.is_empty()
        };
        let coarsest = var.info.coarsest_level();
        step_ok
            && (coarsest..=0).contains(&level)
            && lod >= 0
            && (lod as usize) < var.info.num_lods()
    }

    fn open_variable_read(
        &mut self,
        ts: usize,
        varname: &str,
        level: i32,
        _lod: i32,
    ) -> Result<VarHandle> {
        self.var(varname)?;
        let handle = self.next_handle;
        self.next_handle += 1;
        self.open.insert(
            handle,
            OpenVar {
                varname: varname.to_string(),
                ts,
                level,
            },
        );
        Ok(VarHandle(handle))
    }

    fn read_region_block(
        &mut self,
        fd: VarHandle,
        bmin: &[usize],
        bmax: &[usize],
        region: &mut [f32],
    ) -> Result<()> {
        let open = self
            .open
            .get(&fd.0)
            .ok_or_else(|| DataMgrError::read_failure(format!("invalid handle {}", fd.0)))?;
        let var = self.var(&open.varname)?;

        if self.failing.contains(&open.varname) {
            return Err(DataMgrError::read_failure(format!(
                "{}: simulated read failure",
                open.varname
            )));
        }
        if open.level != 0 {
            return Err(DataMgrError::read_failure(format!(
                "{}: level {} is not stored",
                open.varname, open.level
            )));
        }

        let ts = if var.info.time_varying { open.ts } else { 0 };
        let data = var.steps.get(ts).ok_or_else(|| {
            DataMgrError::read_failure(format!("{}: no time step {}", open.varname, ts))
        })?;

        let (vmin, vmax) = map_blk_to_vox(&var.bs, &var.dims, bmin, bmax);
        let n: usize = box_dims(&vmin, &vmax).iter().product();
        if region.len() != n {
            return Err(DataMgrError::read_failure(format!(
                "{}: region buffer holds {} values, block range covers {}",
                open.varname,
                region.len(),
                n
            )));
        }

        let full_max: Vec<usize> = var.dims.iter().map(|d| d - 1).collect();
        let full_min = vec![0; var.dims.len()];
        for (offset, value) in region.iter_mut().enumerate() {
            let coord = vectorize_coords(offset, &vmin, &vmax);
            *value = data[linearize_coords(&coord, &full_min, &full_max)];
        }

        self.reads += 1;
        Ok(())
    }

    fn close_variable(&mut self, fd: VarHandle) -> Result<()> {
        self.open
            .remove(&fd.0)
            .map(|_| ())
            .ok_or_else(|| DataMgrError::read_failure(format!("invalid handle {}", fd.0)))
    }
}
