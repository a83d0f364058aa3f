//! The data manager facade.
//!
//! [`DataMgr`] owns every cache in the system: decoded regions, block
//! extents indices, curvilinear search trees and the small metadata caches
//! for extents, data ranges and variable existence. All access goes through
//! an explicit `&mut DataMgr`; see [`crate::shared::SharedDataMgr`] for a
//! mutex-guarded handle usable from async tasks.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;

use crate::block_extents::{BlockExtents, BlockExtentsKey};
use crate::cache::{RegionCache, RegionRef};
use crate::collection::DataCollection;
use crate::config::DataMgrConfig;
use crate::error::{DataMgrError, Result};
use crate::grid::{classify, coord_axes, CoordVarDesc, Grid, GridCore, GridFactory, GridType};
use crate::index::{map_blk_to_vox, map_vox_to_blk, num_blocks};
use crate::pyramid::materialize;
use crate::types::{CacheStats, RegionKey, VarInfo};

/// Part of a variable to materialize.
#[derive(Debug, Clone, PartialEq)]
pub enum Subset {
    /// The whole domain.
    All,
    /// Blocks whose halo-padded bounding box overlaps a user-coordinate box.
    Extents { min: Vec<f64>, max: Vec<f64> },
    /// Blocks covering an inclusive voxel box.
    Voxels { min: Vec<usize>, max: Vec<usize> },
}

/// A request for a variable.
///
/// ```ignore
/// let query = VariableQuery::new(0, "T")
///     .at_level(-1)
///     .within(vec![0.0, 0.0], vec![10.0, 5.0])
///     .locked();
/// let grid = mgr.get_variable(&query)?;
/// // ...
/// mgr.unlock_grid(grid);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct VariableQuery {
    pub ts: usize,
    pub varname: String,
    /// Refinement level; clamped into the legal range.
    pub level: i32,
    /// Level of detail; clamped into the legal range, negative counts back
    /// from the finest.
    pub lod: i32,
    pub subset: Subset,
    /// Keep the grid's regions locked until `unlock_grid`.
    pub lock: bool,
}

impl VariableQuery {
    pub fn new(ts: usize, varname: impl Into<String>) -> Self {
        Self {
            ts,
            varname: varname.into(),
            level: 0,
            lod: 0,
            subset: Subset::All,
            lock: false,
        }
    }

    pub fn at_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn at_lod(mut self, lod: i32) -> Self {
        self.lod = lod;
        self
    }

    /// Restrict to the blocks overlapping a user-coordinate box.
    pub fn within(mut self, min: Vec<f64>, max: Vec<f64>) -> Self {
        self.subset = Subset::Extents { min, max };
        self
    }

    /// Restrict to the blocks covering a voxel box.
    pub fn voxels(mut self, min: Vec<usize>, max: Vec<usize>) -> Self {
        self.subset = Subset::Voxels { min, max };
        self
    }

    pub fn locked(mut self) -> Self {
        self.lock = true;
        self
    }
}

type ExtentsKey = (Option<usize>, Vec<String>, i32);
type VarKey = (usize, String, i32, i32);

/// Multi-resolution variable cache and grid builder over a data collection.
pub struct DataMgr<C: DataCollection> {
    collection: C,
    config: DataMgrConfig,
    cache: RegionCache,
    block_extents: HashMap<BlockExtentsKey, BlockExtents>,
    factory: GridFactory,
    extents_cache: HashMap<ExtentsKey, (Vec<f64>, Vec<f64>)>,
    range_cache: HashMap<VarKey, (f32, f32)>,
    exists: HashSet<VarKey>,
}

impl<C: DataCollection> DataMgr<C> {
    /// Create a data manager reading from `collection` with the memory
    /// budget given by `config`.
    pub fn new(collection: C, config: DataMgrConfig) -> Result<Self> {
        config.validate()?;
        let cache = RegionCache::new(config.mem_size_bytes(), config.pool_block_size);
        tracing::info!(
            mem_size_mb = config.mem_size_mb,
            pool_block_size = config.pool_block_size,
            pool_blocks = config.num_pool_blocks(),
            "Data manager initialized"
        );
        Ok(Self {
            collection,
            config,
            cache,
            block_extents: HashMap::new(),
            factory: GridFactory::new(),
            extents_cache: HashMap::new(),
            range_cache: HashMap::new(),
            exists: HashSet::new(),
        })
    }

    pub fn config(&self) -> &DataMgrConfig {
        &self.config
    }

    pub fn collection(&self) -> &C {
        &self.collection
    }

    /// Mutable access to the data collection.
    ///
    /// Cached regions are not invalidated; call [`free_var`](Self::free_var)
    /// for any variable whose data changes.
    pub fn collection_mut(&mut self) -> &mut C {
        &mut self.collection
    }

    fn var_info(&self, varname: &str) -> Result<VarInfo> {
        self.collection
            .var_info(varname)
            .ok_or_else(|| DataMgrError::variable_not_found(varname))
    }

    /// Clamp a refinement level to the levels both the variable and every
    /// one of its coordinate variables provide.
    fn clamp_level(&self, info: &VarInfo, level: i32) -> i32 {
        let coarsest = info
            .coord_vars
            .iter()
            .filter_map(|c| self.collection.var_info(c))
            .map(|c| c.coarsest_level())
            .fold(info.coarsest_level(), i32::max);
        level.clamp(coarsest, 0)
    }

    /// Time step that coordinate-derived caches are keyed on: `Some(ts)`
    /// only when a coordinate variable changes over time.
    fn coord_ts(&self, info: &VarInfo, ts: usize) -> Option<usize> {
        info.coord_vars
            .iter()
            .any(|c| self.collection.is_time_varying(c))
            .then_some(ts)
    }

    /// Materialize a variable and return a grid bound to its cached regions.
    ///
    /// Out-of-range levels and levels of detail are clamped. A locked grid
    /// must be returned through [`unlock_grid`](Self::unlock_grid).
    pub fn get_variable(&mut self, query: &VariableQuery) -> Result<Grid> {
        let info = self.var_info(&query.varname)?;
        let level = self.clamp_level(&info, query.level);
        let lod = info.clamp_lod(query.lod);
        if level != query.level || lod != query.lod {
            tracing::debug!(
                varname = %info.name,
                requested_level = query.level,
                requested_lod = query.lod,
                level,
                lod,
                "Clamped refinement level / level of detail"
            );
        }

        let (dims, bs) = self.collection.dim_lens_at_level(&info.name, level)?;
        let (bmin, bmax) = match &query.subset {
            Subset::All => full_block_range(&bs, &dims),
            Subset::Voxels { min, max } => {
                let (vmin, vmax) = query_box(&info.name, min, max, dims.len())?;
                if vmin.iter().zip(&dims).any(|(&v, &n)| v >= n) {
                    return Err(DataMgrError::invalid_extents(format!(
                        "{}: voxel box {vmin:?}..{vmax:?} outside dimensions {dims:?}",
                        info.name
                    )));
                }
                let vmax: Vec<usize> = vmax
                    .iter()
                    .zip(&dims)
                    .map(|(&v, &n)| v.min(n - 1))
                    .collect();
                (map_vox_to_blk(&bs, &vmin), map_vox_to_blk(&bs, &vmax))
            }
            Subset::Extents { min, max } => {
                let (min, max) = query_box(&info.name, min, max, dims.len())?;
                let index = self.block_extents_index(&info, query.ts, level, lod, &dims, &bs)?;
                index.intersect(&min, &max).ok_or_else(|| {
                    DataMgrError::invalid_extents(format!(
                        "{}: query box {min:?}..{max:?} does not intersect the grid",
                        info.name
                    ))
                })?
            }
        };

        let grid = self.build_grid(&info, query.ts, level, lod, &bmin, &bmax, query.lock, false)?;
        tracing::debug!(
            varname = %info.name,
            ts = query.ts,
            level,
            lod,
            grid_type = %grid.grid_type(),
            dims = ?grid.dims(),
            locked = query.lock,
            "Variable materialized"
        );
        Ok(grid)
    }

    /// Block extents index for a variable's coordinates, built on first use.
    fn block_extents_index(
        &mut self,
        info: &VarInfo,
        ts: usize,
        level: i32,
        lod: i32,
        dims: &[usize],
        bs: &[usize],
    ) -> Result<&BlockExtents> {
        let key = BlockExtentsKey {
            ts: self.coord_ts(info, ts),
            coord_vars: info.coord_vars.clone(),
            level,
            lod,
        };
        if !self.block_extents.contains_key(&key) {
            let (bmin, bmax) = full_block_range(bs, dims);
            let grid = self.build_grid(info, ts, level, lod, &bmin, &bmax, false, true)?;
            let extents = BlockExtents::build(&grid, bs, dims);
            self.block_extents.insert(key.clone(), extents);
        }
        self.block_extents.get(&key).ok_or_else(|| {
            DataMgrError::invalid_metadata("block extents index missing after build")
        })
    }

    /// Acquire the data and coordinate regions for the block range
    /// `[bmin, bmax]` and bind them into a grid.
    ///
    /// Every region is locked while the grid is assembled; on failure all of
    /// them are released again. Coordinate values a grid copies out are
    /// released immediately, and an unlocked request releases everything.
    #[allow(clippy::too_many_arguments)]
    fn build_grid(
        &mut self,
        info: &VarInfo,
        ts: usize,
        level: i32,
        lod: i32,
        bmin: &[usize],
        bmax: &[usize],
        lock: bool,
        dataless: bool,
    ) -> Result<Grid> {
        let (dims, bs) = self.collection.dim_lens_at_level(&info.name, level)?;
        let coord_infos = info
            .coord_vars
            .iter()
            .map(|c| {
                self.collection.var_info(c).ok_or_else(|| {
                    DataMgrError::missing_dependency(format!(
                        "{}: coordinate variable {c} not found",
                        info.name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut descs = Vec::with_capacity(coord_infos.len());
        let mut coord_dims = Vec::with_capacity(coord_infos.len());
        for c in &coord_infos {
            let (cdims, cbs) = self.collection.dim_lens_at_level(&c.name, level)?;
            descs.push(CoordVarDesc::new(&c.name, cdims.len(), c.is_uniform()));
            coord_dims.push((cdims, cbs));
        }
        let grid_type = classify(dims.len(), &descs)?;
        let (vmin, vmax) = map_blk_to_vox(&bs, &dims, bmin, bmax);

        let mut acquired: Vec<RegionKey> = Vec::new();
        let regions = self.acquire_regions(
            info,
            &coord_infos,
            &coord_dims,
            grid_type,
            ts,
            level,
            lod,
            (bmin, bmax),
            (vmin.as_slice(), vmax.as_slice()),
            &dims,
            dataless,
            &mut acquired,
        );
        let (data, coords) = match regions {
            Ok(regions) => regions,
            Err(e) => {
                self.release_all(&acquired);
                return Err(e);
            }
        };

        let core = GridCore::new(&info.name, ts, level, lod, vmin, &vmax, data, lock)
            .with_missing_value(info.missing_value)
            .with_periodic(info.periodic.clone());
        let grid = match self.factory.make_grid(grid_type, core, &coords) {
            Ok(grid) => grid,
            Err(e) => {
                self.release_all(&acquired);
                return Err(e);
            }
        };

        let held = grid.region_keys();
        for key in &acquired {
            if !lock || !held.contains(key) {
                self.cache.release(key);
            }
        }
        Ok(grid)
    }

    #[allow(clippy::too_many_arguments)]
    fn acquire_regions(
        &mut self,
        info: &VarInfo,
        coord_infos: &[VarInfo],
        coord_dims: &[(Vec<usize>, Vec<usize>)],
        grid_type: GridType,
        ts: usize,
        level: i32,
        lod: i32,
        (bmin, bmax): (&[usize], &[usize]),
        (vmin, vmax): (&[usize], &[usize]),
        dims: &[usize],
        dataless: bool,
        acquired: &mut Vec<RegionKey>,
    ) -> Result<(Option<RegionRef>, Vec<RegionRef>)> {
        let data = if dataless {
            None
        } else {
            let region = materialize(
                &mut self.cache,
                &mut self.collection,
                info,
                ts,
                level,
                lod,
                bmin,
                bmax,
                true,
            )?;
            acquired.push(region.key().clone());
            Some(region)
        };

        let mut coords = Vec::with_capacity(coord_infos.len());
        for (i, (cinfo, (cdims, cbs))) in coord_infos.iter().zip(coord_dims).enumerate() {
            let axes = coord_axes(grid_type, i);
            let matches = axes.len() == cdims.len()
                && axes.iter().zip(cdims).all(|(&a, &n)| dims.get(a) == Some(&n));
            if !matches {
                return Err(DataMgrError::invalid_metadata(format!(
                    "{}: coordinate {} has dimensions {cdims:?}, variable has {dims:?}",
                    info.name, cinfo.name
                )));
            }
            let cvmin: Vec<usize> = axes.iter().map(|&a| vmin[a]).collect();
            let cvmax: Vec<usize> = axes.iter().map(|&a| vmax[a]).collect();
            let region = materialize(
                &mut self.cache,
                &mut self.collection,
                cinfo,
                ts,
                level,
                cinfo.clamp_lod(lod),
                &map_vox_to_blk(cbs, &cvmin),
                &map_vox_to_blk(cbs, &cvmax),
                true,
            )?;
            acquired.push(region.key().clone());
            coords.push(region);
        }
        Ok((data, coords))
    }

    fn release_all(&mut self, keys: &[RegionKey]) {
        for key in keys {
            self.cache.release(key);
        }
    }

    /// Release the cache locks held by a grid.
    ///
    /// Returns the number of regions released.
    pub fn unlock_grid(&mut self, grid: Grid) -> usize {
        if !grid.is_locked() {
            return 0;
        }
        grid.region_keys()
            .iter()
            .filter(|key| self.cache.release(key))
            .count()
    }

    /// User-coordinate bounding box of a variable at a refinement level.
    pub fn get_variable_extents(
        &mut self,
        ts: usize,
        varname: &str,
        level: i32,
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        let info = self.var_info(varname)?;
        let level = self.clamp_level(&info, level);
        let key = (self.coord_ts(&info, ts), info.coord_vars.clone(), level);
        if let Some(extents) = self.extents_cache.get(&key) {
            return Ok(extents.clone());
        }

        let (dims, bs) = self.collection.dim_lens_at_level(varname, level)?;
        let (bmin, bmax) = full_block_range(&bs, &dims);
        let lod = info.clamp_lod(-1);
        let grid = self.build_grid(&info, ts, level, lod, &bmin, &bmax, false, true)?;
        let extents = grid.user_extents();
        self.extents_cache.insert(key, extents.clone());
        Ok(extents)
    }

    /// Minimum and maximum of a variable, skipping missing values.
    ///
    /// A variable with no valid samples reports `(0.0, 0.0)`.
    pub fn get_data_range(
        &mut self,
        ts: usize,
        varname: &str,
        level: i32,
        lod: i32,
    ) -> Result<(f32, f32)> {
        let info = self.var_info(varname)?;
        let level = self.clamp_level(&info, level);
        let lod = info.clamp_lod(lod);
        let ts = if info.time_varying { ts } else { 0 };
        let key = (ts, info.name.clone(), level, lod);
        if let Some(&range) = self.range_cache.get(&key) {
            return Ok(range);
        }

        let query = VariableQuery::new(ts, varname).at_level(level).at_lod(lod);
        let grid = self.get_variable(&query)?;
        let range = grid.range().unwrap_or((0.0, 0.0));
        self.range_cache.insert(key, range);
        Ok(range)
    }

    /// Whether a variable and, recursively, all of its coordinate
    /// variables are available. Never fails.
    pub fn variable_exists(&mut self, ts: usize, varname: &str, level: i32, lod: i32) -> bool {
        let mut visiting = Vec::new();
        self.check_dependencies(ts, varname, level, lod, &mut visiting)
    }

    fn check_dependencies(
        &mut self,
        ts: usize,
        varname: &str,
        level: i32,
        lod: i32,
        visiting: &mut Vec<String>,
    ) -> bool {
        let Some(info) = self.collection.var_info(varname) else {
            return false;
        };
        let level = self.clamp_level(&info, level);
        let lod = info.clamp_lod(lod);
        let ts = if info.time_varying { ts } else { 0 };
        let key = (ts, info.name.clone(), level, lod);
        if self.exists.contains(&key) {
            return true;
        }
        if !self.collection.variable_exists(ts, varname, level, lod) {
            return false;
        }

        visiting.push(info.name.clone());
        let ok = info
            .coord_vars
            .iter()
            .all(|c| visiting.contains(c) || self.check_dependencies(ts, c, level, lod, visiting));
        visiting.pop();

        if ok {
            self.exists.insert(key);
        }
        ok
    }

    /// Flush every cached region, block extents index, search tree and
    /// cached extents or data range.
    pub fn clear(&mut self) {
        let stats = self.cache.stats();
        self.cache.clear();
        self.block_extents.clear();
        self.factory.clear();
        self.extents_cache.clear();
        self.range_cache.clear();
        tracing::info!(
            regions = stats.entries,
            locked = stats.locked_entries,
            "Data manager caches cleared"
        );
    }

    /// Drop every cached region and data range of a variable.
    ///
    /// Returns the number of regions dropped.
    pub fn free_var(&mut self, varname: &str) -> usize {
        self.range_cache.retain(|(_, name, _, _), _| name != varname);
        self.cache.free_var(varname)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Number of cached block extents indices.
    pub fn num_block_extents(&self) -> usize {
        self.block_extents.len()
    }

    /// Number of cached curvilinear search trees.
    pub fn num_search_trees(&self) -> usize {
        self.factory.num_trees()
    }

    pub fn num_ref_levels(&self, varname: &str) -> usize {
        self.collection.num_ref_levels(varname)
    }

    pub fn cratios(&self, varname: &str) -> Vec<usize> {
        self.collection.cratios(varname)
    }

    pub fn is_time_varying(&self, varname: &str) -> bool {
        self.collection.is_time_varying(varname)
    }

    pub fn coord_vars(&self, varname: &str) -> Option<Vec<String>> {
        self.collection.coord_vars(varname)
    }

    pub fn dim_lens_at_level(&self, varname: &str, level: i32) -> Result<(Vec<usize>, Vec<usize>)> {
        let info = self.var_info(varname)?;
        self.collection.dim_lens_at_level(varname, self.clamp_level(&info, level))
    }
}

fn full_block_range(bs: &[usize], dims: &[usize]) -> (Vec<usize>, Vec<usize>) {
    let bmin = vec![0; dims.len()];
    let bmax = num_blocks(bs, dims).iter().map(|n| n.saturating_sub(1)).collect();
    (bmin, bmax)
}

/// Check a query box against the variable's dimensionality; extra
/// dimensions are dropped.
fn query_box<T: PartialOrd + Copy + Debug>(
    varname: &str,
    min: &[T],
    max: &[T],
    ndims: usize,
) -> Result<(Vec<T>, Vec<T>)> {
    if min.len() != max.len() || min.len() < ndims {
        return Err(DataMgrError::invalid_extents(format!(
            "{varname}: query box {min:?}..{max:?} does not match {ndims} dimensions"
        )));
    }
    let (min, max) = (&min[..ndims], &max[..ndims]);
    if min
        .iter()
        .zip(max)
        .any(|(lo, hi)| !matches!(lo.partial_cmp(hi), Some(o) if o.is_le()))
    {
        return Err(DataMgrError::invalid_extents(format!(
            "{varname}: query box {min:?}..{max:?} is inverted"
        )));
    }
    Ok((min.to_vec(), max.to_vec()))
}
