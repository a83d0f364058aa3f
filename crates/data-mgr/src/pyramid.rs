//! Decimation pyramid: builds coarser refinement levels on demand.
//!
//! Level `L` is produced from level `L + 1` (one step finer) with a box
//! filter that averages 2, 4 or 8 samples for 1-D, 2-D and 3-D data. Each
//! axis contributes a weight of 0.5 for paired samples and 1.0 for the
//! unpaired trailing sample of an odd-length axis; a sample's weight is the
//! product over its axes, so the weights of every destination cell sum to 1.
//!
//! ```text
//! get region (level L)
//!      │
//!      ├─► cache hit ──────────────────────────► done
//!      │
//!      ├─► level stored by the collection ────► read blocks
//!      │
//!      └─► get region (level L + 1), locked ──► decimate ──► release source
//! ```

use crate::cache::{RegionCache, RegionRef};
use crate::collection::DataCollection;
use crate::error::{DataMgrError, Result};
use crate::index::{box_dims, extract_box, map_blk_to_vox, map_vox_to_blk};
use crate::types::{RegionKey, VarInfo};

/// Length of an axis after one decimation step.
pub fn decimate_length(n: usize) -> usize {
    n.div_ceil(2)
}

/// Dimensions after `steps` decimation steps.
pub fn decimate_dims(dims: &[usize], steps: usize) -> Vec<usize> {
    let mut out = dims.to_vec();
    for _ in 0..steps {
        for d in &mut out {
            *d = decimate_length(*d);
        }
    }
    out
}

#[inline]
fn is_missing(v: f32, missing: Option<f32>) -> bool {
    v.is_nan() || missing == Some(v)
}

/// Decimate a contiguous 1-D, 2-D or 3-D array by a factor of two per axis.
///
/// Samples equal to `missing` (or NaN) are skipped and the remaining
/// weights renormalised. A destination cell without valid samples is set
/// to `missing` (NaN when there is no sentinel).
pub fn decimate(
    src: &[f32],
    src_dims: &[usize],
    dst: &mut [f32],
    dst_dims: &[usize],
    missing: Option<f32>,
) -> Result<()> {
    let ndims = src_dims.len();
    if !(1..=3).contains(&ndims) || dst_dims.len() != ndims {
        return Err(DataMgrError::invalid_metadata(format!(
            "cannot decimate {src_dims:?} into {dst_dims:?}"
        )));
    }
    if src_dims
        .iter()
        .zip(dst_dims)
        .any(|(&s, &d)| decimate_length(s) != d)
    {
        return Err(DataMgrError::invalid_metadata(format!(
            "decimation of {src_dims:?} does not yield {dst_dims:?}"
        )));
    }
    if src.len() != src_dims.iter().product::<usize>()
        || dst.len() != dst_dims.iter().product::<usize>()
    {
        return Err(DataMgrError::invalid_metadata(
            "decimation buffers do not match their dimensions",
        ));
    }

    let mut weights = vec![0.0f32; dst.len()];
    dst.fill(0.0);

    let mut coord = vec![0usize; ndims];
    for &v in src {
        if !is_missing(v, missing) {
            let mut w = 1.0f32;
            let mut offset = 0;
            let mut stride = 1;
            for a in 0..ndims {
                let n = src_dims[a];
                w *= if n % 2 == 1 && coord[a] == n - 1 { 1.0 } else { 0.5 };
                offset += (coord[a] / 2) * stride;
                stride *= dst_dims[a];
            }
            dst[offset] += w * v;
            weights[offset] += w;
        }

        // Advance the source coordinate, first axis fastest
        for a in 0..ndims {
            coord[a] += 1;
            if coord[a] < src_dims[a] {
                break;
            }
            coord[a] = 0;
        }
    }

    let fill = missing.unwrap_or(f32::NAN);
    for (value, &w) in dst.iter_mut().zip(&weights) {
        *value = if w > 0.0 { *value / w } else { fill };
    }
    Ok(())
}

/// Bring the block range `[bmin, bmax]` of a variable at `level` into the
/// cache and return it, building it by decimation when the collection
/// does not store that level.
///
/// Recursion moves one level finer per step and stops at the first level
/// that is cached or stored, so its depth never exceeds the number of
/// refinement levels declared for the variable.
#[allow(clippy::too_many_arguments)]
pub(crate) fn materialize<C: DataCollection + ?Sized>(
    cache: &mut RegionCache,
    collection: &mut C,
    info: &VarInfo,
    ts: usize,
    level: i32,
    lod: i32,
    bmin: &[usize],
    bmax: &[usize],
    lock: bool,
) -> Result<RegionRef> {
    let varname = info.name.as_str();
    let coarsest = info.coarsest_level();
    if level > 0 || level < coarsest {
        return Err(DataMgrError::invalid_metadata(format!(
            "{varname}: level {level} outside [{coarsest}, 0]"
        )));
    }

    let ts = if info.time_varying { ts } else { 0 };
    let (dims, bs) = collection.dim_lens_at_level(varname, level)?;
    if bmin.len() != dims.len() || bmax.len() != dims.len() || bs.len() != dims.len() {
        return Err(DataMgrError::invalid_metadata(format!(
            "{varname}: block range {bmin:?}..{bmax:?} does not match dimensions {dims:?}"
        )));
    }
    let (vmin, vmax) = map_blk_to_vox(&bs, &dims, bmin, bmax);
    let len: usize = box_dims(&vmin, &vmax).iter().product();

    let key = RegionKey::new(ts, varname, level, lod, bmin.to_vec(), bmax.to_vec());
    if let Some(data) = cache.acquire(&key, lock) {
        return Ok(RegionRef::new(key, data, vmin, vmax));
    }

    let data = if level == 0 || collection.level_is_stored(varname, level) {
        let fd = collection
            .open_variable_read(ts, varname, level, lod)
            .map_err(|e| DataMgrError::read_failure(e.to_string()))?;
        let filled = cache.fill(key.clone(), len, lock, |buf| {
            collection.read_region_block(fd, bmin, bmax, buf)
        });
        let closed = collection.close_variable(fd);
        let data = filled?;
        closed?;
        data
    } else {
        let finer = level + 1;
        let (fdims, fbs) = collection.dim_lens_at_level(varname, finer)?;
        if decimate_dims(&fdims, 1) != dims {
            return Err(DataMgrError::invalid_metadata(format!(
                "{varname}: dimensions {dims:?} at level {level} are not a decimation of {fdims:?}"
            )));
        }

        let svmin: Vec<usize> = vmin.iter().map(|&v| 2 * v).collect();
        let svmax: Vec<usize> = vmax
            .iter()
            .zip(&fdims)
            .map(|(&v, &d)| (2 * v + 1).min(d - 1))
            .collect();
        let sbmin = map_vox_to_blk(&fbs, &svmin);
        let sbmax = map_vox_to_blk(&fbs, &svmax);

        tracing::debug!(
            varname,
            level,
            lod,
            bmin = ?bmin,
            bmax = ?bmax,
            "Decimating from level {}",
            finer
        );

        let source = materialize(cache, collection, info, ts, finer, lod, &sbmin, &sbmax, true)?;

        let missing = info.missing_value.map(|m| m as f32);
        let dst_dims = box_dims(&vmin, &vmax);
        let filled = cache.fill(key.clone(), len, lock, |buf| {
            let src = extract_box(source.data(), source.vmin(), source.vmax(), &svmin, &svmax);
            decimate(&src, &box_dims(&svmin, &svmax), buf, &dst_dims, missing)
        });
        cache.release(source.key());
        filled?
    };

    Ok(RegionRef::new(key, data, vmin, vmax))
}
