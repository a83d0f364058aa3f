//! Voxel and block index arithmetic.
//!
//! All multi-dimensional arrays are stored with the first axis varying
//! fastest. Voxel and block boxes are inclusive on both ends.

/// Map voxel coordinates to the coordinates of the block containing them.
pub fn map_vox_to_blk(bs: &[usize], vcoord: &[usize]) -> Vec<usize> {
    vcoord
        .iter()
        .zip(bs)
        .map(|(&v, &b)| v / b.max(1))
        .collect()
}

/// Map a block range to the voxel box it covers, clamped to `dims`.
pub fn map_blk_to_vox(
    bs: &[usize],
    dims: &[usize],
    bmin: &[usize],
    bmax: &[usize],
) -> (Vec<usize>, Vec<usize>) {
    let mut vmin = Vec::with_capacity(bs.len());
    let mut vmax = Vec::with_capacity(bs.len());
    for i in 0..bs.len() {
        let last = dims[i].saturating_sub(1);
        vmin.push((bmin[i] * bs[i]).min(last));
        vmax.push((bmax[i] * bs[i] + bs[i] - 1).min(last));
    }
    (vmin, vmax)
}

/// Number of blocks along each axis.
pub fn num_blocks(bs: &[usize], dims: &[usize]) -> Vec<usize> {
    dims.iter()
        .zip(bs)
        .map(|(&d, &b)| d.div_ceil(b.max(1)))
        .collect()
}

/// Extent of an inclusive box along each axis.
pub fn box_dims(min: &[usize], max: &[usize]) -> Vec<usize> {
    min.iter().zip(max).map(|(&lo, &hi)| hi - lo + 1).collect()
}

/// Offset of `coord` within the inclusive box `[min, max]`.
pub fn linearize_coords(coord: &[usize], min: &[usize], max: &[usize]) -> usize {
    let mut offset = 0;
    let mut stride = 1;
    for i in 0..coord.len() {
        offset += (coord[i] - min[i]) * stride;
        stride *= max[i] - min[i] + 1;
    }
    offset
}

/// Inverse of [`linearize_coords`].
pub fn vectorize_coords(mut offset: usize, min: &[usize], max: &[usize]) -> Vec<usize> {
    let mut coord = Vec::with_capacity(min.len());
    for i in 0..min.len() {
        let n = max[i] - min[i] + 1;
        coord.push(min[i] + offset % n);
        offset /= n;
    }
    coord
}

/// Copy the sub-box `[sub_min, sub_max]` out of a contiguous array that
/// covers `[src_min, src_max]`.
pub fn extract_box(
    src: &[f32],
    src_min: &[usize],
    src_max: &[usize],
    sub_min: &[usize],
    sub_max: &[usize],
) -> Vec<f32> {
    let sub_dims = box_dims(sub_min, sub_max);
    let n: usize = sub_dims.iter().product();
    let mut out = Vec::with_capacity(n);
    for offset in 0..n {
        let coord = vectorize_coords(offset, sub_min, sub_max);
        out.push(src[linearize_coords(&coord, src_min, src_max)]);
    }
    out
}
