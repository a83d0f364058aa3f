//! Test data generators for creating synthetic gridded variables.
//!
//! These generators create predictable, verifiable test data patterns
//! that can be used across the test suite. All multi-dimensional arrays
//! are returned with the first axis varying fastest.

/// Creates an evenly spaced coordinate axis.
///
/// # Example
///
/// ```
/// use test_utils::create_uniform_coords;
///
/// assert_eq!(create_uniform_coords(4, 10.0, 0.5), vec![10.0, 10.5, 11.0, 11.5]);
/// ```
pub fn create_uniform_coords(n: usize, start: f32, step: f32) -> Vec<f32> {
    (0..n).map(|i| start + i as f32 * step).collect()
}

/// Creates a test volume with predictable values.
///
/// Each sample is `x * 1000 + y + z * 1_000_000`, so the voxel a value came
/// from can be read back from the value itself. Missing trailing axes are
/// treated as zero.
///
/// # Example
///
/// ```
/// use test_utils::create_test_volume;
///
/// let grid = create_test_volume(&[10, 5]);
/// assert_eq!(grid.len(), 50);
/// assert_eq!(grid[0], 0.0);    // x=0, y=0
/// assert_eq!(grid[1], 1000.0); // x=1, y=0
/// assert_eq!(grid[10], 1.0);   // x=0, y=1
/// ```
pub fn create_test_volume(dims: &[usize]) -> Vec<f32> {
    let nx = dims.first().copied().unwrap_or(1);
    let ny = dims.get(1).copied().unwrap_or(1);
    let nz = dims.get(2).copied().unwrap_or(1);
    let mut data = Vec::with_capacity(nx * ny * nz);
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                data.push((x * 1000 + y + z * 1_000_000) as f32);
            }
        }
    }
    data
}

/// Value [`create_test_volume`] stores at a voxel.
pub fn test_volume_value(coord: &[usize]) -> f32 {
    let x = coord.first().copied().unwrap_or(0);
    let y = coord.get(1).copied().unwrap_or(0);
    let z = coord.get(2).copied().unwrap_or(0);
    (x * 1000 + y + z * 1_000_000) as f32
}

/// Creates a grid filled with a constant value.
pub fn create_constant_grid(dims: &[usize], value: f32) -> Vec<f32> {
    vec![value; dims.iter().product()]
}

/// Creates a grid of zeros with `missing` at the given voxels.
///
/// Useful for testing missing data handling.
pub fn create_grid_with_missing(
    dims: &[usize],
    positions: &[Vec<usize>],
    missing: f32,
) -> Vec<f32> {
    let mut data = vec![0.0f32; dims.iter().product()];
    for pos in positions {
        if pos.len() != dims.len() || pos.iter().zip(dims).any(|(p, d)| p >= d) {
            continue;
        }
        let mut offset = 0;
        let mut stride = 1;
        for (p, d) in pos.iter().zip(dims) {
            offset += p * stride;
            stride *= d;
        }
        data[offset] = missing;
    }
    data
}

/// Creates a terrain-following height field for a layered grid.
///
/// The ground rises by 10 per horizontal step in both directions from
/// `base`, and layer `k` sits `k * dz` above the ground.
pub fn create_terrain_heights(nx: usize, ny: usize, nz: usize, base: f32, dz: f32) -> Vec<f32> {
    let mut data = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let ground = base + 10.0 * (i + j) as f32;
                data.push(ground + k as f32 * dz);
            }
        }
    }
    data
}

/// Creates the 2-D coordinate fields of a curvilinear grid: a unit-spaced
/// `nx` x `ny` lattice rotated by `angle_deg` around the origin.
///
/// Returns `(x, y)`.
pub fn create_rotated_coords(nx: usize, ny: usize, angle_deg: f64) -> (Vec<f32>, Vec<f32>) {
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    let mut x = Vec::with_capacity(nx * ny);
    let mut y = Vec::with_capacity(nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            let (fi, fj) = (i as f64, j as f64);
            x.push((fi * cos - fj * sin) as f32);
            y.push((fi * sin + fj * cos) as f32);
        }
    }
    (x, y)
}
