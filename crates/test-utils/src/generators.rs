//! Test data generators for creating synthetic gridded data.
//!
//! These generators create predictable, verifiable test data patterns
//! that can be used across the test suite.

/// Creates row-major values that encode their own position.
///
/// Each value is its multi-index read as base-100 digits, so `[2, 3, 4]`
/// holds `20304`. Axes must be shorter than 100.
///
/// # Example
///
/// ```
/// use test_utils::create_coded_grid;
///
/// let grid = create_coded_grid(&[2, 3, 4]);
/// assert_eq!(grid.len(), 24);
/// assert_eq!(grid[0], 0.0);
/// assert_eq!(grid[1], 1.0);      // [0, 0, 1]
/// assert_eq!(grid[4], 100.0);    // [0, 1, 0]
/// assert_eq!(grid[12], 10000.0); // [1, 0, 0]
/// ```
pub fn create_coded_grid(shape: &[usize]) -> Vec<f32> {
    create_grid_with(shape, |idx| {
        idx.iter().fold(0.0, |acc, &i| acc * 100.0 + i as f32)
    })
}

/// Creates row-major values from a function of the multi-index.
pub fn create_grid_with(shape: &[usize], f: impl Fn(&[usize]) -> f32) -> Vec<f32> {
    let total: usize = shape.iter().product();
    let mut data = Vec::with_capacity(total);
    let mut idx = vec![0usize; shape.len()];
    for _ in 0..total {
        data.push(f(&idx));
        for d in (0..shape.len()).rev() {
            idx[d] += 1;
            if idx[d] < shape[d] {
                break;
            }
            idx[d] = 0;
        }
    }
    data
}

/// Evenly spaced coordinates: `start, start + step, ...` (`n` values).
pub fn regular_axis(start: f64, step: f64, n: usize) -> Vec<f64> {
    (0..n).map(|i| start + step * i as f64).collect()
}

/// Creates a temperature-like field in Kelvin on a time × lat × lon grid.
///
/// Warmer at the equator, with a small linear trend over time.
pub fn create_temperature_field(lats: &[f64], lons: &[f64], times: usize) -> Vec<f32> {
    create_grid_with(&[times, lats.len(), lons.len()], |idx| {
        let lat = lats[idx[1]];
        let lon = lons[idx[2]];
        let base = 300.0 - 0.5 * lat.abs();
        let wave = 2.0 * (lon.to_radians()).sin();
        (base + wave + 0.1 * idx[0] as f64) as f32
    })
}
