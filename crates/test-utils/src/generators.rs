//! Synthetic raster generators with predictable values.

use ndarray::Array2;

/// Creates a test grid with predictable values.
///
/// Each cell value is calculated as: `col * 1000 + row`
///
/// This makes it easy to check where a fused pixel came from: grid[row][col]
/// == col * 1000 + row. Add an offset per source to tell sources apart.
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.dim(), (5, 10));
/// assert_eq!(grid[[0, 1]], 1000.0); // col=1, row=0
/// assert_eq!(grid[[1, 0]], 1.0);    // col=0, row=1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Array2<f64> {
    Array2::from_shape_fn((height, width), |(row, col)| (col * 1000 + row) as f64)
}

/// Creates a grid where every cell holds `value`.
pub fn create_constant_grid(width: usize, height: usize, value: f64) -> Array2<f64> {
    Array2::from_elem((height, width), value)
}

/// Creates a grid of `value` whose left half (`col < width / 2`) is `nodata`.
pub fn create_half_nodata_grid(width: usize, height: usize, value: f64, nodata: f64) -> Array2<f64> {
    Array2::from_shape_fn((height, width), |(_, col)| {
        if col < width / 2 {
            nodata
        } else {
            value
        }
    })
}

/// Creates a gradient grid spanning `[min, max]` from the top-left corner to
/// the bottom-right one.
pub fn create_gradient_grid(width: usize, height: usize, min: f64, max: f64) -> Array2<f64> {
    let denom = ((width - 1) + (height - 1)).max(1) as f64;
    Array2::from_shape_fn((height, width), |(row, col)| {
        min + (max - min) * (row + col) as f64 / denom
    })
}
