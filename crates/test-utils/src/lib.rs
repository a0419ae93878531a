//! Shared test utilities for the stac-mosaic workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Synthetic raster generators
//! - Catalog fixtures backed by an in-memory raster store
//! - NaN-aware approximate-equality assertions
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your integration tests:
//!
//! ```ignore
//! use test_utils::{create_test_grid, MosaicFixture};
//! ```

pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;

/// Asserts two numbers are within `epsilon` of each other.
///
/// Both sides are compared as `f64`. NaN only equals NaN, which is what
/// nodata-filled pixels need.
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f32, 1.0, 0.001);
/// assert_approx_eq!(f64::NAN, f64::NAN, 0.0);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let (left, right, epsilon) = ($left as f64, $right as f64, $epsilon as f64);
        let both_nan = left.is_nan() && right.is_nan();
        if !both_nan && !((left - right).abs() <= epsilon) {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  epsilon: `{:?}`",
                left, right, epsilon
            );
        }
    }};
}

/// Asserts two pixel sequences match element-wise within `epsilon`.
///
/// Accepts anything iterable over `f64` (ndarray arrays via `.iter().copied()`,
/// vectors, slices). Reports the first differing index.
///
/// ```ignore
/// use test_utils::assert_pixels_eq;
///
/// assert_pixels_eq!(a.iter().copied(), b.iter().copied(), 1e-9);
/// ```
#[macro_export]
macro_rules! assert_pixels_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: Vec<f64> = $left.into_iter().collect();
        let right: Vec<f64> = $right.into_iter().collect();
        assert_eq!(left.len(), right.len(), "pixel counts differ");
        for (idx, (l, r)) in left.iter().zip(&right).enumerate() {
            let same = (l.is_nan() && r.is_nan()) || (l - r).abs() <= $epsilon as f64;
            if !same {
                panic!("assertion failed: pixel {} differs: {:?} vs {:?}", idx, l, r);
            }
        }
    }};
}
