//! Pixel windows.

use serde::{Deserialize, Serialize};

/// A half-open pixel window `[row_start, row_end) x [col_start, col_end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Roi {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

impl Roi {
    pub fn new(row_start: usize, row_end: usize, col_start: usize, col_end: usize) -> Self {
        Self {
            row_start,
            row_end: row_end.max(row_start),
            col_start,
            col_end: col_end.max(col_start),
        }
    }

    /// Window covering a whole `(height, width)` raster.
    pub fn full(shape: (usize, usize)) -> Self {
        Self::new(0, shape.0, 0, shape.1)
    }

    /// The zero-extent window.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn height(&self) -> usize {
        self.row_end - self.row_start
    }

    pub fn width(&self) -> usize {
        self.col_end - self.col_start
    }

    /// `(height, width)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    pub fn is_empty(&self) -> bool {
        self.height() == 0 || self.width() == 0
    }

    /// Overlap of two windows, empty when disjoint.
    pub fn intersect(&self, other: &Roi) -> Roi {
        let r0 = self.row_start.max(other.row_start);
        let r1 = self.row_end.min(other.row_end);
        let c0 = self.col_start.max(other.col_start);
        let c1 = self.col_end.min(other.col_end);
        if r0 >= r1 || c0 >= c1 {
            return Roi::empty();
        }
        Roi::new(r0, r1, c0, c1)
    }

    /// Build a window from fractional pixel bounds, clipped to `shape`.
    ///
    /// Bounds within `1e-6` of an integer snap to it before rounding outward.
    pub fn from_pixel_bounds(
        row_min: f64,
        row_max: f64,
        col_min: f64,
        col_max: f64,
        shape: (usize, usize),
    ) -> Roi {
        let clip = |v: f64, limit: usize| -> usize { v.max(0.0).min(limit as f64) as usize };
        let r0 = clip(snap_floor(row_min), shape.0);
        let r1 = clip(snap_ceil(row_max), shape.0);
        let c0 = clip(snap_floor(col_min), shape.1);
        let c1 = clip(snap_ceil(col_max), shape.1);
        if r0 >= r1 || c0 >= c1 {
            return Roi::empty();
        }
        Roi::new(r0, r1, c0, c1)
    }
}

const SNAP_EPS: f64 = 1e-6;

pub(crate) fn snap_floor(v: f64) -> f64 {
    if (v - v.round()).abs() < SNAP_EPS {
        v.round()
    } else {
        v.floor()
    }
}

pub(crate) fn snap_ceil(v: f64) -> f64 {
    if (v - v.round()).abs() < SNAP_EPS {
        v.round()
    } else {
        v.ceil()
    }
}
