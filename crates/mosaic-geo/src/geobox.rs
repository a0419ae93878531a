//! Georeferenced pixel grids.

use serde::{Deserialize, Serialize};

use crate::error::{GeoError, GeoResult};
use crate::window::{snap_ceil, snap_floor};
use crate::{BoundingBox, Crs, Geometry, Roi};

/// Pixel size in CRS units. `y` is negative for north-up grids.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub x: f64,
    pub y: f64,
}

impl Resolution {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Square north-up pixels of size `r`.
    pub fn square(r: f64) -> Self {
        Self {
            x: r.abs(),
            y: -r.abs(),
        }
    }

    /// Ground sample distance: the finer of the two axes.
    pub fn gsd(&self) -> f64 {
        self.x.abs().min(self.y.abs())
    }
}

/// An axis-aligned affine transform from pixel (col, row) to world (x, y).
///
/// `x = sx * col + tx`, `y = sy * row + ty`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine {
    pub sx: f64,
    pub tx: f64,
    pub sy: f64,
    pub ty: f64,
}

impl Affine {
    pub fn new(sx: f64, tx: f64, sy: f64, ty: f64) -> Self {
        Self { sx, tx, sy, ty }
    }

    /// Build from the six coefficients `[a, b, c, d, e, f]` where
    /// `x = a*col + b*row + c` and `y = d*col + e*row + f`.
    ///
    /// Rotated or sheared transforms are rejected.
    pub fn from_coefficients(c: [f64; 6]) -> GeoResult<Self> {
        if c[1] != 0.0 || c[3] != 0.0 {
            return Err(GeoError::InvalidAffine(format!(
                "rotation terms must be zero, got b={} d={}",
                c[1], c[3]
            )));
        }
        if c[0] == 0.0 || c[4] == 0.0 {
            return Err(GeoError::InvalidAffine("zero pixel size".to_string()));
        }
        Ok(Self::new(c[0], c[2], c[4], c[5]))
    }

    pub fn coefficients(&self) -> [f64; 6] {
        [self.sx, 0.0, self.tx, 0.0, self.sy, self.ty]
    }
}

/// A CRS, a raster shape and an affine transform: one aligned pixel grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoBox {
    pub width: usize,
    pub height: usize,
    pub affine: Affine,
    pub crs: Crs,
}

impl GeoBox {
    pub fn new(width: usize, height: usize, affine: Affine, crs: Crs) -> Self {
        Self {
            width,
            height,
            affine,
            crs,
        }
    }

    /// Grid covering `bbox` at `resolution`, with edges snapped to whole
    /// multiples of the pixel size.
    pub fn from_bbox(bbox: &BoundingBox, crs: Crs, resolution: Resolution) -> GeoResult<Self> {
        let rx = resolution.x.abs();
        let ry = resolution.y.abs();
        if !(rx > 0.0 && ry > 0.0) {
            return Err(GeoError::InvalidGrid(format!(
                "resolution must be non-zero, got {:?}",
                resolution
            )));
        }

        let x0 = snap_floor(bbox.min_x / rx) * rx;
        let x1 = snap_ceil(bbox.max_x / rx) * rx;
        let y0 = snap_floor(bbox.min_y / ry) * ry;
        let y1 = snap_ceil(bbox.max_y / ry) * ry;

        let width = ((x1 - x0) / rx).round().max(1.0) as usize;
        let height = ((y1 - y0) / ry).round().max(1.0) as usize;

        let affine = if resolution.y < 0.0 {
            Affine::new(rx, x0, -ry, y1)
        } else {
            Affine::new(rx, x0, ry, y0)
        };

        Ok(Self::new(width, height, affine, crs))
    }

    /// `(height, width)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.affine.sx, self.affine.sy)
    }

    /// World coordinates of a fractional pixel position.
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.affine.sx * col + self.affine.tx,
            self.affine.sy * row + self.affine.ty,
        )
    }

    /// Fractional pixel position `(col, row)` of a world coordinate.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.affine.tx) / self.affine.sx,
            (y - self.affine.ty) / self.affine.sy,
        )
    }

    /// World coordinates of pixel centres along x.
    pub fn x_coords(&self) -> Vec<f64> {
        (0..self.width)
            .map(|c| self.pixel_to_world(c as f64 + 0.5, 0.0).0)
            .collect()
    }

    /// World coordinates of pixel centres along y.
    pub fn y_coords(&self) -> Vec<f64> {
        (0..self.height)
            .map(|r| self.pixel_to_world(0.0, r as f64 + 0.5).1)
            .collect()
    }

    pub fn extent(&self) -> BoundingBox {
        let (x0, y0) = self.pixel_to_world(0.0, 0.0);
        let (x1, y1) = self.pixel_to_world(self.width as f64, self.height as f64);
        BoundingBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// Extent as a polygon in this grid's CRS.
    pub fn footprint(&self) -> Geometry {
        Geometry::from_bbox(&self.extent(), self.crs)
    }

    /// Sub-grid covering `roi`.
    pub fn slice(&self, roi: &Roi) -> GeoBox {
        let (tx, ty) = self.pixel_to_world(roi.col_start as f64, roi.row_start as f64);
        GeoBox::new(
            roi.width(),
            roi.height(),
            Affine::new(self.affine.sx, tx, self.affine.sy, ty),
            self.crs,
        )
    }

    /// Same extent with pixels `factor` times larger, as an overview level.
    pub fn zoom_out(&self, factor: f64) -> GeoBox {
        let width = (self.width as f64 / factor).ceil().max(1.0) as usize;
        let height = (self.height as f64 / factor).ceil().max(1.0) as usize;
        GeoBox::new(
            width,
            height,
            Affine::new(
                self.affine.sx * factor,
                self.affine.tx,
                self.affine.sy * factor,
                self.affine.ty,
            ),
            self.crs,
        )
    }

    /// Pixel window of `bbox` (in this grid's CRS), clipped to the grid.
    pub fn bbox_to_roi(&self, bbox: &BoundingBox) -> Roi {
        let pixels = bbox
            .corners()
            .map(|(x, y)| self.world_to_pixel(x, y));
        let col_min = pixels.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
        let col_max = pixels.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
        let row_min = pixels.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let row_max = pixels.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
        Roi::from_pixel_bounds(row_min, row_max, col_min, col_max, self.shape())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> GeoBox {
        GeoBox::new(4, 2, Affine::new(10.0, 100.0, -10.0, 50.0), Crs::from_epsg(32633))
    }

    #[test]
    fn test_extent_and_coords() {
        let gbox = grid();
        assert_eq!(gbox.extent(), BoundingBox::new(100.0, 30.0, 140.0, 50.0));
        assert_eq!(gbox.x_coords(), vec![105.0, 115.0, 125.0, 135.0]);
        assert_eq!(gbox.y_coords(), vec![45.0, 35.0]);
    }

    #[test]
    fn test_from_bbox_snaps_outward() {
        let bbox = BoundingBox::new(101.0, 31.0, 139.0, 49.5);
        let gbox = GeoBox::from_bbox(&bbox, Crs::from_epsg(32633), Resolution::square(10.0)).unwrap();
        assert_eq!(gbox.shape(), (2, 4));
        assert_eq!(gbox.affine, Affine::new(10.0, 100.0, -10.0, 50.0));
    }

    #[test]
    fn test_slice_and_zoom() {
        let gbox = grid();
        let sub = gbox.slice(&Roi::new(1, 2, 2, 4));
        assert_eq!(sub.shape(), (1, 2));
        assert_eq!(sub.extent(), BoundingBox::new(120.0, 30.0, 140.0, 40.0));

        let ovr = gbox.zoom_out(2.0);
        assert_eq!(ovr.shape(), (1, 2));
        assert_eq!(ovr.extent(), gbox.extent());
    }

    #[test]
    fn test_bbox_to_roi() {
        let gbox = grid();
        let roi = gbox.bbox_to_roi(&BoundingBox::new(115.0, 0.0, 125.0, 40.0));
        assert_eq!(roi, Roi::new(1, 2, 1, 3));
    }

    #[test]
    fn test_rotated_affine_rejected() {
        assert!(Affine::from_coefficients([1.0, 0.5, 0.0, 0.0, -1.0, 0.0]).is_err());
        let a = Affine::from_coefficients([2.0, 0.0, 5.0, 0.0, -2.0, 9.0]).unwrap();
        assert_eq!(a.coefficients(), [2.0, 0.0, 5.0, 0.0, -2.0, 9.0]);
    }
}
