//! Partitioning of a grid into fixed-size cells.
//!
//! Cells are addressed `(row, col)` from the top-left. Every cell has the
//! nominal tile shape except those on the bottom/right edge, which are
//! clipped to the grid.

use serde::{Deserialize, Serialize};

use crate::error::{GeoError, GeoResult};
use crate::{BoundingBox, GeoBox, Roi};

/// A grid partitioned into cells of `tile_shape` pixels `(rows, cols)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoboxTiles {
    geobox: GeoBox,
    tile_shape: (usize, usize),
}

impl GeoboxTiles {
    pub fn new(geobox: GeoBox, tile_shape: (usize, usize)) -> GeoResult<Self> {
        if tile_shape.0 == 0 || tile_shape.1 == 0 {
            return Err(GeoError::InvalidGrid(format!(
                "tile shape must be non-zero, got {:?}",
                tile_shape
            )));
        }
        Ok(Self { geobox, tile_shape })
    }

    pub fn geobox(&self) -> &GeoBox {
        &self.geobox
    }

    /// Nominal cell size `(rows, cols)`.
    pub fn tile_shape(&self) -> (usize, usize) {
        self.tile_shape
    }

    /// Number of cells `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (
            self.geobox.height.div_ceil(self.tile_shape.0),
            self.geobox.width.div_ceil(self.tile_shape.1),
        )
    }

    /// Pixel window of cell `(row, col)` within the full grid.
    pub fn roi(&self, row: usize, col: usize) -> Roi {
        let r0 = row * self.tile_shape.0;
        let c0 = col * self.tile_shape.1;
        Roi::new(
            r0.min(self.geobox.height),
            (r0 + self.tile_shape.0).min(self.geobox.height),
            c0.min(self.geobox.width),
            (c0 + self.tile_shape.1).min(self.geobox.width),
        )
    }

    /// Sub-grid of cell `(row, col)`.
    pub fn tile(&self, row: usize, col: usize) -> GeoBox {
        self.geobox.slice(&self.roi(row, col))
    }

    /// Actual pixel shape of cell `(row, col)`.
    pub fn chunk_shape(&self, row: usize, col: usize) -> (usize, usize) {
        self.roi(row, col).shape()
    }

    /// Heights of each cell row, top to bottom.
    pub fn row_sizes(&self) -> Vec<usize> {
        (0..self.shape().0).map(|r| self.roi(r, 0).height()).collect()
    }

    /// Widths of each cell column, left to right.
    pub fn col_sizes(&self) -> Vec<usize> {
        (0..self.shape().1).map(|c| self.roi(0, c).width()).collect()
    }

    /// Cells overlapped by `bbox` (in the grid's CRS), row-major.
    ///
    /// Touching a cell only along an edge does not count as overlap.
    pub fn tiles_for_bbox(&self, bbox: &BoundingBox) -> Vec<(usize, usize)> {
        let roi = self.geobox.bbox_to_roi(bbox);
        if roi.is_empty() {
            return Vec::new();
        }

        let (th, tw) = self.tile_shape;
        let rows = roi.row_start / th..roi.row_end.div_ceil(th);
        let cols = roi.col_start / tw..roi.col_end.div_ceil(tw);

        rows.flat_map(|r| cols.clone().map(move |c| (r, c)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Affine, Crs};

    fn tiles() -> GeoboxTiles {
        let gbox = GeoBox::new(10, 5, Affine::new(1.0, 0.0, -1.0, 5.0), Crs::from_epsg(32633));
        GeoboxTiles::new(gbox, (2, 4)).unwrap()
    }

    #[test]
    fn test_shape_and_edges() {
        let t = tiles();
        assert_eq!(t.shape(), (3, 3));
        assert_eq!(t.chunk_shape(0, 0), (2, 4));
        assert_eq!(t.chunk_shape(2, 2), (1, 2));
        assert_eq!(t.row_sizes(), vec![2, 2, 1]);
        assert_eq!(t.col_sizes(), vec![4, 4, 2]);
        assert_eq!(t.roi(1, 1), Roi::new(2, 4, 4, 8));
    }

    #[test]
    fn test_tile_geobox() {
        let t = tiles();
        let cell = t.tile(1, 2);
        assert_eq!(cell.extent(), BoundingBox::new(8.0, 1.0, 10.0, 3.0));
    }

    #[test]
    fn test_tiles_for_bbox() {
        let t = tiles();
        // Left half exactly: columns 0..4 only.
        let hits = t.tiles_for_bbox(&BoundingBox::new(0.0, 0.0, 4.0, 5.0));
        assert_eq!(hits, vec![(0, 0), (1, 0), (2, 0)]);

        let hits = t.tiles_for_bbox(&BoundingBox::new(3.5, 3.5, 4.5, 4.5));
        assert_eq!(hits, vec![(0, 0), (0, 1)]);

        assert!(t.tiles_for_bbox(&BoundingBox::new(20.0, 20.0, 30.0, 30.0)).is_empty());
    }

    #[test]
    fn test_zero_tile_shape_rejected() {
        let gbox = GeoBox::new(1, 1, Affine::new(1.0, 0.0, -1.0, 1.0), Crs::WGS84);
        assert!(GeoboxTiles::new(gbox, (0, 1)).is_err());
    }
}
