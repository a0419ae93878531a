//! Polygon footprints.

use serde::{Deserialize, Serialize};

use crate::error::{GeoError, GeoResult};
use crate::{BoundingBox, Crs};

/// Points inserted per edge when reprojecting, so curved edges keep their
/// extent.
const DENSIFY_STEPS: usize = 16;

/// A single polygon ring tagged with its CRS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub crs: Crs,
    pub ring: Vec<(f64, f64)>,
}

impl Geometry {
    pub fn polygon(ring: Vec<(f64, f64)>, crs: Crs) -> GeoResult<Self> {
        if ring.len() < 3 {
            return Err(GeoError::InvalidGeometry(format!(
                "polygon ring needs at least 3 points, got {}",
                ring.len()
            )));
        }
        Ok(Self { crs, ring })
    }

    pub fn from_bbox(bbox: &BoundingBox, crs: Crs) -> Self {
        Self {
            crs,
            ring: bbox.corners().to_vec(),
        }
    }

    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::from_points(self.ring.iter().copied())
            .unwrap_or_else(|| BoundingBox::new(0.0, 0.0, 0.0, 0.0))
    }

    /// Area-weighted centroid, falling back to the vertex mean for
    /// degenerate rings.
    pub fn centroid(&self) -> (f64, f64) {
        let n = self.ring.len();
        let mut area2 = 0.0;
        let mut cx = 0.0;
        let mut cy = 0.0;
        for i in 0..n {
            let (x0, y0) = self.ring[i];
            let (x1, y1) = self.ring[(i + 1) % n];
            let cross = x0 * y1 - x1 * y0;
            area2 += cross;
            cx += (x0 + x1) * cross;
            cy += (y0 + y1) * cross;
        }

        if area2.abs() < f64::EPSILON {
            let (sx, sy) = self
                .ring
                .iter()
                .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
            return (sx / n.max(1) as f64, sy / n.max(1) as f64);
        }

        (cx / (3.0 * area2), cy / (3.0 * area2))
    }

    /// Reproject into `crs`, densifying edges first.
    pub fn to_crs(&self, crs: &Crs) -> GeoResult<Geometry> {
        if self.crs.is_equivalent(crs) {
            return Ok(Geometry {
                crs: *crs,
                ring: self.ring.clone(),
            });
        }

        let n = self.ring.len();
        let mut ring = Vec::with_capacity(n * DENSIFY_STEPS);
        for i in 0..n {
            let (x0, y0) = self.ring[i];
            let (x1, y1) = self.ring[(i + 1) % n];
            for step in 0..DENSIFY_STEPS {
                let t = step as f64 / DENSIFY_STEPS as f64;
                let x = x0 + (x1 - x0) * t;
                let y = y0 + (y1 - y0) * t;
                ring.push(self.crs.transform_point(crs, x, y)?);
            }
        }

        Ok(Geometry { crs: *crs, ring })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid_of_square() {
        let geom = Geometry::from_bbox(&BoundingBox::new(0.0, 0.0, 4.0, 2.0), Crs::WGS84);
        let (x, y) = geom.centroid();
        assert!((x - 2.0).abs() < 1e-12);
        assert!((y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_to_crs_keeps_extent() {
        let geom = Geometry::from_bbox(&BoundingBox::new(-10.0, -10.0, 10.0, 10.0), Crs::WGS84);
        let merc = geom.to_crs(&Crs::WEB_MERCATOR).unwrap();
        let bbox = merc.bbox();
        assert!((bbox.max_x - 1_113_194.9).abs() < 1.0);
        assert!((bbox.min_x + 1_113_194.9).abs() < 1.0);
        assert_eq!(merc.crs, Crs::WEB_MERCATOR);
    }

    #[test]
    fn test_polygon_requires_three_points() {
        assert!(Geometry::polygon(vec![(0.0, 0.0), (1.0, 1.0)], Crs::WGS84).is_err());
    }
}
