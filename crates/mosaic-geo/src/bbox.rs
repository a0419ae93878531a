//! Axis-aligned extents.

use serde::{Deserialize, Serialize};

/// Extent `[min_x, max_x) x [min_y, max_y)` expressed in the units of
/// whatever CRS the caller pairs it with (degrees or metres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Tight extent around `points`; `None` when there are none.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        points.into_iter().fold(None, |acc: Option<Self>, (x, y)| {
            let pt = Self::new(x, y, x, y);
            Some(acc.map_or(pt, |b| b.union(&pt)))
        })
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Zero or negative area, or NaN bounds.
    pub fn is_empty(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    /// Clockwise from the north-west corner.
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_x, self.max_y),
            (self.max_x, self.max_y),
            (self.max_x, self.min_y),
            (self.min_x, self.min_y),
        ]
    }

    /// Positive-area overlap. Touching edges do not count.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.intersection(other).is_some()
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let clipped = BoundingBox::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        );
        (!clipped.is_empty()).then_some(clipped)
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 15.0, 15.0);
        let c = BoundingBox::new(20.0, 20.0, 30.0, 30.0);

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));

        let intersection = a.intersection(&b).unwrap();
        assert_eq!(intersection.min_x, 5.0);
        assert_eq!(intersection.min_y, 5.0);
        assert_eq!(intersection.max_x, 10.0);
        assert_eq!(intersection.max_y, 10.0);
    }

    #[test]
    fn test_shared_edge_is_not_overlap() {
        let left = BoundingBox::new(0.0, 0.0, 5.0, 5.0);
        let right = BoundingBox::new(5.0, 0.0, 10.0, 5.0);
        assert!(!left.intersects(&right));
        assert!(left.intersection(&right).is_none());
    }

    #[test]
    fn test_union_and_points() {
        let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let b = BoundingBox::new(-1.0, 0.5, 0.5, 3.0);
        assert_eq!(a.union(&b), BoundingBox::new(-1.0, 0.0, 1.0, 3.0));

        let pts = BoundingBox::from_points([(3.0, 1.0), (-2.0, 4.0), (0.0, 0.0)]).unwrap();
        assert_eq!(pts, BoundingBox::new(-2.0, 0.0, 3.0, 4.0));
        assert!(BoundingBox::from_points(std::iter::empty()).is_none());
    }
}
