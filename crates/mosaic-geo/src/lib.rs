//! Grid and geometry primitives shared by the mosaic loader.
//!
//! Everything here is pure arithmetic: no I/O, no pixel decoding. The loader
//! uses these types to decide *where* pixels go, never to produce them.

pub mod bbox;
pub mod crs;
pub mod error;
pub mod geobox;
pub mod geometry;
pub mod overlap;
pub mod tiles;
pub mod utm;
pub mod window;

pub use bbox::BoundingBox;
pub use crs::Crs;
pub use error::{GeoError, GeoResult};
pub use geobox::{Affine, GeoBox, Resolution};
pub use geometry::Geometry;
pub use overlap::{compute_reproject_roi, ReprojectInfo};
pub use tiles::GeoboxTiles;
pub use utm::UtmZone;
pub use window::Roi;
