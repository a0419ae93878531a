//! Error types for grid and geometry operations.

use thiserror::Error;

/// Result type alias using GeoError.
pub type GeoResult<T> = Result<T, GeoError>;

/// Errors raised by grid and geometry primitives.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeoError {
    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    #[error("No transform available from {from} to {to}")]
    UnsupportedTransform { from: String, to: String },

    #[error("Invalid affine transform: {0}")]
    InvalidAffine(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid grid: {0}")]
    InvalidGrid(String),
}
