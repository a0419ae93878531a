//! Error types for the loader.

use mosaic_geo::GeoError;
use thiserror::Error;

/// Errors that can occur while planning or executing a load.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Unknown band name or alias.
    #[error("band resolution failed: {0}")]
    BandResolution(String),

    /// Output CRS or resolution could not be determined.
    #[error("cannot determine output grid: {0}")]
    GridResolution(String),

    /// An item has no geometry usable for placing it on the output grid.
    #[error("item '{item_id}' has no usable footprint")]
    FootprintMissing { item_id: String },

    /// An item has none of datetime, start_datetime, end_datetime.
    #[error("item '{item_id}' has no timestamp")]
    TimestampMissing { item_id: String },

    /// Backend failed to open or read a source.
    #[error("failed to read band {band} of '{uri}': {message}")]
    ReadIo {
        uri: String,
        band: u32,
        message: String,
    },

    /// Two sources disagree about metadata that must be shared.
    #[error("conflicting metadata: {0}")]
    ConflictingMetadata(String),

    /// Invalid combination of load parameters.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Worker pool or task graph failure.
    #[error("execution error: {0}")]
    Execution(String),

    /// Grid or geometry error.
    #[error(transparent)]
    Geo(#[from] GeoError),
}

impl LoaderError {
    /// Create a BandResolution error.
    pub fn band_resolution(msg: impl Into<String>) -> Self {
        Self::BandResolution(msg.into())
    }

    /// Create a GridResolution error.
    pub fn grid_resolution(msg: impl Into<String>) -> Self {
        Self::GridResolution(msg.into())
    }

    /// Create a ReadIo error.
    pub fn read_io(uri: impl Into<String>, band: u32, msg: impl Into<String>) -> Self {
        Self::ReadIo {
            uri: uri.into(),
            band,
            message: msg.into(),
        }
    }

    /// Create a ConflictingMetadata error.
    pub fn conflicting(msg: impl Into<String>) -> Self {
        Self::ConflictingMetadata(msg.into())
    }

    /// Create an InvalidQuery error.
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    /// Create an Execution error.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for LoaderError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for LoaderError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Self::Execution(err.to_string())
    }
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;
