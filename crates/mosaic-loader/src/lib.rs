//! Raster mosaic loader for catalog items.
//!
//! Takes parsed catalog items (each pointing at one or more raster assets),
//! picks an output pixel grid, groups items into time slices and reads every
//! requested band into a `(time, y, x)` array per band. Overlapping sources
//! within a time slice are fused first-valid-wins.
//!
//! # Architecture
//!
//! ```text
//! load(items, opts)
//!      │
//!      ├─► resolve bands and aliases (metadata)
//!      ├─► output_geobox: CRS, resolution, extent
//!      ├─► group_items: time slices in fusion order
//!      ├─► GeoboxTiles + bin_items: which items touch which cell
//!      │
//!      ├─► direct: InMemoryAllocator + rayon pool
//!      │        └─► per cell: ReaderDriver::open → read → fuse
//!      │
//!      └─► lazy:   GraphBuilder emits content-hashed nodes
//!               └─► LocalExecutor (or any graph runner) computes later
//! ```
//!
//! # Example
//!
//! ```ignore
//! use mosaic_loader::mosaic_geo::Crs;
//! use mosaic_loader::{load, GeoQuery, GroupBy, LoadOptions};
//!
//! let opts = LoadOptions::new()
//!     .bands(vec!["red", "nir"])
//!     .groupby(GroupBy::SolarDay)
//!     .geo(GeoQuery::default().crs(Crs::from_epsg(32755)).resolution(30.0));
//! let ds = load(&items, &opts)?;
//! let red = ds.band("red").unwrap();
//! ```

pub mod binning;
pub mod config;
pub mod dataset;
pub mod driver;
pub mod error;
pub mod fusion;
pub mod graph;
pub mod grouping;
pub mod item;
pub mod load;
pub mod logging;
pub mod metadata;
pub mod output_grid;
pub mod plan;
pub mod types;

// Re-export commonly used types at crate root
pub use binning::{bin_items, BinMap};
pub use config::{BandConfig, CollectionConfig, ConversionConfig, LoaderConfig};
pub use dataset::{
    assemble_dataset, ArrayAllocator, BandData, BandStorage, Dataset, DataArray,
    InMemoryAllocator,
};
pub use driver::{
    BackendDriver, DriverRegistry, DriverSelection, EnvScope, IoEnv, LoadContext,
    MemoryBackend, MemoryRaster, RasterBackend, RasterReader, ReaderDriver, ReaderSettings,
    SessionConfig, ZarrBackend,
};
pub use error::{LoaderError, Result};
pub use fusion::{LoadDiagnostics, ReadFailure};
pub use graph::{GraphBuilder, LazyBand, LocalExecutor, NodeKey, TaskGraph};
pub use grouping::{group_items, GroupBy, GroupKey, TimeGroups};
pub use item::{AssetRecord, ItemParser, ItemRecord, ParsedItem, RasterSource};
pub use load::{load, LoadOptions};
pub use logging::init_tracing;
pub use metadata::{AliasTieBreak, BandKey, BandQuery, RasterBandMetadata, RasterCollectionMetadata};
pub use output_grid::{output_geobox, GeoQuery};
pub use plan::{ChunkDim, ChunkSpec, LoadPlan, LoadProgress};
pub use types::{DataType, PerBand, RasterLoadParams, Resampling};

pub use mosaic_geo;
