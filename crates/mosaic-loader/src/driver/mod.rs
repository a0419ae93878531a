//! Reader drivers: how sources are opened and read.
//!
//! A [`ReaderDriver`] brackets a whole load (`new_load` / `finalise_load`),
//! scopes the I/O environment on each worker thread (`capture_env` /
//! `restore_env`) and opens sources into [`RasterReader`]s. Most drivers
//! are a [`BackendDriver`] over a [`RasterBackend`] that only knows how to
//! decode pixel windows; the driver adds overview selection and the
//! paste-or-reproject decision.

pub mod backend;
pub mod downsample;
pub mod env;
pub mod memory;
pub mod nodata;
pub mod overview;
pub mod registry;
pub mod resample;
pub mod zarr;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use mosaic_geo::{GeoBox, Roi};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::config::{LoaderConfig, PASTE_TOLERANCE_NEAREST, PASTE_TOLERANCE_RESAMPLED};
use crate::error::Result;
use crate::item::RasterSource;
use crate::types::RasterLoadParams;

pub use backend::{BackendDriver, RasterBackend, RasterDataset};
pub use downsample::DownsampleMethod;
pub use env::{current_env, EnvScope, IoEnv, IoSession, SessionConfig};
pub use memory::{MemoryBackend, MemoryRaster};
pub use registry::{DriverRegistry, DriverSelection};
pub use zarr::ZarrBackend;

/// Read settings shared by every task of one load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReaderSettings {
    pub paste_tolerance_nearest: f64,
    pub paste_tolerance_resampled: f64,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            paste_tolerance_nearest: PASTE_TOLERANCE_NEAREST,
            paste_tolerance_resampled: PASTE_TOLERANCE_RESAMPLED,
        }
    }
}

impl From<&LoaderConfig> for ReaderSettings {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            paste_tolerance_nearest: config.paste_tolerance_nearest,
            paste_tolerance_resampled: config.paste_tolerance_resampled,
        }
    }
}

impl ReaderSettings {
    /// Largest translation, in source pixels, that still allows a paste.
    pub fn paste_tolerance(&self, cfg: &RasterLoadParams) -> f64 {
        if cfg.nearest() {
            self.paste_tolerance_nearest
        } else {
            self.paste_tolerance_resampled
        }
    }
}

/// Driver state for one load call, created by [`ReaderDriver::new_load`].
#[derive(Clone)]
pub struct LoadContext {
    /// `(time, y, x)` of the full output, when known.
    pub shape_hint: Option<(usize, usize, usize)>,
    pub settings: ReaderSettings,
    /// Driver-specific state (connection pools, decoder contexts).
    pub extra: Option<Arc<dyn Any + Send + Sync>>,
}

impl LoadContext {
    pub fn new(shape_hint: Option<(usize, usize, usize)>, settings: ReaderSettings) -> Self {
        Self {
            shape_hint,
            settings,
            extra: None,
        }
    }
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("shape_hint", &self.shape_hint)
            .field("settings", &self.settings)
            .field("extra", &self.extra.is_some())
            .finish()
    }
}

/// An opened source.
pub trait RasterReader: Send + Sync {
    /// Read onto `dst_gbox`.
    ///
    /// Returns the window of `dst_gbox` that was written and its pixels as
    /// `(rows, cols, planes)`. Pixels without data hold the destination
    /// nodata value. An empty window means the source does not overlap.
    fn read(&self, cfg: &RasterLoadParams, dst_gbox: &GeoBox) -> Result<(Roi, Array3<f64>)>;
}

/// Protocol between the loader and a family of raster sources.
pub trait ReaderDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Called once before any task of a load runs.
    fn new_load(
        &self,
        shape_hint: Option<(usize, usize, usize)>,
        settings: ReaderSettings,
    ) -> Result<LoadContext> {
        Ok(LoadContext::new(shape_hint, settings))
    }

    /// Called once after every task of a load has finished.
    fn finalise_load(&self, _ctx: LoadContext) -> Result<()> {
        Ok(())
    }

    /// Snapshot of the I/O configuration active on the calling thread.
    fn capture_env(&self) -> IoEnv {
        IoEnv::capture()
    }

    /// Apply `env` on the current thread until the returned scope drops.
    fn restore_env(&self, env: &IoEnv, _ctx: &LoadContext) -> Result<EnvScope> {
        Ok(EnvScope::enter(env.clone()))
    }

    fn open(&self, src: &RasterSource, ctx: &LoadContext) -> Result<Box<dyn RasterReader>>;
}
