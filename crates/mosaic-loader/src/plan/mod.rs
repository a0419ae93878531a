//! Load planning: per-band params, chunk shapes and the task list shared
//! by the direct and lazy strategies.

pub mod direct;

use std::ops::Range;
use std::sync::Arc;

use indexmap::IndexMap;
use mosaic_geo::{GeoBox, GeoboxTiles, Roi};
use serde::{Deserialize, Serialize};

use crate::binning::BinMap;
use crate::error::Result;
use crate::grouping::TimeGroups;
use crate::item::{ParsedItem, RasterSource};
use crate::metadata::{BandKey, RasterBandMetadata};
use crate::types::{DataType, PerBand, RasterLoadParams, Resampling};

pub use direct::{run_direct, DirectOptions, LoadProgress};

/// Chunking of one output dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkDim {
    /// Strategy default: one time step, or the configured cell edge.
    #[default]
    Default,
    /// Sized from the byte budget.
    Auto,
    /// Whole dimension in one chunk.
    Full,
    Fixed(usize),
}

/// Chunk hints for `(time, y, x)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkSpec {
    #[serde(default)]
    pub time: ChunkDim,
    #[serde(default)]
    pub y: ChunkDim,
    #[serde(default)]
    pub x: ChunkDim,
}

impl ChunkSpec {
    pub fn fixed(y: usize, x: usize) -> Self {
        Self {
            time: ChunkDim::Default,
            y: ChunkDim::Fixed(y),
            x: ChunkDim::Fixed(x),
        }
    }

    pub fn auto() -> Self {
        Self {
            time: ChunkDim::Default,
            y: ChunkDim::Auto,
            x: ChunkDim::Auto,
        }
    }

    pub fn with_time(mut self, time: ChunkDim) -> Self {
        self.time = time;
        self
    }
}

/// Resolve chunk hints into a concrete `(time, y, x)` chunk shape.
///
/// `cell` is the edge used for `Default` spatial dims; `Auto` picks square
/// cells so one block of `itemsize`-byte pixels fits in `byte_budget`.
pub fn resolve_chunk_shape(
    n_time: usize,
    shape: (usize, usize),
    spec: &ChunkSpec,
    itemsize: usize,
    cell: usize,
    byte_budget: usize,
) -> (usize, usize, usize) {
    let t = match spec.time {
        ChunkDim::Full => n_time,
        ChunkDim::Fixed(n) => n.min(n_time),
        ChunkDim::Default | ChunkDim::Auto => 1,
    }
    .max(1);

    let auto_edge = {
        let pixels = byte_budget / (itemsize.max(1) * t);
        ((pixels as f64).sqrt().floor() as usize).max(1)
    };
    let spatial = |dim: ChunkDim, size: usize| {
        match dim {
            ChunkDim::Default => cell,
            ChunkDim::Auto => auto_edge,
            ChunkDim::Full => size,
            ChunkDim::Fixed(n) => n,
        }
        .min(size)
        .max(1)
    };

    (t, spatial(spec.y, shape.0), spatial(spec.x, shape.1))
}

/// Per-request overrides applied on top of band metadata.
#[derive(Debug, Clone)]
pub struct LoadCfgOverrides {
    pub dtype: Option<PerBand<DataType>>,
    pub resampling: PerBand<Resampling>,
    /// Output fill value; band nodata when unset.
    pub nodata: Option<f64>,
    pub use_overviews: bool,
    pub fail_on_error: bool,
}

impl Default for LoadCfgOverrides {
    fn default() -> Self {
        Self {
            dtype: None,
            resampling: PerBand::All(Resampling::Nearest),
            nodata: None,
            use_overviews: true,
            fail_on_error: true,
        }
    }
}

/// Load params for every requested band.
pub fn resolve_load_cfg(
    bands: &IndexMap<String, (BandKey, RasterBandMetadata)>,
    overrides: &LoadCfgOverrides,
) -> IndexMap<String, RasterLoadParams> {
    bands
        .iter()
        .map(|(name, (_, meta))| {
            let dtype = overrides
                .dtype
                .as_ref()
                .and_then(|d| d.get(name))
                .unwrap_or(meta.data_type);
            let cfg = RasterLoadParams {
                dtype,
                fill_value: overrides.nodata.or(meta.nodata),
                src_nodata_fallback: meta.nodata,
                src_nodata_override: None,
                use_overviews: overrides.use_overviews,
                resampling: overrides.resampling.get(name).unwrap_or_default(),
                fail_on_error: overrides.fail_on_error,
                dims: meta.dims.clone(),
            };
            (name.clone(), cfg)
        })
        .collect()
}

/// Work for one `(band, time chunk, row, col)` block.
#[derive(Debug, Clone)]
pub struct LoadChunkTask {
    pub band: String,
    /// Per time step of the chunk: contributing `(item, band key)` pairs in
    /// fusion priority order.
    pub srcs: Vec<Vec<(usize, BandKey)>>,
    pub cfg: RasterLoadParams,
    pub tiles: Arc<GeoboxTiles>,
    /// `(time chunk, row, col)`.
    pub idx: (usize, usize, usize),
    /// Nominal time steps per chunk.
    pub time_chunk: usize,
    pub planes: usize,
}

impl LoadChunkTask {
    /// Output time steps covered by this block.
    pub fn time_range(&self) -> Range<usize> {
        let t0 = self.idx.0 * self.time_chunk;
        t0..t0 + self.srcs.len()
    }

    /// Pixel window of this block in the full output grid.
    pub fn dst_roi(&self) -> Roi {
        self.tiles.roi(self.idx.1, self.idx.2)
    }

    pub fn dst_gbox(&self) -> GeoBox {
        self.tiles.tile(self.idx.1, self.idx.2)
    }

    /// `(time, y, x, planes)` of the block.
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        let (h, w) = self.tiles.chunk_shape(self.idx.1, self.idx.2);
        (self.srcs.len(), h, w, self.planes)
    }

    /// Sources per time step, looked up in `items`.
    pub fn resolve_sources<'a>(&self, items: &'a [ParsedItem]) -> Vec<Vec<&'a RasterSource>> {
        self.srcs
            .iter()
            .map(|step| {
                step.iter()
                    .filter_map(|(idx, key)| items.get(*idx).and_then(|item| item.bands.get(key)))
                    .collect()
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.srcs.iter().all(Vec::is_empty)
    }
}

/// Everything computed once per load call before any pixels are read.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    /// Items with planning-only fields stripped.
    pub items: Arc<Vec<ParsedItem>>,
    pub groups: TimeGroups,
    pub tiles: Arc<GeoboxTiles>,
    pub bins: BinMap,
    pub cfgs: IndexMap<String, RasterLoadParams>,
    /// Planes per band.
    pub planes: IndexMap<String, usize>,
    pub time_chunk: usize,
}

impl LoadPlan {
    pub fn n_time(&self) -> usize {
        self.groups.len()
    }

    /// Number of time chunks.
    pub fn time_chunks(&self) -> usize {
        self.n_time().div_ceil(self.time_chunk.max(1))
    }

    /// Key of `band` in `item`, when the item carries it.
    fn band_key_of(&self, item: &ParsedItem, band: &str) -> Option<BandKey> {
        item.collection
            .band_key(band)
            .ok()
            .filter(|key| item.bands.contains_key(key))
    }

    /// Contributors for one output time step and cell.
    pub fn sources_for(&self, band: &str, t: usize, row: usize, col: usize) -> Vec<(usize, BandKey)> {
        self.bins
            .get(&(t, row, col))
            .map(|items| {
                items
                    .iter()
                    .filter_map(|&idx| {
                        self.band_key_of(&self.items[idx], band).map(|key| (idx, key))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tasks for one band, time chunk major, then row-major cells.
    pub fn tasks_for_band(&self, band: &str) -> Result<Vec<LoadChunkTask>> {
        let cfg = self.cfgs.get(band).cloned().ok_or_else(|| {
            crate::error::LoaderError::band_resolution(format!("band '{}' is not planned", band))
        })?;
        let planes = self.planes.get(band).copied().unwrap_or(1);
        let (rows, cols) = self.tiles.shape();
        let n_time = self.n_time();

        let mut tasks = Vec::with_capacity(self.time_chunks() * rows * cols);
        for tc in 0..self.time_chunks() {
            let t0 = tc * self.time_chunk;
            let t1 = (t0 + self.time_chunk).min(n_time);
            for row in 0..rows {
                for col in 0..cols {
                    tasks.push(LoadChunkTask {
                        band: band.to_string(),
                        srcs: (t0..t1).map(|t| self.sources_for(band, t, row, col)).collect(),
                        cfg: cfg.clone(),
                        tiles: self.tiles.clone(),
                        idx: (tc, row, col),
                        time_chunk: self.time_chunk,
                        planes,
                    });
                }
            }
        }
        Ok(tasks)
    }

    /// Every task of the load, band by band.
    pub fn tasks(&self) -> Result<Vec<LoadChunkTask>> {
        let mut out = Vec::new();
        for band in self.cfgs.keys() {
            out.extend(self.tasks_for_band(band)?);
        }
        tracing::debug!(
            tasks = out.len(),
            bands = self.cfgs.len(),
            cells = ?self.tiles.shape(),
            time = self.n_time(),
            "load plan built"
        );
        Ok(out)
    }
}
