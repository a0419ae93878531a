//! In-memory raster backend.
//!
//! Rasters are registered under a URI and read back like files. Used for
//! tests, and for feeding already-decoded arrays through the loader.

use std::collections::HashMap;
use std::sync::Arc;

use mosaic_geo::{GeoBox, Roi};
use ndarray::{s, Array2, Array3, Axis};
use parking_lot::RwLock;

use super::backend::{RasterBackend, RasterDataset};
use super::downsample::{build_overviews, DownsampleMethod};
use crate::error::{LoaderError, Result};

/// A decoded raster: one `(rows, cols, planes)` array per band.
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    geobox: GeoBox,
    bands: Vec<Array3<f64>>,
    nodata: Option<f64>,
    /// `(factor, per-band arrays)`, finest first.
    overviews: Vec<(usize, Vec<Array3<f64>>)>,
}

impl MemoryRaster {
    /// Raster of 2-D bands. Every band must match the grid shape.
    pub fn new(geobox: GeoBox, bands: Vec<Array2<f64>>) -> Result<Self> {
        Self::with_planes(
            geobox,
            bands.into_iter().map(|b| b.insert_axis(Axis(2))).collect(),
        )
    }

    /// Raster whose bands carry an extra trailing axis.
    pub fn with_planes(geobox: GeoBox, bands: Vec<Array3<f64>>) -> Result<Self> {
        let (h, w) = geobox.shape();
        if let Some(bad) = bands.iter().find(|b| (b.dim().0, b.dim().1) != (h, w)) {
            return Err(LoaderError::invalid_query(format!(
                "band shape {:?} does not match grid {}x{}",
                bad.dim(),
                h,
                w
            )));
        }
        Ok(Self {
            geobox,
            bands,
            nodata: None,
            overviews: Vec::new(),
        })
    }

    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    /// Precompute 2x, 4x, ... overviews down to `min_dimension` pixels.
    pub fn with_overviews(mut self, method: DownsampleMethod, min_dimension: usize) -> Self {
        let mut levels: Vec<(usize, Vec<Array3<f64>>)> = Vec::new();
        for band in &self.bands {
            let planes: Vec<Vec<(usize, Array2<f64>)>> = band
                .axis_iter(Axis(2))
                .map(|plane| build_overviews(plane, self.nodata, method, min_dimension))
                .collect();
            let n_levels = planes.first().map_or(0, Vec::len);

            for lvl in 0..n_levels {
                let factor = planes[0][lvl].0;
                let views: Vec<_> = planes.iter().map(|p| p[lvl].1.view()).collect();
                let stacked = ndarray::stack(Axis(2), &views)
                    .unwrap_or_else(|_| Array3::zeros((0, 0, 0)));
                match levels.get_mut(lvl) {
                    Some((_, arrays)) => arrays.push(stacked),
                    None => levels.push((factor, vec![stacked])),
                }
            }
        }
        self.overviews = levels;
        self
    }
}

impl RasterDataset for MemoryRaster {
    fn geobox(&self) -> &GeoBox {
        &self.geobox
    }

    fn band_count(&self) -> u32 {
        self.bands.len() as u32
    }

    fn nodata(&self, _band: u32) -> Option<f64> {
        self.nodata
    }

    fn overviews(&self, _band: u32) -> Vec<usize> {
        self.overviews.iter().map(|(f, _)| *f).collect()
    }

    fn read_window(&self, band: u32, overview: Option<usize>, roi: &Roi) -> Result<Array3<f64>> {
        let idx = band as usize - 1;
        let data = match overview {
            None => self.bands.get(idx),
            Some(level) => self.overviews.get(level).and_then(|(_, arrays)| arrays.get(idx)),
        }
        .ok_or_else(|| {
            LoaderError::read_io("memory", band, format!("no data for overview {:?}", overview))
        })?;

        let (h, w, _) = data.dim();
        if roi.row_end > h || roi.col_end > w {
            return Err(LoaderError::read_io(
                "memory",
                band,
                format!("window {:?} outside {}x{}", roi, h, w),
            ));
        }
        Ok(data
            .slice(s![roi.row_start..roi.row_end, roi.col_start..roi.col_end, ..])
            .to_owned())
    }
}

/// URI-keyed registry of [`MemoryRaster`]s.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    rasters: Arc<RwLock<HashMap<String, Arc<MemoryRaster>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: impl Into<String>, raster: MemoryRaster) {
        self.rasters.write().insert(uri.into(), Arc::new(raster));
    }

    pub fn remove(&self, uri: &str) -> bool {
        self.rasters.write().remove(uri).is_some()
    }

    pub fn len(&self) -> usize {
        self.rasters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rasters.read().is_empty()
    }
}

impl RasterBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn open(&self, uri: &str, _subdataset: Option<&str>) -> Result<Arc<dyn RasterDataset>> {
        let raster = self
            .rasters
            .read()
            .get(uri)
            .cloned()
            .ok_or_else(|| LoaderError::read_io(uri, 0, "no such raster"))?;
        Ok(raster as Arc<dyn RasterDataset>)
    }
}
