//! Generic driver over a pixel-decoding backend.

use std::sync::Arc;

use mosaic_geo::{compute_reproject_roi, GeoBox, Roi};
use ndarray::Array3;

use super::nodata::{is_nodata, resolve_dst_nodata, resolve_src_nodata, same_nodata};
use super::overview::pick_overview;
use super::resample::reproject;
use super::{LoadContext, RasterReader, ReaderDriver, ReaderSettings};
use crate::error::{LoaderError, Result};
use crate::item::RasterSource;
use crate::types::RasterLoadParams;

/// An opened raster file.
pub trait RasterDataset: Send + Sync {
    fn geobox(&self) -> &GeoBox;

    fn band_count(&self) -> u32;

    /// Nodata declared by the file for a 1-based band.
    fn nodata(&self, band: u32) -> Option<f64>;

    /// Overview decimation factors, finest first.
    fn overviews(&self, _band: u32) -> Vec<usize> {
        Vec::new()
    }

    /// Grid of overview `level`.
    fn overview_geobox(&self, band: u32, level: usize) -> Option<GeoBox> {
        self.overviews(band)
            .get(level)
            .map(|&factor| self.geobox().zoom_out(factor as f64))
    }

    /// Pixels of `roi` as `(rows, cols, planes)`, from the full-resolution
    /// image or an overview level.
    fn read_window(&self, band: u32, overview: Option<usize>, roi: &Roi) -> Result<Array3<f64>>;
}

/// Opens URIs into [`RasterDataset`]s.
pub trait RasterBackend: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, uri: &str, subdataset: Option<&str>) -> Result<Arc<dyn RasterDataset>>;
}

/// [`ReaderDriver`] that adds overview selection, paste and reprojection
/// on top of a [`RasterBackend`].
pub struct BackendDriver<B> {
    backend: B,
}

impl<B: RasterBackend> BackendDriver<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: RasterBackend> ReaderDriver for BackendDriver<B> {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn open(&self, src: &RasterSource, ctx: &LoadContext) -> Result<Box<dyn RasterReader>> {
        let dataset = self
            .backend
            .open(&src.uri, src.subdataset.as_deref())
            .map_err(|e| match e {
                LoaderError::ReadIo { uri, message, .. } => LoaderError::read_io(uri, src.band, message),
                other => other,
            })?;
        if src.band == 0 || src.band > dataset.band_count() {
            return Err(LoaderError::read_io(
                &src.uri,
                src.band,
                format!("file has {} band(s)", dataset.band_count()),
            ));
        }
        Ok(Box::new(BackendReader {
            dataset,
            uri: src.uri.clone(),
            band: src.band,
            settings: ctx.settings,
        }))
    }
}

struct BackendReader {
    dataset: Arc<dyn RasterDataset>,
    uri: String,
    band: u32,
    settings: ReaderSettings,
}

impl BackendReader {
    fn read_level(&self, level: Option<usize>, roi: &Roi) -> Result<Array3<f64>> {
        self.dataset
            .read_window(self.band, level, roi)
            .map_err(|e| match e {
                LoaderError::ReadIo { .. } => e,
                other => LoaderError::read_io(&self.uri, self.band, other.to_string()),
            })
    }
}

impl RasterReader for BackendReader {
    fn read(&self, cfg: &RasterLoadParams, dst_gbox: &GeoBox) -> Result<(Roi, Array3<f64>)> {
        let src_nodata = resolve_src_nodata(self.dataset.nodata(self.band), cfg);
        let dst_nodata = resolve_dst_nodata(cfg.dtype, cfg.fill_value, src_nodata);
        let tolerance = self.settings.paste_tolerance(cfg);

        let mut src_gbox = self.dataset.geobox().clone();
        let mut rr = compute_reproject_roi(&src_gbox, dst_gbox, tolerance)?;
        if rr.roi_dst.is_empty() {
            return Ok((Roi::empty(), Array3::zeros((0, 0, 1))));
        }

        let mut level = None;
        if cfg.use_overviews && rr.read_shrink > 1 {
            let factors = self.dataset.overviews(self.band);
            if let Some(idx) = pick_overview(rr.read_shrink, &factors) {
                if let Some(ovr_gbox) = self.dataset.overview_geobox(self.band, idx) {
                    tracing::trace!(uri = %self.uri, factor = factors[idx], "reading overview");
                    rr = compute_reproject_roi(&ovr_gbox, dst_gbox, tolerance)?;
                    src_gbox = ovr_gbox;
                    level = Some(idx);
                }
            }
            if rr.roi_dst.is_empty() {
                return Ok((Roi::empty(), Array3::zeros((0, 0, 1))));
            }
        }

        let mut pix = self.read_level(level, &rr.roi_src)?;

        if rr.paste_ok {
            if !same_nodata(src_nodata, dst_nodata) {
                let replacement = dst_nodata.unwrap_or(0.0);
                pix.mapv_inplace(|v| if is_nodata(v, src_nodata) { replacement } else { v });
            }
            return Ok((rr.roi_dst, pix));
        }

        let out = reproject(
            pix.view(),
            &src_gbox.slice(&rr.roi_src),
            src_nodata,
            &dst_gbox.slice(&rr.roi_dst),
            dst_nodata.unwrap_or(0.0),
            cfg.resampling,
        )?;
        Ok((rr.roi_dst, out))
    }
}
