//! Compositing overlapping reads into one destination cell.
//!
//! The cell starts at the fill pattern. The first source that yields data
//! is written over its whole window; every later source only fills pixels
//! that are still missing, so the first valid pixel in priority order wins.

use std::sync::Arc;

use mosaic_geo::{GeoBox, Roi};
use ndarray::{s, Array3, ArrayViewMut3, Zip};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::driver::nodata::{fusion_nodata, initial_fill, is_nodata};
use crate::driver::{LoadContext, RasterReader, ReaderDriver};
use crate::error::{LoaderError, Result};
use crate::item::RasterSource;
use crate::types::{Pixel, RasterLoadParams};

/// A read that failed and was skipped because `fail_on_error` was off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadFailure {
    pub band: String,
    pub uri: String,
    /// `(time, row, col)` of the output cell.
    pub tile: (usize, usize, usize),
    pub message: String,
}

/// Failures collected across all workers of one load.
#[derive(Debug, Clone, Default)]
pub struct LoadDiagnostics {
    failures: Arc<Mutex<Vec<ReadFailure>>>,
}

impl LoadDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, failure: ReadFailure) {
        self.failures.lock().push(failure);
    }

    /// Recorded failures, ordered by band, cell then URI.
    pub fn failures(&self) -> Vec<ReadFailure> {
        let mut out = self.failures.lock().clone();
        out.sort_by(|a, b| (&a.band, a.tile, &a.uri).cmp(&(&b.band, b.tile, &b.uri)));
        out
    }

    pub fn len(&self) -> usize {
        self.failures.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.lock().is_empty()
    }
}

/// One read result: the written window and its `(rows, cols, planes)` pixels.
pub type CellRead = (Roi, Array3<f64>);

/// Band, cell and failure policy for the reads of one destination cell.
#[derive(Debug, Clone, Copy)]
pub struct CellScope<'a> {
    pub band: &'a str,
    pub tile: (usize, usize, usize),
    pub cfg: &'a RasterLoadParams,
    pub diagnostics: &'a LoadDiagnostics,
}

impl CellScope<'_> {
    /// Apply the failure policy to a read of `uri`.
    ///
    /// With `fail_on_error` the error propagates; otherwise it is logged,
    /// recorded and the read counts as empty.
    pub fn guard(&self, uri: &str, read: Result<CellRead>) -> Result<Option<CellRead>> {
        match read {
            Ok((roi, _)) if roi.is_empty() => Ok(None),
            Ok(read) => Ok(Some(read)),
            Err(e) if self.cfg.fail_on_error => Err(e),
            Err(e) => {
                tracing::warn!(
                    band = %self.band,
                    uri = %uri,
                    tile = ?self.tile,
                    error = %e,
                    "skipping unreadable source"
                );
                self.diagnostics.record(ReadFailure {
                    band: self.band.to_string(),
                    uri: uri.to_string(),
                    tile: self.tile,
                    message: e.to_string(),
                });
                Ok(None)
            }
        }
    }
}

/// Composite `reads` into `dst` (shape `(rows, cols, planes)`).
///
/// Reads are consumed lazily, in priority order; an `Err` stops the cell.
pub fn fuse_cell<T, I>(mut dst: ArrayViewMut3<'_, T>, cfg: &RasterLoadParams, reads: I) -> Result<()>
where
    T: Pixel,
    I: IntoIterator<Item = Result<Option<CellRead>>>,
{
    dst.fill(T::from_f64(initial_fill(cfg)));
    let marker = fusion_nodata(cfg);
    let (rows, cols, planes) = dst.dim();

    let mut written = false;
    for read in reads {
        let Some((roi, pix)) = read? else {
            continue;
        };
        if roi.row_end > rows || roi.col_end > cols || pix.dim() != (roi.height(), roi.width(), planes) {
            return Err(LoaderError::execution(format!(
                "read of shape {:?} at {:?} does not fit cell {:?}",
                pix.dim(),
                roi,
                (rows, cols, planes)
            )));
        }

        let window = dst.slice_mut(s![roi.row_start..roi.row_end, roi.col_start..roi.col_end, ..]);
        if written {
            Zip::from(window).and(&pix).for_each(|d, &v| {
                if is_nodata(d.to_f64(), marker) {
                    *d = T::from_f64(v);
                }
            });
        } else {
            Zip::from(window).and(&pix).for_each(|d, &v| *d = T::from_f64(v));
            written = true;
        }
    }
    Ok(())
}

/// Open and read each source in turn, then fuse into `dst`.
pub fn load_cell<T: Pixel>(
    dst: ArrayViewMut3<'_, T>,
    sources: &[&RasterSource],
    dst_gbox: &GeoBox,
    driver: &dyn ReaderDriver,
    ctx: &LoadContext,
    scope: CellScope<'_>,
) -> Result<()> {
    let reads = sources.iter().map(|src| {
        let read = driver
            .open(src, ctx)
            .and_then(|reader| reader.read(scope.cfg, dst_gbox));
        scope.guard(&src.uri, read)
    });
    fuse_cell(dst, scope.cfg, reads)
}

/// A source opened once and shared by every cell that reads it.
#[derive(Clone)]
pub struct OpenedSource {
    pub uri: String,
    /// Band index within the source.
    pub band: u32,
    /// A failed open keeps the backend's message.
    pub reader: std::result::Result<Arc<dyn RasterReader>, String>,
}

impl OpenedSource {
    pub fn open(driver: &dyn ReaderDriver, src: &RasterSource, ctx: &LoadContext) -> Self {
        let reader = driver.open(src, ctx).map(Arc::from).map_err(|e| match e {
            LoaderError::ReadIo { message, .. } => message,
            other => other.to_string(),
        });
        Self {
            uri: src.uri.clone(),
            band: src.band,
            reader,
        }
    }
}

/// Fuse from readers that are already open. A failed open goes through
/// the same policy as a failed read.
pub fn load_cell_opened<T: Pixel>(
    dst: ArrayViewMut3<'_, T>,
    sources: &[OpenedSource],
    dst_gbox: &GeoBox,
    scope: CellScope<'_>,
) -> Result<()> {
    let reads = sources.iter().map(|src| {
        let read = match &src.reader {
            Ok(reader) => reader.read(scope.cfg, dst_gbox),
            Err(msg) => Err(LoaderError::read_io(&src.uri, src.band, msg.clone())),
        };
        scope.guard(&src.uri, read)
    });
    fuse_cell(dst, scope.cfg, reads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;
    use ndarray::{Array2, Axis};

    fn read(roi: Roi, data: Array2<f64>) -> Result<Option<CellRead>> {
        Ok(Some((roi, data.insert_axis(Axis(2)))))
    }

    #[test]
    fn test_no_sources_is_fill_pattern() {
        let mut dst = Array3::<f32>::zeros((3, 3, 1));
        fuse_cell(dst.view_mut(), &RasterLoadParams::default(), Vec::new()).unwrap();
        assert!(dst.iter().all(|v| v.is_nan()));

        let cfg = RasterLoadParams::same_as(DataType::UInt16, Some(7.0));
        let mut dst = Array3::<u16>::zeros((2, 2, 1));
        fuse_cell(dst.view_mut(), &cfg, Vec::new()).unwrap();
        assert!(dst.iter().all(|&v| v == 7));
    }

    #[test]
    fn test_first_valid_pixel_wins() {
        let cfg = RasterLoadParams::default();
        let mut first = Array2::from_elem((2, 2), 1.0);
        first[[0, 0]] = f64::NAN;
        let second = Array2::from_elem((2, 2), 2.0);

        let mut dst = Array3::<f32>::zeros((2, 2, 1));
        fuse_cell(
            dst.view_mut(),
            &cfg,
            vec![read(Roi::full((2, 2)), first), read(Roi::full((2, 2)), second)],
        )
        .unwrap();
        assert_eq!(dst[[0, 0, 0]], 2.0);
        assert_eq!(dst[[1, 1, 0]], 1.0);
    }

    #[test]
    fn test_partial_window() {
        let cfg = RasterLoadParams::same_as(DataType::Int16, Some(-1.0));
        let mut dst = Array3::<i16>::zeros((2, 4, 1));
        fuse_cell(
            dst.view_mut(),
            &cfg,
            vec![read(Roi::new(0, 2, 2, 4), Array2::from_elem((2, 2), 5.0))],
        )
        .unwrap();
        assert_eq!(dst.index_axis(Axis(2), 0).row(0).to_vec(), vec![-1, -1, 5, 5]);
    }

    #[test]
    fn test_single_source_idempotent() {
        let cfg = RasterLoadParams::default();
        let data = Array2::from_shape_fn((3, 3), |(r, c)| (r * 3 + c) as f64);
        let mut once = Array3::<f32>::zeros((3, 3, 1));
        let mut twice = Array3::<f32>::zeros((3, 3, 1));
        fuse_cell(once.view_mut(), &cfg, vec![read(Roi::full((3, 3)), data.clone())]).unwrap();
        fuse_cell(twice.view_mut(), &cfg, vec![read(Roi::full((3, 3)), data.clone())]).unwrap();
        fuse_cell(twice.view_mut(), &cfg, vec![read(Roi::full((3, 3)), data)]).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_guard_policy() {
        let diagnostics = LoadDiagnostics::new();
        let mut cfg = RasterLoadParams::default();
        cfg.fail_on_error = false;
        let scope = CellScope {
            band: "red",
            tile: (0, 1, 2),
            cfg: &cfg,
            diagnostics: &diagnostics,
        };
        let out = scope
            .guard("s3://x", Err(LoaderError::read_io("s3://x", 1, "boom")))
            .unwrap();
        assert!(out.is_none());
        assert_eq!(diagnostics.failures()[0].tile, (0, 1, 2));

        let strict = RasterLoadParams::default();
        let scope = CellScope { cfg: &strict, ..scope };
        assert!(scope
            .guard("s3://x", Err(LoaderError::read_io("s3://x", 1, "boom")))
            .is_err());
    }

    #[test]
    fn test_misfit_read_rejected() {
        let mut dst = Array3::<f32>::zeros((2, 2, 1));
        let err = fuse_cell(
            dst.view_mut(),
            &RasterLoadParams::default(),
            vec![read(Roi::new(0, 3, 0, 2), Array2::zeros((3, 2)))],
        );
        assert!(matches!(err, Err(LoaderError::Execution(_))));
    }

    #[test]
    fn test_failed_open_keeps_source_band() {
        use crate::driver::{BackendDriver, MemoryBackend, ReaderSettings};

        let driver = BackendDriver::new(MemoryBackend::new());
        let ctx = LoadContext::new(None, ReaderSettings::default());
        let src = RasterSource::new("mem://absent").with_band(2);
        let opened = OpenedSource::open(&driver, &src, &ctx);
        assert_eq!(opened.band, 2);

        let diagnostics = LoadDiagnostics::new();
        let cfg = RasterLoadParams::default();
        let scope = CellScope {
            band: "red",
            tile: (0, 0, 0),
            cfg: &cfg,
            diagnostics: &diagnostics,
        };
        let gbox = GeoBox::new(
            2,
            2,
            mosaic_geo::Affine::new(1.0, 0.0, -1.0, 2.0),
            mosaic_geo::Crs::WEB_MERCATOR,
        );
        let mut dst = Array3::<f32>::zeros((2, 2, 1));
        let err = load_cell_opened(dst.view_mut(), &[opened], &gbox, scope).unwrap_err();
        match err {
            LoaderError::ReadIo { uri, band, message } => {
                assert_eq!(uri, "mem://absent");
                assert_eq!(band, 2);
                assert_eq!(message, "no such raster");
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
