//! Zarr V3 backend for local stores.
//!
//! An array is georeferenced through its attributes:
//!
//! ```json
//! {
//!   "crs": "EPSG:32633",
//!   "transform": [10.0, 0.0, 600000.0, 0.0, -10.0, 5000000.0],
//!   "nodata": 0,
//!   "overviews": [{"factor": 2, "path": "/ovr2"}]
//! }
//! ```
//!
//! Arrays are `[rows, cols]` (one band) or `[bands, rows, cols]`. The
//! source subdataset, when set, is the array path inside the store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mosaic_geo::{Affine, Crs, GeoBox, Roi};
use ndarray::Array3;
use num_traits::AsPrimitive;
use serde::Deserialize;
use zarrs::array::{Array, DataType as ZarrDataType, ElementOwned};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use super::backend::{RasterBackend, RasterDataset};
use crate::error::{LoaderError, Result};

/// Array path used when a source names no subdataset.
pub const ROOT_ARRAY: &str = "/";

#[derive(Debug, Deserialize)]
struct OverviewAttr {
    factor: usize,
    path: String,
}

/// Opens `file://` URIs and plain paths as Zarr stores.
#[derive(Debug, Clone, Default)]
pub struct ZarrBackend {
    root: Option<PathBuf>,
}

impl ZarrBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, uri: &str) -> PathBuf {
        let raw = uri
            .strip_prefix("file://")
            .or_else(|| uri.strip_prefix("zarr://"))
            .unwrap_or(uri);
        let path = Path::new(raw);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl RasterBackend for ZarrBackend {
    fn name(&self) -> &str {
        "zarr"
    }

    fn open(&self, uri: &str, subdataset: Option<&str>) -> Result<Arc<dyn RasterDataset>> {
        let path = self.resolve(uri);
        if !path.exists() {
            return Err(LoaderError::read_io(uri, 0, "store does not exist"));
        }
        let store = Arc::new(
            FilesystemStore::new(&path).map_err(|e| LoaderError::read_io(uri, 0, e.to_string()))?,
        );
        let raster = ZarrRaster::open(store, subdataset.unwrap_or(ROOT_ARRAY), uri)?;
        Ok(Arc::new(raster) as Arc<dyn RasterDataset>)
    }
}

struct ZarrRaster {
    uri: String,
    array: Array<FilesystemStore>,
    geobox: GeoBox,
    nodata: Option<f64>,
    overviews: Vec<(usize, Array<FilesystemStore>)>,
}

impl ZarrRaster {
    fn open(store: Arc<FilesystemStore>, path: &str, uri: &str) -> Result<Self> {
        let io = |msg: String| LoaderError::read_io(uri, 0, msg);

        let array = Array::open(store.clone(), path).map_err(|e| io(e.to_string()))?;
        let attrs = array.attributes();

        let shape = array.shape();
        let (height, width) = match shape.len() {
            2 => (shape[0] as usize, shape[1] as usize),
            3 => (shape[1] as usize, shape[2] as usize),
            n => return Err(io(format!("expected 2 or 3 dimensions, got {}", n))),
        };

        let crs = attrs
            .get("crs")
            .and_then(|v| v.as_str())
            .ok_or_else(|| io("missing 'crs' attribute".to_string()))
            .and_then(|s| Crs::parse(s).map_err(|e| io(e.to_string())))?;

        let coefficients: [f64; 6] = attrs
            .get("transform")
            .cloned()
            .ok_or_else(|| io("missing 'transform' attribute".to_string()))
            .and_then(|v| serde_json::from_value(v).map_err(|e| io(format!("transform: {}", e))))?;
        let affine = Affine::from_coefficients(coefficients).map_err(|e| io(e.to_string()))?;

        let nodata = attrs.get("nodata").and_then(|v| v.as_f64());

        let overview_attrs: Vec<OverviewAttr> = match attrs.get("overviews") {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| io(format!("overviews: {}", e)))?,
            None => Vec::new(),
        };
        let mut overviews = overview_attrs
            .into_iter()
            .map(|ovr| {
                Array::open(store.clone(), &ovr.path)
                    .map(|a| (ovr.factor, a))
                    .map_err(|e| io(format!("overview {}: {}", ovr.path, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        overviews.sort_by_key(|(factor, _)| *factor);

        tracing::debug!(
            uri = %uri,
            array = %path,
            width,
            height,
            overviews = overviews.len(),
            "opened zarr array"
        );

        Ok(Self {
            uri: uri.to_string(),
            geobox: GeoBox::new(width, height, affine, crs),
            array,
            nodata,
            overviews,
        })
    }

    fn band_axis(&self) -> bool {
        self.array.shape().len() == 3
    }
}

fn retrieve<T>(array: &Array<FilesystemStore>, subset: &ArraySubset) -> std::result::Result<Vec<f64>, String>
where
    T: ElementOwned + AsPrimitive<f64>,
{
    array
        .retrieve_array_subset_elements::<T>(subset)
        .map(|v| v.into_iter().map(|x| x.as_()).collect())
        .map_err(|e| e.to_string())
}

fn retrieve_f64(
    array: &Array<FilesystemStore>,
    subset: &ArraySubset,
) -> std::result::Result<Vec<f64>, String> {
    match array.data_type() {
        ZarrDataType::UInt8 => retrieve::<u8>(array, subset),
        ZarrDataType::Int8 => retrieve::<i8>(array, subset),
        ZarrDataType::UInt16 => retrieve::<u16>(array, subset),
        ZarrDataType::Int16 => retrieve::<i16>(array, subset),
        ZarrDataType::UInt32 => retrieve::<u32>(array, subset),
        ZarrDataType::Int32 => retrieve::<i32>(array, subset),
        ZarrDataType::UInt64 => retrieve::<u64>(array, subset),
        ZarrDataType::Int64 => retrieve::<i64>(array, subset),
        ZarrDataType::Float32 => retrieve::<f32>(array, subset),
        ZarrDataType::Float64 => retrieve::<f64>(array, subset),
        other => Err(format!("unsupported data type {:?}", other)),
    }
}

impl RasterDataset for ZarrRaster {
    fn geobox(&self) -> &GeoBox {
        &self.geobox
    }

    fn band_count(&self) -> u32 {
        if self.band_axis() {
            self.array.shape()[0] as u32
        } else {
            1
        }
    }

    fn nodata(&self, _band: u32) -> Option<f64> {
        self.nodata
    }

    fn overviews(&self, _band: u32) -> Vec<usize> {
        self.overviews.iter().map(|(f, _)| *f).collect()
    }

    fn read_window(&self, band: u32, overview: Option<usize>, roi: &Roi) -> Result<Array3<f64>> {
        let array = match overview {
            None => &self.array,
            Some(level) => &self
                .overviews
                .get(level)
                .ok_or_else(|| LoaderError::read_io(&self.uri, band, format!("no overview {}", level)))?
                .1,
        };

        let (h, w) = roi.shape();
        let (start, shape) = if self.band_axis() {
            (
                vec![band as u64 - 1, roi.row_start as u64, roi.col_start as u64],
                vec![1, h as u64, w as u64],
            )
        } else {
            (
                vec![roi.row_start as u64, roi.col_start as u64],
                vec![h as u64, w as u64],
            )
        };

        let subset = ArraySubset::new_with_start_shape(start, shape)
            .map_err(|e| LoaderError::read_io(&self.uri, band, e.to_string()))?;
        let data = retrieve_f64(array, &subset)
            .map_err(|e| LoaderError::read_io(&self.uri, band, e))?;

        Array3::from_shape_vec((h, w, 1), data)
            .map_err(|e| LoaderError::read_io(&self.uri, band, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_uri() {
        let backend = ZarrBackend::with_root("/data");
        assert_eq!(backend.resolve("file:///tmp/a.zarr"), PathBuf::from("/tmp/a.zarr"));
        assert_eq!(backend.resolve("scene/b04.zarr"), PathBuf::from("/data/scene/b04.zarr"));
        assert_eq!(ZarrBackend::new().resolve("x.zarr"), PathBuf::from("x.zarr"));
    }

    #[test]
    fn test_missing_store() {
        let backend = ZarrBackend::new();
        assert!(matches!(
            backend.open("/definitely/not/here.zarr", None),
            Err(LoaderError::ReadIo { .. })
        ));
    }
}
