//! Output container: coordinates plus one array per band.
//!
//! Band arrays are `(time, y, x, planes)`; `planes` is 1 unless the band
//! carries an extra axis. Storage is handed out by an [`ArrayAllocator`],
//! either an in-memory buffer or a lazily computed graph-backed band.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use mosaic_geo::GeoBox;
use ndarray::{s, Array4};
use serde_json::{json, Value};

use crate::error::{LoaderError, Result};
use crate::fusion::{LoadDiagnostics, ReadFailure};
use crate::graph::{LazyBand, LocalExecutor};
use crate::metadata::FixedCoord;
use crate::types::{DataType, Pixel, RasterLoadParams};

/// Name of the coordinate carrying grid and CRS metadata.
pub const SPATIAL_REF: &str = "spatial_ref";

/// Typed pixels of one band.
#[derive(Debug, Clone, PartialEq)]
pub enum BandData {
    UInt8(Array4<u8>),
    Int8(Array4<i8>),
    UInt16(Array4<u16>),
    Int16(Array4<i16>),
    UInt32(Array4<u32>),
    Int32(Array4<i32>),
    Float32(Array4<f32>),
    Float64(Array4<f64>),
}

/// Run `$body` with `$arr` bound to the typed array inside a [`BandData`].
#[macro_export]
macro_rules! with_band_data {
    ($data:expr, $arr:ident => $body:expr) => {
        match $data {
            $crate::dataset::BandData::UInt8($arr) => $body,
            $crate::dataset::BandData::Int8($arr) => $body,
            $crate::dataset::BandData::UInt16($arr) => $body,
            $crate::dataset::BandData::Int16($arr) => $body,
            $crate::dataset::BandData::UInt32($arr) => $body,
            $crate::dataset::BandData::Int32($arr) => $body,
            $crate::dataset::BandData::Float32($arr) => $body,
            $crate::dataset::BandData::Float64($arr) => $body,
        }
    };
}

/// Element types that can live in a [`BandData`].
pub trait BandPixel: Pixel {
    fn wrap(array: Array4<Self>) -> BandData;

    fn unwrap(data: &BandData) -> Option<&Array4<Self>>;
}

macro_rules! impl_band_pixel {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl BandPixel for $t {
                fn wrap(array: Array4<Self>) -> BandData {
                    BandData::$variant(array)
                }

                fn unwrap(data: &BandData) -> Option<&Array4<Self>> {
                    match data {
                        BandData::$variant(a) => Some(a),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_band_pixel!(
    u8 => UInt8,
    i8 => Int8,
    u16 => UInt16,
    i16 => Int16,
    u32 => UInt32,
    i32 => Int32,
    f32 => Float32,
    f64 => Float64,
);

impl BandData {
    /// Array of `shape` filled with `fill` converted to `dtype`.
    pub fn filled(dtype: DataType, shape: (usize, usize, usize, usize), fill: f64) -> Self {
        fn make<T: BandPixel>(shape: (usize, usize, usize, usize), fill: f64) -> BandData {
            T::wrap(Array4::from_elem(shape, T::from_f64(fill)))
        }
        match dtype {
            DataType::UInt8 => make::<u8>(shape, fill),
            DataType::Int8 => make::<i8>(shape, fill),
            DataType::UInt16 => make::<u16>(shape, fill),
            DataType::Int16 => make::<i16>(shape, fill),
            DataType::UInt32 => make::<u32>(shape, fill),
            DataType::Int32 => make::<i32>(shape, fill),
            DataType::Float32 => make::<f32>(shape, fill),
            DataType::Float64 => make::<f64>(shape, fill),
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            BandData::UInt8(_) => DataType::UInt8,
            BandData::Int8(_) => DataType::Int8,
            BandData::UInt16(_) => DataType::UInt16,
            BandData::Int16(_) => DataType::Int16,
            BandData::UInt32(_) => DataType::UInt32,
            BandData::Int32(_) => DataType::Int32,
            BandData::Float32(_) => DataType::Float32,
            BandData::Float64(_) => DataType::Float64,
        }
    }

    /// `(time, y, x, planes)`.
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        with_band_data!(self, a => a.dim())
    }

    pub fn get(&self, index: [usize; 4]) -> Option<f64> {
        with_band_data!(self, a => a.get(index).map(|v| v.to_f64()))
    }

    pub fn to_f64(&self) -> Array4<f64> {
        with_band_data!(self, a => a.mapv(|v| v.to_f64()))
    }

    pub fn as_array<T: BandPixel>(&self) -> Option<&Array4<T>> {
        T::unwrap(self)
    }

    /// Copy `block` into this array at `(time, y, x)`.
    pub fn paste(&mut self, at: (usize, usize, usize), block: &BandData) -> Result<()> {
        fn put<T: BandPixel>(
            dst: &mut Array4<T>,
            at: (usize, usize, usize),
            block: &BandData,
        ) -> Result<()> {
            let src = T::unwrap(block).ok_or_else(|| {
                LoaderError::execution(format!(
                    "block of {} does not match band of {}",
                    block.dtype(),
                    T::DATA_TYPE
                ))
            })?;
            let (nt, h, w, k) = src.dim();
            let (dt, dh, dw, dk) = dst.dim();
            if at.0 + nt > dt || at.1 + h > dh || at.2 + w > dw || k != dk {
                return Err(LoaderError::execution(format!(
                    "block {:?} at {:?} outside band {:?}",
                    src.dim(),
                    at,
                    dst.dim()
                )));
            }
            dst.slice_mut(s![at.0..at.0 + nt, at.1..at.1 + h, at.2..at.2 + w, ..])
                .assign(src);
            Ok(())
        }
        with_band_data!(self, arr => put(arr, at, block))
    }
}

/// Where a band's pixels live.
#[derive(Debug, Clone)]
pub enum BandStorage {
    InMemory(BandData),
    Lazy(LazyBand),
}

impl BandStorage {
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        match self {
            BandStorage::InMemory(data) => data.shape(),
            BandStorage::Lazy(band) => band.shape,
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            BandStorage::InMemory(data) => data.dtype(),
            BandStorage::Lazy(band) => band.dtype,
        }
    }
}

/// Hands out storage for each output band.
pub trait ArrayAllocator {
    fn allocate(
        &mut self,
        band: &str,
        shape: (usize, usize, usize, usize),
        cfg: &RasterLoadParams,
    ) -> Result<BandStorage>;
}

/// Allocates filled in-memory buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryAllocator;

impl ArrayAllocator for InMemoryAllocator {
    fn allocate(
        &mut self,
        band: &str,
        shape: (usize, usize, usize, usize),
        cfg: &RasterLoadParams,
    ) -> Result<BandStorage> {
        let fill = crate::driver::nodata::initial_fill(cfg);
        tracing::debug!(band = %band, shape = ?shape, dtype = %cfg.dtype, "allocating band");
        Ok(BandStorage::InMemory(BandData::filled(cfg.dtype, shape, fill)))
    }
}

/// Values of a coordinate.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordValues {
    Time(Vec<DateTime<Utc>>),
    Float(Vec<f64>),
    /// A dimensionless coordinate holding only attributes.
    Scalar(i64),
}

impl CoordValues {
    pub fn len(&self) -> usize {
        match self {
            CoordValues::Time(v) => v.len(),
            CoordValues::Float(v) => v.len(),
            CoordValues::Scalar(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Coordinate {
    pub name: String,
    pub dims: Vec<String>,
    pub values: CoordValues,
    pub attrs: IndexMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct DataArray {
    pub name: String,
    pub dims: Vec<String>,
    pub storage: BandStorage,
    pub attrs: IndexMap<String, Value>,
}

impl DataArray {
    /// In-memory pixels, `None` while lazy.
    pub fn data(&self) -> Option<&BandData> {
        match &self.storage {
            BandStorage::InMemory(data) => Some(data),
            BandStorage::Lazy(_) => None,
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self.storage, BandStorage::Lazy(_))
    }
}

/// A loaded (or lazily loadable) mosaic.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub coords: IndexMap<String, Coordinate>,
    pub data_vars: IndexMap<String, DataArray>,
    pub attrs: IndexMap<String, Value>,
    geobox: GeoBox,
    diagnostics: LoadDiagnostics,
}

impl Dataset {
    pub fn geobox(&self) -> &GeoBox {
        &self.geobox
    }

    pub fn band(&self, name: &str) -> Option<&DataArray> {
        self.data_vars.get(name)
    }

    pub fn band_mut(&mut self, name: &str) -> Option<&mut DataArray> {
        self.data_vars.get_mut(name)
    }

    pub fn time(&self) -> &[DateTime<Utc>] {
        match self.coords.get("time").map(|c| &c.values) {
            Some(CoordValues::Time(t)) => t,
            _ => &[],
        }
    }

    /// Reads skipped so far. Lazy bands add to this when computed.
    pub fn read_failures(&self) -> Vec<ReadFailure> {
        self.diagnostics.failures()
    }

    pub fn diagnostics(&self) -> &LoadDiagnostics {
        &self.diagnostics
    }

    pub fn is_lazy(&self) -> bool {
        self.data_vars.values().any(DataArray::is_lazy)
    }

    /// Materialize every lazy band.
    pub fn compute(&self, executor: &LocalExecutor) -> Result<Dataset> {
        let mut out = self.clone();
        for var in out.data_vars.values_mut() {
            if let BandStorage::Lazy(band) = &var.storage {
                let data = executor.compute(band)?;
                var.storage = BandStorage::InMemory(data);
            }
        }
        Ok(out)
    }
}

/// Everything needed to lay out the output besides the pixels.
#[derive(Debug, Clone)]
pub struct DatasetLayout<'a> {
    pub geobox: &'a GeoBox,
    pub timestamps: &'a [DateTime<Utc>],
    /// Band name to load params, in output order.
    pub bands: &'a IndexMap<String, RasterLoadParams>,
    pub units: &'a IndexMap<String, String>,
    /// Sizes of extra dimensions by name.
    pub extra_dims: &'a IndexMap<String, usize>,
    pub extra_coords: &'a [FixedCoord],
}

impl DatasetLayout<'_> {
    /// `(time, y, x, planes)` of `band`.
    pub fn band_shape(&self, cfg: &RasterLoadParams) -> Result<(usize, usize, usize, usize)> {
        let (h, w) = self.geobox.shape();
        let planes = band_planes(cfg, self.extra_dims)?;
        Ok((self.timestamps.len(), h, w, planes))
    }
}

/// Number of planes a band carries: the product of its extra dim sizes.
pub fn band_planes(cfg: &RasterLoadParams, extra_dims: &IndexMap<String, usize>) -> Result<usize> {
    cfg.extra_dims()
        .iter()
        .map(|dim| {
            extra_dims.get(dim).copied().ok_or_else(|| {
                LoaderError::invalid_query(format!("unknown extra dimension '{}'", dim))
            })
        })
        .product()
}

fn spatial_ref(geobox: &GeoBox) -> Coordinate {
    let crs = geobox.crs;
    let [a, b, c, d, e, f] = geobox.affine.coefficients();
    let mut attrs = IndexMap::new();
    attrs.insert("spatial_ref".to_string(), json!(format!("EPSG:{}", crs.epsg())));
    attrs.insert("epsg".to_string(), json!(crs.epsg()));
    attrs.insert(
        "GeoTransform".to_string(),
        json!(format!("{} {} {} {} {} {}", c, a, b, f, d, e)),
    );
    Coordinate {
        name: SPATIAL_REF.to_string(),
        dims: Vec::new(),
        values: CoordValues::Scalar(crs.epsg() as i64),
        attrs,
    }
}

/// Build coordinates and allocate one array per band through `alloc`.
pub fn assemble_dataset(
    layout: &DatasetLayout<'_>,
    diagnostics: LoadDiagnostics,
    alloc: &mut dyn ArrayAllocator,
) -> Result<Dataset> {
    let geobox = layout.geobox;
    let (ydim, xdim) = geobox.crs.dimensions();
    let (yunits, xunits) = if geobox.crs.is_geographic() {
        ("degrees_north", "degrees_east")
    } else {
        ("metre", "metre")
    };

    let mut coords = IndexMap::new();
    let mut add = |name: &str, dims: Vec<String>, values: CoordValues, attrs: IndexMap<String, Value>| {
        coords.insert(
            name.to_string(),
            Coordinate {
                name: name.to_string(),
                dims,
                values,
                attrs,
            },
        );
    };

    add("time", vec!["time".to_string()], CoordValues::Time(layout.timestamps.to_vec()), IndexMap::new());
    add(
        ydim,
        vec![ydim.to_string()],
        CoordValues::Float(geobox.y_coords()),
        IndexMap::from([("units".to_string(), json!(yunits))]),
    );
    add(
        xdim,
        vec![xdim.to_string()],
        CoordValues::Float(geobox.x_coords()),
        IndexMap::from([("units".to_string(), json!(xunits))]),
    );
    for fixed in layout.extra_coords {
        add(
            &fixed.name,
            vec![fixed.dim.clone()],
            CoordValues::Float(fixed.values.clone()),
            IndexMap::from([("units".to_string(), json!(fixed.units))]),
        );
    }
    let sref = spatial_ref(geobox);
    coords.insert(sref.name.clone(), sref);

    let mut data_vars = IndexMap::new();
    for (name, cfg) in layout.bands {
        let shape = layout.band_shape(cfg)?;
        let storage = alloc.allocate(name, shape, cfg)?;

        let mut dims = vec!["time".to_string(), ydim.to_string(), xdim.to_string()];
        dims.extend(cfg.extra_dims().iter().cloned());

        let mut attrs = IndexMap::new();
        attrs.insert("grid_mapping".to_string(), json!(SPATIAL_REF));
        if let Some(units) = layout.units.get(name) {
            attrs.insert("units".to_string(), json!(units));
        }
        if let Some(fill) = cfg.fill_value {
            attrs.insert("nodata".to_string(), json!(fill));
        }

        data_vars.insert(
            name.clone(),
            DataArray {
                name: name.clone(),
                dims,
                storage,
                attrs,
            },
        );
    }

    Ok(Dataset {
        coords,
        data_vars,
        attrs: IndexMap::new(),
        geobox: geobox.clone(),
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mosaic_geo::{Affine, Crs};

    #[test]
    fn test_band_data_filled() {
        let data = BandData::filled(DataType::UInt8, (1, 2, 2, 1), 300.0);
        assert_eq!(data.dtype(), DataType::UInt8);
        assert_eq!(data.get([0, 1, 1, 0]), Some(255.0));
        assert!(data.as_array::<u8>().is_some());
        assert!(data.as_array::<f32>().is_none());
    }

    #[test]
    fn test_assemble_layout() {
        let geobox = GeoBox::new(4, 3, Affine::new(10.0, 100.0, -10.0, 500.0), Crs::from_epsg(32633));
        let times = vec![Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()];
        let mut bands = IndexMap::new();
        bands.insert("red".to_string(), RasterLoadParams::same_as(DataType::UInt16, Some(0.0)));
        bands.insert("nir".to_string(), RasterLoadParams::default());
        let units = IndexMap::from([("red".to_string(), "1".to_string())]);

        let layout = DatasetLayout {
            geobox: &geobox,
            timestamps: &times,
            bands: &bands,
            units: &units,
            extra_dims: &IndexMap::new(),
            extra_coords: &[],
        };
        let ds = assemble_dataset(&layout, LoadDiagnostics::new(), &mut InMemoryAllocator).unwrap();

        let keys: Vec<_> = ds.coords.keys().cloned().collect();
        assert_eq!(keys, vec!["time", "y", "x", "spatial_ref"]);
        assert_eq!(ds.coords["x"].values, CoordValues::Float(vec![105.0, 115.0, 125.0, 135.0]));

        let red = ds.band("red").unwrap();
        assert_eq!(red.storage.shape(), (1, 3, 4, 1));
        assert_eq!(red.attrs["grid_mapping"], json!("spatial_ref"));
        assert_eq!(red.attrs["nodata"], json!(0.0));
        assert!(ds.band("nir").unwrap().attrs.get("nodata").is_none());
        assert!(ds.band("nir").unwrap().data().unwrap().get([0, 0, 0, 0]).unwrap().is_nan());
        assert!(!ds.is_lazy());
    }

    #[test]
    fn test_geographic_names_and_extra_dims() {
        let geobox = GeoBox::new(2, 2, Affine::new(1.0, 0.0, -1.0, 2.0), Crs::WGS84);
        let bands = IndexMap::from([(
            "spectra".to_string(),
            RasterLoadParams {
                dims: vec!["y".into(), "x".into(), "wavelength".into()],
                ..Default::default()
            },
        )]);
        let extra = IndexMap::from([("wavelength".to_string(), 3usize)]);
        let coords = vec![FixedCoord::new("wavelength", vec![0.4, 0.5, 0.6])];
        let layout = DatasetLayout {
            geobox: &geobox,
            timestamps: &[],
            bands: &bands,
            units: &IndexMap::new(),
            extra_dims: &extra,
            extra_coords: &coords,
        };
        let ds = assemble_dataset(&layout, LoadDiagnostics::new(), &mut InMemoryAllocator).unwrap();
        assert!(ds.coords.contains_key("latitude"));
        assert!(ds.coords.contains_key("wavelength"));
        let spectra = ds.band("spectra").unwrap();
        assert_eq!(spectra.dims, vec!["time", "latitude", "longitude", "wavelength"]);
        assert_eq!(spectra.storage.shape(), (0, 2, 2, 3));
    }
}
