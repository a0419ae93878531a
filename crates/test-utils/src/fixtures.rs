//! Catalog fixtures backed by in-memory rasters.
//!
//! A [`MosaicFixture`] owns one collection and a [`MemoryBackend`]. Every
//! item it creates registers its pixels under `mem://{item}/{band}`, so the
//! items load through [`MosaicFixture::driver`] without touching disk.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use indexmap::IndexMap;
use mosaic_geo::{Affine, Crs, GeoBox};
use mosaic_loader::driver::{BackendDriver, MemoryBackend, MemoryRaster};
use mosaic_loader::{
    BandKey, DataType, ParsedItem, RasterBandMetadata, RasterCollectionMetadata, RasterSource,
};
use ndarray::Array2;

/// Common grid definitions for testing.
pub mod grid {
    use super::*;

    /// North-up grid in EPSG:3857 with its top-left corner at `(x0, y0)`.
    pub fn mercator(width: usize, height: usize, res: f64, x0: f64, y0: f64) -> GeoBox {
        GeoBox::new(width, height, Affine::new(res, x0, -res, y0), Crs::WEB_MERCATOR)
    }

    /// North-up lon/lat grid with its top-left corner at `(lon0, lat0)`.
    pub fn geographic(width: usize, height: usize, res: f64, lon0: f64, lat0: f64) -> GeoBox {
        GeoBox::new(width, height, Affine::new(res, lon0, -res, lat0), Crs::WGS84)
    }
}

/// UTC timestamp shorthand.
pub fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .unwrap_or_else(|| panic!("invalid fixture timestamp {year}-{month}-{day} {hour}:{minute}"))
}

/// Band description for a fixture collection.
#[derive(Debug, Clone)]
pub struct FixtureBand {
    pub name: String,
    pub data_type: DataType,
    pub nodata: Option<f64>,
    pub units: String,
}

impl FixtureBand {
    pub fn new(name: &str, data_type: DataType, nodata: Option<f64>) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            nodata,
            units: "1".to_string(),
        }
    }
}

/// One collection plus the in-memory store its items read from.
pub struct MosaicFixture {
    pub backend: MemoryBackend,
    pub collection: Arc<RasterCollectionMetadata>,
}

impl MosaicFixture {
    pub fn new(bands: &[FixtureBand]) -> Self {
        let meta = bands
            .iter()
            .map(|b| {
                (
                    BandKey::new(b.name.clone(), 1),
                    RasterBandMetadata {
                        data_type: b.data_type,
                        nodata: b.nodata,
                        units: b.units.clone(),
                        ..Default::default()
                    },
                )
            })
            .collect();
        Self::with_collection(RasterCollectionMetadata::new("fixture", meta))
    }

    pub fn with_collection(collection: RasterCollectionMetadata) -> Self {
        Self {
            backend: MemoryBackend::new(),
            collection: Arc::new(collection),
        }
    }

    /// Single `float32` band without nodata.
    pub fn single_band(name: &str) -> Self {
        Self::new(&[FixtureBand::new(name, DataType::Float32, None)])
    }

    /// Item whose bands all live on `gbox`; `data` is one array per band,
    /// in collection order. Sources carry `nodata` when given.
    pub fn item(
        &self,
        id: &str,
        datetime: DateTime<Utc>,
        gbox: &GeoBox,
        data: Vec<Array2<f64>>,
        nodata: Option<f64>,
    ) -> ParsedItem {
        assert_eq!(
            data.len(),
            self.collection.bands.len(),
            "one array per collection band"
        );
        let mut sources = IndexMap::new();
        for ((key, meta), pixels) in self.collection.bands.iter().zip(data) {
            let uri = Self::uri(id, &key.asset);
            let mut raster = MemoryRaster::new(gbox.clone(), vec![pixels])
                .unwrap_or_else(|e| panic!("fixture raster {uri}: {e}"));
            if let Some(nd) = nodata {
                raster = raster.with_nodata(nd);
            }
            self.backend.insert(uri.clone(), raster);
            sources.insert(
                key.clone(),
                RasterSource::new(uri)
                    .with_geobox(gbox.clone())
                    .with_meta(meta.clone()),
            );
        }
        ParsedItem::new(id, self.collection.clone(), sources).with_datetime(datetime)
    }

    /// Item pointing at a URI nothing is registered under.
    pub fn unreadable_item(&self, id: &str, datetime: DateTime<Utc>, gbox: &GeoBox) -> ParsedItem {
        let sources = self
            .collection
            .bands
            .keys()
            .map(|key| {
                (
                    key.clone(),
                    RasterSource::new(format!("mem://missing/{}/{}", id, key.asset))
                        .with_geobox(gbox.clone()),
                )
            })
            .collect();
        ParsedItem::new(id, self.collection.clone(), sources).with_datetime(datetime)
    }

    /// Driver reading from this fixture's store.
    pub fn driver(&self) -> BackendDriver<MemoryBackend> {
        BackendDriver::new(self.backend.clone())
    }

    pub fn uri(item: &str, band: &str) -> String {
        format!("mem://{}/{}", item, band)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_registers_rasters() {
        let fx = MosaicFixture::single_band("red");
        let gbox = grid::mercator(4, 4, 10.0, 0.0, 40.0);
        let item = fx.item(
            "a",
            utc(2024, 1, 1, 0, 0),
            &gbox,
            vec![Array2::zeros((4, 4))],
            None,
        );
        assert_eq!(fx.backend.len(), 1);
        assert_eq!(item.resolve_band("red").unwrap().uri, "mem://a/red");
    }
}
