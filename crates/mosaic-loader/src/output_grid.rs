//! Choice of the output pixel grid.

use mosaic_geo::{BoundingBox, Crs, GeoBox, Geometry, Resolution};

use crate::error::{LoaderError, Result};
use crate::item::ParsedItem;

/// Geospatial part of a load request.
///
/// `geobox` or `like` fix the grid outright. Otherwise the grid is built
/// from `crs`, `resolution` and an extent given by one of `geopolygon`,
/// `bbox` (lon/lat), `lon` + `lat` ranges or `x` + `y` ranges in `crs`.
#[derive(Debug, Clone, Default)]
pub struct GeoQuery {
    pub geobox: Option<GeoBox>,
    /// Grid of a previous result to match.
    pub like: Option<GeoBox>,
    pub crs: Option<Crs>,
    pub resolution: Option<Resolution>,
    /// `(left, bottom, right, top)` in EPSG:4326.
    pub bbox: Option<BoundingBox>,
    pub lon: Option<(f64, f64)>,
    pub lat: Option<(f64, f64)>,
    pub x: Option<(f64, f64)>,
    pub y: Option<(f64, f64)>,
    pub geopolygon: Option<Geometry>,
}

impl GeoQuery {
    pub fn with_geobox(geobox: GeoBox) -> Self {
        Self {
            geobox: Some(geobox),
            ..Default::default()
        }
    }

    pub fn crs(mut self, crs: Crs) -> Self {
        self.crs = Some(crs);
        self
    }

    pub fn resolution(mut self, resolution: f64) -> Self {
        self.resolution = Some(Resolution::square(resolution));
        self
    }

    pub fn bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn geopolygon(mut self, geometry: Geometry) -> Self {
        self.geopolygon = Some(geometry);
        self
    }

    fn has_grid_args(&self) -> bool {
        self.crs.is_some()
            || self.resolution.is_some()
            || self.bbox.is_some()
            || self.lon.is_some()
            || self.lat.is_some()
            || self.x.is_some()
            || self.y.is_some()
            || self.geopolygon.is_some()
    }

    /// Requested extent in `crs`, if any was given.
    pub fn extent(&self, crs: &Crs) -> Result<Option<BoundingBox>> {
        if let Some(geom) = &self.geopolygon {
            return Ok(Some(geom.to_crs(crs)?.bbox()));
        }

        let lonlat = match (self.bbox, self.lon, self.lat) {
            (Some(bbox), _, _) => Some(bbox),
            (None, Some(lon), Some(lat)) => Some(range_box(lon, lat)),
            _ => None,
        };
        if let Some(bbox) = lonlat {
            let geom = Geometry::from_bbox(&bbox, Crs::WGS84).to_crs(crs)?;
            return Ok(Some(geom.bbox()));
        }

        match (self.x, self.y) {
            (Some(x), Some(y)) => Ok(Some(range_box(x, y))),
            (None, None) => Ok(None),
            _ => Err(LoaderError::invalid_query(
                "x and y ranges must be given together",
            )),
        }
    }
}

fn range_box(x: (f64, f64), y: (f64, f64)) -> BoundingBox {
    BoundingBox::new(x.0.min(x.1), y.0.min(y.1), x.0.max(x.1), y.0.max(y.1))
}

/// Resolve the output grid for `items`, considering only `bands`.
pub fn output_geobox(items: &[ParsedItem], bands: &[String], query: &GeoQuery) -> Result<GeoBox> {
    if let Some(gbox) = query.geobox.as_ref().or(query.like.as_ref()) {
        if query.has_grid_args() {
            tracing::warn!("explicit output grid given, ignoring other geospatial arguments");
        }
        return Ok(gbox.clone());
    }

    let crs = match query.crs {
        Some(crs) => crs,
        None => items
            .iter()
            .find_map(|item| item.geoboxes(bands).first().map(|g| g.crs))
            .ok_or_else(|| {
                LoaderError::grid_resolution("no item has grid information, supply a CRS")
            })?,
    };

    let resolution = match query.resolution {
        Some(res) => res,
        None => items
            .iter()
            .find_map(|item| {
                item.geoboxes(bands)
                    .first()
                    .map(|g| Resolution::square(g.resolution().gsd()))
            })
            .ok_or_else(|| {
                LoaderError::grid_resolution("no item has grid information, supply a resolution")
            })?,
    };

    let extent = match query.extent(&crs)? {
        Some(bbox) => bbox,
        None => items_extent(items, bands, &crs)?,
    };

    let gbox = GeoBox::from_bbox(&extent, crs, resolution)
        .map_err(|e| LoaderError::grid_resolution(e.to_string()))?;

    tracing::debug!(
        crs = %gbox.crs,
        width = gbox.width,
        height = gbox.height,
        resolution = resolution.gsd(),
        "resolved output grid"
    );
    Ok(gbox)
}

/// Union of the footprints of every item, in `crs`.
fn items_extent(items: &[ParsedItem], bands: &[String], crs: &Crs) -> Result<BoundingBox> {
    let mut extent: Option<BoundingBox> = None;
    for item in items {
        let footprint = item
            .safe_footprint(crs, bands)?
            .ok_or_else(|| LoaderError::FootprintMissing {
                item_id: item.id.clone(),
            })?;
        let bbox = footprint.bbox();
        extent = Some(match extent {
            Some(acc) => acc.union(&bbox),
            None => bbox,
        });
    }
    extent.ok_or_else(|| LoaderError::grid_resolution("cannot determine extent of zero items"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{BandKey, RasterBandMetadata, RasterCollectionMetadata};
    use crate::item::RasterSource;
    use indexmap::IndexMap;
    use mosaic_geo::Affine;
    use std::sync::Arc;

    fn utm() -> Crs {
        Crs::from_epsg(32633)
    }

    fn item(id: &str, x0: f64, with_grid: bool) -> ParsedItem {
        let mut bands = IndexMap::new();
        bands.insert(BandKey::new("B04", 1), RasterBandMetadata::default());
        bands.insert(BandKey::new("B11", 1), RasterBandMetadata::default());
        let md = Arc::new(RasterCollectionMetadata::new("s2", bands));

        let mut srcs = IndexMap::new();
        let mut b04 = RasterSource::new(format!("mem://{}/B04", id));
        let mut b11 = RasterSource::new(format!("mem://{}/B11", id));
        if with_grid {
            b04 = b04.with_geobox(GeoBox::new(10, 10, Affine::new(10.0, x0, -10.0, 100.0), utm()));
            b11 = b11.with_geobox(GeoBox::new(5, 5, Affine::new(20.0, x0, -20.0, 100.0), utm()));
        }
        srcs.insert(BandKey::new("B04", 1), b04);
        srcs.insert(BandKey::new("B11", 1), b11);
        ParsedItem::new(id, md, srcs)
    }

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_from_items() {
        let items = vec![item("a", 0.0, true), item("b", 100.0, true)];
        let gbox = output_geobox(&items, &names(&["B04", "B11"]), &GeoQuery::default()).unwrap();
        assert_eq!(gbox.crs, utm());
        assert_eq!(gbox.resolution(), Resolution::square(10.0));
        assert_eq!(gbox.extent(), BoundingBox::new(0.0, 0.0, 200.0, 100.0));
        assert_eq!(gbox.shape(), (10, 20));

        let coarse = output_geobox(&items, &names(&["B11"]), &GeoQuery::default()).unwrap();
        assert_eq!(coarse.resolution(), Resolution::square(20.0));
    }

    #[test]
    fn test_explicit_grid_wins() {
        let items = vec![item("a", 0.0, true)];
        let fixed = GeoBox::new(3, 3, Affine::new(1.0, 0.0, -1.0, 3.0), utm());
        let query = GeoQuery::with_geobox(fixed.clone()).resolution(60.0);
        assert_eq!(output_geobox(&items, &names(&["B04"]), &query).unwrap(), fixed);

        let like = GeoQuery {
            like: Some(fixed.clone()),
            ..Default::default()
        };
        assert_eq!(output_geobox(&items, &names(&["B04"]), &like).unwrap(), fixed);
    }

    #[test]
    fn test_explicit_extent_replaces_union() {
        let items = vec![item("a", 0.0, true), item("b", 100.0, true)];
        let query = GeoQuery {
            x: Some((50.0, 150.0)),
            y: Some((0.0, 100.0)),
            ..Default::default()
        };
        let gbox = output_geobox(&items, &names(&["B04"]), &query).unwrap();
        assert_eq!(gbox.extent(), BoundingBox::new(50.0, 0.0, 150.0, 100.0));
    }

    #[test]
    fn test_missing_grid_information() {
        let items = vec![item("a", 0.0, false)];
        let err = output_geobox(&items, &names(&["B04"]), &GeoQuery::default()).unwrap_err();
        assert!(matches!(err, LoaderError::GridResolution(_)));

        let err = output_geobox(&items, &names(&["B04"]), &GeoQuery::default().crs(utm()))
            .unwrap_err();
        assert!(matches!(err, LoaderError::GridResolution(_)));
    }

    #[test]
    fn test_unpaired_ranges_rejected() {
        let query = GeoQuery {
            x: Some((0.0, 1.0)),
            ..Default::default()
        };
        assert!(matches!(
            query.extent(&utm()),
            Err(LoaderError::InvalidQuery(_))
        ));
    }
}
