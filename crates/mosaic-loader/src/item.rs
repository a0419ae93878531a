//! Item model: per-band sources, parsed items and their construction from
//! already-normalized catalog records.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use mosaic_geo::{Crs, GeoBox, Geometry};
use serde::{Deserialize, Serialize};

use crate::config::{BandConfig, CollectionConfig, ConversionConfig};
use crate::error::{LoaderError, Result};
use crate::metadata::{AliasTieBreak, BandKey, RasterBandMetadata, RasterCollectionMetadata};
use crate::types::DataType;

/// Where to read one band from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterSource {
    pub uri: String,
    /// 1-based band index within the file.
    pub band: u32,
    pub subdataset: Option<String>,
    /// Pixel grid of the file. Planning only; readers never need it.
    pub geobox: Option<GeoBox>,
    pub meta: Option<RasterBandMetadata>,
    /// Opaque payload for the reader driver.
    pub driver_data: Option<serde_json::Value>,
}

impl RasterSource {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            band: 1,
            subdataset: None,
            geobox: None,
            meta: None,
            driver_data: None,
        }
    }

    pub fn with_band(mut self, band: u32) -> Self {
        self.band = band;
        self
    }

    pub fn with_geobox(mut self, geobox: GeoBox) -> Self {
        self.geobox = Some(geobox);
        self
    }

    pub fn with_meta(mut self, meta: RasterBandMetadata) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Copy without planning-only fields.
    pub fn strip(&self) -> RasterSource {
        RasterSource {
            geobox: None,
            ..self.clone()
        }
    }
}

/// One catalog item, ready for loading. Never mutated in place.
#[derive(Debug, Clone)]
pub struct ParsedItem {
    pub id: String,
    pub collection: Arc<RasterCollectionMetadata>,
    pub bands: IndexMap<BandKey, RasterSource>,
    /// Footprint, usually EPSG:4326.
    pub geometry: Option<Geometry>,
    pub datetime: Option<DateTime<Utc>>,
    pub datetime_range: (Option<DateTime<Utc>>, Option<DateTime<Utc>>),
    pub properties: serde_json::Map<String, serde_json::Value>,
    pub href: Option<String>,
}

impl ParsedItem {
    pub fn new(
        id: impl Into<String>,
        collection: Arc<RasterCollectionMetadata>,
        bands: IndexMap<BandKey, RasterSource>,
    ) -> Self {
        Self {
            id: id.into(),
            collection,
            bands,
            geometry: None,
            datetime: None,
            datetime_range: (None, None),
            properties: serde_json::Map::new(),
            href: None,
        }
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_datetime(mut self, datetime: DateTime<Utc>) -> Self {
        self.datetime = Some(datetime);
        self
    }

    /// Copy of this item reading band names through `collection`.
    pub fn with_collection(&self, collection: Arc<RasterCollectionMetadata>) -> ParsedItem {
        ParsedItem {
            collection,
            ..self.clone()
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// datetime, else start_datetime, else end_datetime.
    pub fn nominal_datetime(&self) -> Result<DateTime<Utc>> {
        self.datetime
            .or(self.datetime_range.0)
            .or(self.datetime_range.1)
            .ok_or_else(|| LoaderError::TimestampMissing {
                item_id: self.id.clone(),
            })
    }

    /// Source for a band name or alias, if this item carries it.
    pub fn resolve_band(&self, name: &str) -> Option<&RasterSource> {
        let key = self.collection.band_key(name).ok()?;
        self.bands.get(&key)
    }

    /// Distinct band grids, finest first.
    pub fn geoboxes(&self, bands: &[String]) -> Vec<GeoBox> {
        let mut out: Vec<GeoBox> = Vec::new();
        for name in bands {
            if let Some(gbox) = self.resolve_band(name).and_then(|src| src.geobox.as_ref()) {
                if !out.contains(gbox) {
                    out.push(gbox.clone());
                }
            }
        }
        out.sort_by(|a, b| a.resolution().gsd().total_cmp(&b.resolution().gsd()));
        out
    }

    /// Footprint from the band grids, in `crs`.
    pub fn image_geometry(&self, crs: &Crs, bands: &[String]) -> Result<Option<Geometry>> {
        match self.geoboxes(bands).first() {
            Some(gbox) => Ok(Some(gbox.footprint().to_crs(crs)?)),
            None => Ok(None),
        }
    }

    /// Footprint in `crs`: band grids when known, else the item geometry.
    pub fn safe_footprint(&self, crs: &Crs, bands: &[String]) -> Result<Option<Geometry>> {
        if let Some(geom) = self.image_geometry(crs, bands)? {
            return Ok(Some(geom));
        }
        match &self.geometry {
            Some(geom) => Ok(Some(geom.to_crs(crs)?)),
            None => Ok(None),
        }
    }

    /// Longitude of the footprint centre, for solar-day grouping.
    pub fn mid_longitude(&self) -> Option<f64> {
        let geom = match &self.geometry {
            Some(g) => g.clone(),
            None => self
                .bands
                .values()
                .find_map(|src| src.geobox.as_ref())
                .map(GeoBox::footprint)?,
        };
        let (x, y) = geom.centroid();
        geom.crs
            .transform_point(&Crs::WGS84, x, y)
            .ok()
            .map(|(lon, _)| lon)
    }

    /// Copy with planning-only fields removed from every band.
    pub fn strip(&self) -> ParsedItem {
        ParsedItem {
            bands: self
                .bands
                .iter()
                .map(|(k, src)| (k.clone(), src.strip()))
                .collect(),
            ..self.clone()
        }
    }

    /// Copy with band URIs rewritten by `edit`; only `bands` when given.
    pub fn patch_urls<F>(&self, edit: F, bands: Option<&[String]>) -> Result<ParsedItem>
    where
        F: Fn(&str) -> String,
    {
        let to_edit = match bands {
            Some(names) => Some(
                names
                    .iter()
                    .map(|n| self.collection.band_key(n))
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };

        let bands = self
            .bands
            .iter()
            .map(|(k, src)| {
                let selected = to_edit.as_ref().map_or(true, |keys| keys.contains(k));
                let uri = if selected { edit(&src.uri) } else { src.uri.clone() };
                (k.clone(), RasterSource { uri, ..src.clone() })
            })
            .collect();

        Ok(ParsedItem {
            bands,
            ..self.clone()
        })
    }
}

// ============================================================================
// Construction from catalog records
// ============================================================================

/// One asset of a catalog record, already normalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetRecord {
    pub href: String,
    /// Raster description per band in file order; empty means one band.
    #[serde(default)]
    pub bands: Vec<BandConfig>,
    /// Common name per band in file order (eo extension).
    #[serde(default)]
    pub common_names: Vec<Option<String>>,
    /// Pixel grid (projection extension).
    #[serde(default)]
    pub geobox: Option<GeoBox>,
    #[serde(default)]
    pub gsd: Option<f64>,
    #[serde(default)]
    pub subdataset: Option<String>,
    #[serde(default)]
    pub driver_data: Option<serde_json::Value>,
}

impl AssetRecord {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            ..Default::default()
        }
    }

    fn band_count(&self) -> usize {
        self.bands.len().max(1)
    }
}

/// An already-normalized catalog item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: String,
    #[serde(default)]
    pub collection_id: Option<String>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub assets: IndexMap<String, AssetRecord>,
    #[serde(default)]
    pub href: Option<String>,
}

const UNNAMED_COLLECTION: &str = "_";

/// Turns records into items, building collection metadata once per
/// collection id.
pub struct ItemParser {
    config: ConversionConfig,
    tie_break: AliasTieBreak,
    cache: HashMap<String, (Arc<RasterCollectionMetadata>, CollectionConfig)>,
}

impl ItemParser {
    pub fn new(config: ConversionConfig) -> Self {
        Self {
            config,
            tie_break: AliasTieBreak::default(),
            cache: HashMap::new(),
        }
    }

    pub fn with_tie_break(mut self, tie_break: AliasTieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Cached metadata for a collection, if one of its items was seen.
    pub fn collection(&self, collection_id: &str) -> Option<Arc<RasterCollectionMetadata>> {
        self.cache.get(collection_id).map(|(md, _)| md.clone())
    }

    pub fn parse_all<'a, I>(&mut self, records: I) -> Result<Vec<ParsedItem>>
    where
        I: IntoIterator<Item = &'a ItemRecord>,
    {
        records.into_iter().map(|r| self.parse(r)).collect()
    }

    pub fn parse(&mut self, record: &ItemRecord) -> Result<ParsedItem> {
        let collection_id = record
            .collection_id
            .clone()
            .unwrap_or_else(|| UNNAMED_COLLECTION.to_string());

        let (md, cfg) = match self.cache.get(&collection_id) {
            Some(entry) => entry.clone(),
            None => {
                let cfg = self.config.for_collection(&collection_id);
                let md = Arc::new(self.collection_metadata(&collection_id, record, &cfg)?);
                tracing::debug!(
                    collection = %collection_id,
                    bands = md.bands.len(),
                    aliases = md.aliases.len(),
                    "built collection metadata"
                );
                self.cache
                    .insert(collection_id.clone(), (md.clone(), cfg.clone()));
                (md, cfg)
            }
        };

        parse_item(record, md, &cfg)
    }

    fn collection_metadata(
        &self,
        collection_id: &str,
        sample: &ItemRecord,
        cfg: &CollectionConfig,
    ) -> Result<RasterCollectionMetadata> {
        if sample.assets.is_empty() {
            return Err(LoaderError::band_resolution(format!(
                "item '{}' has no raster assets",
                sample.id
            )));
        }

        let mut bands = IndexMap::new();
        for (name, asset) in &sample.assets {
            for idx in 0..asset.band_count() {
                bands.insert(
                    BandKey::new(name, idx as u32 + 1),
                    band_metadata(name, asset, idx, cfg),
                );
            }
        }

        let mut md = RasterCollectionMetadata::new(collection_id, bands);
        md.alias_tie_break = self.tie_break;
        md.aliases = alias_map(sample);
        for (alias, target) in &cfg.aliases {
            let key = BandKey::parse_dotted(target)
                .filter(|k| md.bands.contains_key(k))
                .unwrap_or_else(|| BandKey::new(target, 1));
            if !md.bands.contains_key(&key) {
                return Err(LoaderError::Config(format!(
                    "alias '{}' points at unknown band '{}'",
                    alias, target
                )));
            }
            md.aliases.insert(alias.clone(), vec![key]);
        }

        md.has_proj = !cfg.ignore_proj && sample.assets.values().any(|a| a.geobox.is_some());
        md.band2grid = if md.has_proj {
            band2grid_from_geoboxes(sample)?
        } else {
            band2grid_from_gsd(sample)
        };

        Ok(md)
    }
}

/// explicit config > raster description > `*` config > global defaults.
fn band_metadata(
    asset_name: &str,
    asset: &AssetRecord,
    idx: usize,
    cfg: &CollectionConfig,
) -> RasterBandMetadata {
    let described = asset.bands.get(idx).cloned().unwrap_or_default();
    cfg.asset(asset_name)
        .or(&described)
        .or(&cfg.wildcard())
        .resolve()
}

/// Common names that map to exactly one band.
fn alias_map(sample: &ItemRecord) -> IndexMap<String, Vec<BandKey>> {
    let mut candidates: IndexMap<String, Vec<BandKey>> = IndexMap::new();
    for (name, asset) in &sample.assets {
        for (idx, common) in asset.common_names.iter().enumerate() {
            if let Some(common) = common {
                candidates
                    .entry(common.clone())
                    .or_default()
                    .push(BandKey::new(name, idx as u32 + 1));
            }
        }
    }

    candidates.retain(|common, keys| {
        if keys.len() > 1 {
            tracing::warn!(common_name = %common, item = %sample.id, "non-unique common name ignored");
            return false;
        }
        true
    });
    candidates
}

fn gsd_name(gsd: f64) -> String {
    format!("g{}", gsd)
}

/// Group assets by identical grid: the most populous (then finest) is
/// `default`, the rest are named by their GSD.
fn band2grid_from_geoboxes(sample: &ItemRecord) -> Result<IndexMap<String, String>> {
    let mut grids: Vec<(GeoBox, Vec<String>)> = Vec::new();
    for (name, asset) in &sample.assets {
        let Some(gbox) = &asset.geobox else {
            continue;
        };
        match grids.iter_mut().find(|(g, _)| g == gbox) {
            Some((_, names)) => names.push(name.clone()),
            None => grids.push((gbox.clone(), vec![name.clone()])),
        }
    }

    if let Some((first, _)) = grids.first() {
        if let Some((other, _)) = grids.iter().find(|(g, _)| g.crs != first.crs) {
            return Err(LoaderError::conflicting(format!(
                "item '{}' mixes grids in {} and {}",
                sample.id, first.crs, other.crs
            )));
        }
    }

    let default_idx = grids
        .iter()
        .enumerate()
        .min_by(|(_, (ga, na)), (_, (gb, nb))| {
            nb.len()
                .cmp(&na.len())
                .then(ga.resolution().gsd().total_cmp(&gb.resolution().gsd()))
        })
        .map(|(i, _)| i);

    let mut band2grid = IndexMap::new();
    let mut used = Vec::new();
    for (i, (gbox, names)) in grids.iter().enumerate() {
        let grid_name = if Some(i) == default_idx {
            "default".to_string()
        } else {
            gsd_name(gbox.resolution().gsd())
        };
        if used.contains(&grid_name) {
            return Err(LoaderError::conflicting(format!(
                "item '{}' has two different grids named '{}'",
                sample.id, grid_name
            )));
        }
        for name in names {
            band2grid.insert(name.clone(), grid_name.clone());
        }
        used.push(grid_name);
    }

    Ok(band2grid)
}

/// Without grids, assets with equal GSD are assumed to share one.
fn band2grid_from_gsd(sample: &ItemRecord) -> IndexMap<String, String> {
    let mut groups: Vec<(f64, Vec<String>)> = Vec::new();
    for (name, asset) in &sample.assets {
        let gsd = asset.gsd.unwrap_or(0.0);
        match groups.iter_mut().find(|(g, _)| *g == gsd) {
            Some((_, names)) => names.push(name.clone()),
            None => groups.push((gsd, vec![name.clone()])),
        }
    }

    let default_gsd = groups
        .iter()
        .min_by(|(ga, na), (gb, nb)| nb.len().cmp(&na.len()).then(ga.total_cmp(gb)))
        .map(|(g, _)| *g);

    let mut band2grid = IndexMap::new();
    for (gsd, names) in &groups {
        let grid_name = if Some(*gsd) == default_gsd {
            "default".to_string()
        } else {
            gsd_name(*gsd)
        };
        for name in names {
            band2grid.insert(name.clone(), grid_name.clone());
        }
    }
    band2grid
}

fn parse_item(
    record: &ItemRecord,
    md: Arc<RasterCollectionMetadata>,
    cfg: &CollectionConfig,
) -> Result<ParsedItem> {
    let mut grids: HashMap<String, GeoBox> = HashMap::new();
    let mut bands = IndexMap::new();

    for (key, meta) in &md.bands {
        let Some(asset) = record.assets.get(&key.asset) else {
            tracing::warn!(item = %record.id, asset = %key.asset, "missing asset");
            continue;
        };

        let idx = key.index as usize - 1;
        if idx >= asset.band_count() {
            return Err(LoaderError::conflicting(format!(
                "item '{}' asset '{}' has {} band(s), collection expects band {}",
                record.id,
                key.asset,
                asset.band_count(),
                key.index
            )));
        }

        let own = band_metadata(&key.asset, asset, idx, cfg);
        if !own.same_structure(meta) {
            return Err(LoaderError::conflicting(format!(
                "band {} of item '{}' is {:?}, collection '{}' has {:?}",
                key, record.id, own, md.name, meta
            )));
        }

        let geobox = match (&asset.geobox, md.has_proj) {
            (Some(gbox), true) => {
                let grid_name = md.grid_of(&key.asset).to_string();
                match grids.get(&grid_name) {
                    Some(shared) if shared != gbox => {
                        return Err(LoaderError::conflicting(format!(
                            "item '{}': asset '{}' disagrees with grid '{}'",
                            record.id, key.asset, grid_name
                        )));
                    }
                    Some(_) => {}
                    None => {
                        grids.insert(grid_name, gbox.clone());
                    }
                }
                Some(gbox.clone())
            }
            _ => None,
        };

        bands.insert(
            key.clone(),
            RasterSource {
                uri: asset.href.clone(),
                band: key.index,
                subdataset: asset.subdataset.clone(),
                geobox,
                meta: Some(meta.clone()),
                driver_data: asset.driver_data.clone(),
            },
        );
    }

    Ok(ParsedItem {
        id: record.id.clone(),
        collection: md,
        bands,
        geometry: record.geometry.clone(),
        datetime: record.datetime,
        datetime_range: (record.start_datetime, record.end_datetime),
        properties: record.properties.clone(),
        href: record.href.clone(),
    })
}

// ============================================================================
// Schema inference
// ============================================================================

/// What a schema is inferred from.
#[derive(Debug, Clone, Copy)]
pub enum SchemaSource<'a> {
    Item(&'a ParsedItem),
    Collection(&'a RasterCollectionMetadata),
}

/// Description of one band as it would appear in a loaded dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandSchema {
    pub name: String,
    pub data_type: DataType,
    pub nodata: Option<f64>,
    pub units: String,
    pub dims: Vec<String>,
}

/// Bands of an item (those it actually carries) or of a whole collection.
pub fn infer_schema(source: SchemaSource<'_>) -> Vec<BandSchema> {
    let (md, present): (&RasterCollectionMetadata, Option<&IndexMap<BandKey, RasterSource>>) =
        match source {
            SchemaSource::Item(item) => (&item.collection, Some(&item.bands)),
            SchemaSource::Collection(md) => (md, None),
        };

    md.bands
        .iter()
        .filter(|(key, _)| present.map_or(true, |bands| bands.contains_key(*key)))
        .map(|(key, meta)| BandSchema {
            name: md.canonical_name(key),
            data_type: meta.data_type,
            nodata: meta.nodata,
            units: meta.units.clone(),
            dims: meta.dims.clone(),
        })
        .collect()
}
