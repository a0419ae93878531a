//! Band and collection metadata: band keys, aliases and name resolution.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{LoaderError, Result};
use crate::types::DataType;

/// `(asset name, 1-based band index within the asset)`.
///
/// Serialized as `"asset.N"` so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct BandKey {
    pub asset: String,
    pub index: u32,
}

impl BandKey {
    pub fn new(asset: impl Into<String>, index: u32) -> Self {
        Self {
            asset: asset.into(),
            index,
        }
    }

    /// Parse `"asset.N"`. Returns `None` when there is no numeric suffix.
    pub fn parse_dotted(name: &str) -> Option<Self> {
        let (asset, idx) = name.rsplit_once('.')?;
        let index = idx.parse::<u32>().ok()?;
        if asset.is_empty() || index == 0 {
            return None;
        }
        Some(Self::new(asset, index))
    }
}

impl fmt::Display for BandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.asset, self.index)
    }
}

impl From<BandKey> for String {
    fn from(key: BandKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for BandKey {
    type Error = LoaderError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse_dotted(&value)
            .ok_or_else(|| LoaderError::band_resolution(format!("malformed band key '{}'", value)))
    }
}

/// Per-band description shared by every item of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterBandMetadata {
    pub data_type: DataType,
    pub nodata: Option<f64>,
    pub units: String,
    /// Dimension names; `["y", "x"]` for ordinary 2-D bands.
    pub dims: Vec<String>,
}

impl Default for RasterBandMetadata {
    fn default() -> Self {
        Self {
            data_type: DataType::Float32,
            nodata: None,
            units: "1".to_string(),
            dims: vec!["y".to_string(), "x".to_string()],
        }
    }
}

impl RasterBandMetadata {
    /// Extra dimensions beyond `y, x`.
    pub fn extra_dims(&self) -> &[String] {
        if self.dims.len() > 2 {
            &self.dims[2..]
        } else {
            &[]
        }
    }

    /// Structural equality with NaN nodata treated as equal.
    pub fn same_structure(&self, other: &RasterBandMetadata) -> bool {
        let nodata_eq = match (self.nodata, other.nodata) {
            (Some(a), Some(b)) => a == b || (a.is_nan() && b.is_nan()),
            (None, None) => true,
            _ => false,
        };
        nodata_eq
            && self.data_type == other.data_type
            && self.units == other.units
            && self.dims == other.dims
    }
}

/// A fixed, non-spatial coordinate axis (e.g. wavelength).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedCoord {
    pub name: String,
    pub values: Vec<f64>,
    pub dim: String,
    pub units: String,
}

impl FixedCoord {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        let name = name.into();
        Self {
            dim: name.clone(),
            name,
            values,
            units: "1".to_string(),
        }
    }
}

/// Rule for picking among several bands that share one alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasTieBreak {
    /// First candidate in registration order.
    #[default]
    First,
    /// Smallest `(asset, index)`.
    Lowest,
}

impl FromStr for AliasTieBreak {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "first" => Ok(Self::First),
            "lowest" => Ok(Self::Lowest),
            other => Err(LoaderError::Config(format!(
                "unknown alias tie-break '{}'",
                other
            ))),
        }
    }
}

/// Which bands a load asks for.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BandQuery {
    /// Every band of the collection, by canonical name.
    #[default]
    All,
    One(String),
    Many(Vec<String>),
}

impl From<&str> for BandQuery {
    fn from(name: &str) -> Self {
        Self::One(name.to_string())
    }
}

impl From<String> for BandQuery {
    fn from(name: String) -> Self {
        Self::One(name)
    }
}

impl<S: Into<String>> From<Vec<S>> for BandQuery {
    fn from(names: Vec<S>) -> Self {
        Self::Many(names.into_iter().map(Into::into).collect())
    }
}

/// Metadata shared by every item in one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterCollectionMetadata {
    pub name: String,
    pub bands: IndexMap<BandKey, RasterBandMetadata>,
    /// Alias to candidate bands, in registration order.
    pub aliases: IndexMap<String, Vec<BandKey>>,
    /// Sizes of extra dimensions, e.g. `wavelength -> 3`.
    pub extra_dims: IndexMap<String, usize>,
    pub extra_coords: Vec<FixedCoord>,
    /// Asset name to grid name; `"default"` is the most common grid.
    pub band2grid: IndexMap<String, String>,
    /// Whether per-band grids may be used for planning.
    pub has_proj: bool,
    #[serde(default)]
    pub alias_tie_break: AliasTieBreak,
}

impl RasterCollectionMetadata {
    pub fn new(name: impl Into<String>, bands: IndexMap<BandKey, RasterBandMetadata>) -> Self {
        Self {
            name: name.into(),
            bands,
            aliases: IndexMap::new(),
            extra_dims: IndexMap::new(),
            extra_coords: Vec::new(),
            band2grid: IndexMap::new(),
            has_proj: true,
            alias_tie_break: AliasTieBreak::default(),
        }
    }

    pub fn with_aliases(mut self, aliases: IndexMap<String, Vec<BandKey>>) -> Self {
        self.aliases = aliases;
        self
    }

    /// Resolve a band name or alias to its key.
    ///
    /// Exact `(name, 1)` wins; then the alias table; then an explicit
    /// `asset.N` suffix.
    pub fn band_key(&self, name: &str) -> Result<BandKey> {
        let exact = BandKey::new(name, 1);
        if self.bands.contains_key(&exact) {
            return Ok(exact);
        }

        if let Some(candidates) = self.aliases.get(name) {
            return self.pick_alias(name, candidates);
        }

        if let Some(key) = BandKey::parse_dotted(name) {
            if self.bands.contains_key(&key) {
                return Ok(key);
            }
        }

        Err(LoaderError::band_resolution(format!(
            "no band named '{}' in collection '{}'",
            name, self.name
        )))
    }

    fn pick_alias(&self, alias: &str, candidates: &[BandKey]) -> Result<BandKey> {
        let picked = match self.alias_tie_break {
            AliasTieBreak::First => candidates.first(),
            AliasTieBreak::Lowest => candidates.iter().min(),
        }
        .cloned()
        .ok_or_else(|| {
            LoaderError::band_resolution(format!(
                "alias '{}' in collection '{}' has no bands",
                alias, self.name
            ))
        })?;

        if candidates.len() > 1 {
            tracing::warn!(
                alias = %alias,
                collection = %self.name,
                candidates = ?candidates.iter().map(ToString::to_string).collect::<Vec<_>>(),
                picked = %picked,
                "ambiguous band alias"
            );
        }

        Ok(picked)
    }

    /// Preferred name for a band: a one-to-one alias, else `asset.N` for
    /// multi-band assets, else the bare asset name.
    pub fn canonical_name(&self, key: &BandKey) -> String {
        let one_to_one = self
            .aliases
            .iter()
            .find(|(_, candidates)| candidates.len() == 1 && candidates[0] == *key);
        if let Some((alias, _)) = one_to_one {
            return alias.clone();
        }

        let multi_band = key.index > 1 || self.bands.contains_key(&BandKey::new(&key.asset, 2));
        if multi_band {
            key.to_string()
        } else {
            key.asset.clone()
        }
    }

    /// Canonical form of any accepted band name.
    pub fn canonical(&self, name: &str) -> Result<String> {
        Ok(self.canonical_name(&self.band_key(name)?))
    }

    /// Canonical names of every band, in declaration order.
    pub fn all_bands(&self) -> Vec<String> {
        self.bands.keys().map(|k| self.canonical_name(k)).collect()
    }

    /// Expand a band query into a list of names. No deduplication.
    pub fn normalize_band_query(&self, query: &BandQuery) -> Vec<String> {
        match query {
            BandQuery::All => self.all_bands(),
            BandQuery::One(name) => vec![name.clone()],
            BandQuery::Many(names) => names.clone(),
        }
    }

    /// Requested name to `(key, metadata)`, in request order.
    pub fn resolve_bands(
        &self,
        query: &BandQuery,
    ) -> Result<IndexMap<String, (BandKey, RasterBandMetadata)>> {
        let mut out = IndexMap::new();
        for name in self.normalize_band_query(query) {
            let key = self.band_key(&name)?;
            let meta = self
                .bands
                .get(&key)
                .cloned()
                .ok_or_else(|| LoaderError::band_resolution(format!("no metadata for {}", key)))?;
            out.insert(name, (key, meta));
        }
        Ok(out)
    }

    /// Grid name of an asset, `"default"` when unknown.
    pub fn grid_of(&self, asset: &str) -> &str {
        self.band2grid
            .get(asset)
            .map(String::as_str)
            .unwrap_or("default")
    }
}
