//! Configuration for the loader.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LoaderError, Result};
use crate::metadata::{AliasTieBreak, RasterBandMetadata};
use crate::types::DataType;

/// Largest sub-pixel shift tolerated for a direct paste with nearest resampling.
pub const PASTE_TOLERANCE_NEAREST: f64 = 0.9;

/// Largest sub-pixel shift tolerated for a direct paste with any other resampling.
pub const PASTE_TOLERANCE_RESAMPLED: f64 = 0.05;

/// Default cell size for the direct strategy.
pub const DEFAULT_CHUNK_FOR_LOAD: usize = 2048;

/// Process-wide loader defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Cell edge in pixels for the direct strategy.
    pub chunk_size: usize,

    /// Worker threads for the direct strategy.
    pub pool_size: usize,

    /// Abort on the first failed read instead of logging and continuing.
    pub fail_on_error: bool,

    /// Read from overviews when the output is coarser than the source.
    pub use_overviews: bool,

    pub paste_tolerance_nearest: f64,

    pub paste_tolerance_resampled: f64,

    /// Overrides the collection's own alias rule when set.
    pub alias_tie_break: Option<AliasTieBreak>,

    /// Target bytes per block when lazy chunk sizes are `auto`.
    pub lazy_chunk_bytes: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_FOR_LOAD,
            pool_size: 1,
            fail_on_error: true,
            use_overviews: true,
            paste_tolerance_nearest: PASTE_TOLERANCE_NEAREST,
            paste_tolerance_resampled: PASTE_TOLERANCE_RESAMPLED,
            alias_tie_break: None,
            lazy_chunk_bytes: 128 * 1024 * 1024,
        }
    }
}

impl LoaderConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MOSAIC_CHUNK_SIZE") {
            if let Ok(size) = val.parse() {
                config.chunk_size = size;
            }
        }

        if let Ok(val) = std::env::var("MOSAIC_POOL_SIZE") {
            if let Ok(size) = val.parse() {
                config.pool_size = size;
            }
        }

        if let Ok(val) = std::env::var("MOSAIC_FAIL_ON_ERROR") {
            config.fail_on_error = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("MOSAIC_USE_OVERVIEWS") {
            config.use_overviews = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("MOSAIC_PASTE_TOLERANCE_NEAREST") {
            if let Ok(tol) = val.parse() {
                config.paste_tolerance_nearest = tol;
            }
        }

        if let Ok(val) = std::env::var("MOSAIC_PASTE_TOLERANCE_RESAMPLED") {
            if let Ok(tol) = val.parse() {
                config.paste_tolerance_resampled = tol;
            }
        }

        if let Ok(val) = std::env::var("MOSAIC_ALIAS_TIE_BREAK") {
            if let Ok(rule) = val.parse() {
                config.alias_tie_break = Some(rule);
            }
        }

        config
    }

    /// Load a `.env` file into the process environment, then read it.
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::from_path(path.as_ref()).map_err(|e| LoaderError::Config(e.to_string()))?;
        Ok(Self::from_env())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be > 0".to_string());
        }

        if self.pool_size == 0 {
            return Err("pool_size must be > 0".to_string());
        }

        for (name, tol) in [
            ("paste_tolerance_nearest", self.paste_tolerance_nearest),
            ("paste_tolerance_resampled", self.paste_tolerance_resampled),
        ] {
            if !(0.0..1.0).contains(&tol) {
                return Err(format!("{} must be in [0, 1), got {}", name, tol));
            }
        }

        if self.lazy_chunk_bytes == 0 {
            return Err("lazy_chunk_bytes must be > 0".to_string());
        }

        Ok(())
    }
}

fn parse_flag(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}

// ============================================================================
// Per-collection band configuration
// ============================================================================

/// Partial band description. Unset fields fall through to the next source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandConfig {
    #[serde(default)]
    pub data_type: Option<DataType>,
    #[serde(default)]
    pub nodata: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub dims: Option<Vec<String>>,
}

impl BandConfig {
    /// Field-wise: keep ours, fill gaps from `fallback`.
    pub fn or(&self, fallback: &BandConfig) -> BandConfig {
        BandConfig {
            data_type: self.data_type.or(fallback.data_type),
            nodata: self.nodata.or(fallback.nodata),
            unit: self.unit.clone().or_else(|| fallback.unit.clone()),
            dims: self.dims.clone().or_else(|| fallback.dims.clone()),
        }
    }

    /// Fill whatever is still unset from the global defaults.
    pub fn resolve(&self) -> RasterBandMetadata {
        let defaults = RasterBandMetadata::default();
        RasterBandMetadata {
            data_type: self.data_type.unwrap_or(defaults.data_type),
            nodata: self.nodata,
            units: self.unit.clone().unwrap_or(defaults.units),
            dims: self.dims.clone().unwrap_or(defaults.dims),
        }
    }
}

/// Band configuration for one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Asset name (or `*`) to band description.
    #[serde(default)]
    pub assets: BTreeMap<String, BandConfig>,

    /// Alias to `asset` or `asset.N`.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,

    /// Ignore per-band grids when planning.
    #[serde(default)]
    pub ignore_proj: bool,
}

impl CollectionConfig {
    /// Key-by-key override of `base` with our entries.
    fn merged_over(&self, base: &CollectionConfig) -> CollectionConfig {
        let mut assets = base.assets.clone();
        assets.extend(self.assets.clone());
        let mut aliases = base.aliases.clone();
        aliases.extend(self.aliases.clone());
        CollectionConfig {
            assets,
            aliases,
            ignore_proj: self.ignore_proj || base.ignore_proj,
        }
    }

    /// Explicit config for `asset`, without wildcard.
    pub fn asset(&self, asset: &str) -> BandConfig {
        self.assets.get(asset).cloned().unwrap_or_default()
    }

    /// The `*` wildcard config.
    pub fn wildcard(&self) -> BandConfig {
        self.asset("*")
    }
}

/// Collection id (or `*`) to collection config, typically loaded from YAML.
///
/// ```yaml
/// "*":
///   assets:
///     "*": {data_type: uint16, nodata: 0}
/// sentinel-2-l2a:
///   assets:
///     SCL: {data_type: uint8}
///   aliases:
///     red: B04
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversionConfig(pub BTreeMap<String, CollectionConfig>);

impl ConversionConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| LoaderError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Effective config for a collection: `*` entry overridden by the named one.
    pub fn for_collection(&self, collection_id: &str) -> CollectionConfig {
        let base = self.0.get("*").cloned().unwrap_or_default();
        match self.0.get(collection_id) {
            Some(specific) => specific.merged_over(&base),
            None => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();
        assert_eq!(config.chunk_size, 2048);
        assert_eq!(config.pool_size, 1);
        assert!(config.fail_on_error);
        assert_eq!(config.paste_tolerance_nearest, 0.9);
        assert_eq!(config.paste_tolerance_resampled, 0.05);
        assert!(config.alias_tie_break.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = LoaderConfig::default();
        config.chunk_size = 0;
        assert!(config.validate().is_err());

        config = LoaderConfig::default();
        config.pool_size = 0;
        assert!(config.validate().is_err());

        config = LoaderConfig::default();
        config.paste_tolerance_nearest = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_conversion_config_yaml() {
        let yaml = r#"
"*":
  assets:
    "*": {data_type: uint16, nodata: 0}
  aliases:
    red: B04
s2:
  assets:
    SCL: {data_type: uint8}
  aliases:
    nir: B08
  ignore_proj: true
"#;
        let cfg = ConversionConfig::from_yaml_str(yaml).unwrap();
        let s2 = cfg.for_collection("s2");
        assert_eq!(s2.asset("SCL").data_type, Some(DataType::UInt8));
        assert_eq!(s2.wildcard().nodata, Some(0.0));
        assert_eq!(s2.aliases.get("red").map(String::as_str), Some("B04"));
        assert_eq!(s2.aliases.get("nir").map(String::as_str), Some("B08"));
        assert!(s2.ignore_proj);

        let other = cfg.for_collection("landsat");
        assert!(other.aliases.get("nir").is_none());
        assert!(!other.ignore_proj);
    }

    #[test]
    fn test_band_config_cascade() {
        let explicit = BandConfig {
            nodata: Some(-1.0),
            ..Default::default()
        };
        let described = BandConfig {
            data_type: Some(DataType::Int16),
            nodata: Some(0.0),
            ..Default::default()
        };
        let wildcard = BandConfig {
            unit: Some("m".to_string()),
            data_type: Some(DataType::UInt8),
            ..Default::default()
        };

        let meta = explicit.or(&described).or(&wildcard).resolve();
        assert_eq!(meta.nodata, Some(-1.0));
        assert_eq!(meta.data_type, DataType::Int16);
        assert_eq!(meta.units, "m");
        assert_eq!(meta.dims, vec!["y", "x"]);

        let fallback = BandConfig::default().resolve();
        assert_eq!(fallback, RasterBandMetadata::default());
    }
}
