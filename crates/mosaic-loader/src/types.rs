//! Core value types: pixel data types, resampling and per-band load params.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use num_traits::AsPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::LoaderError;

/// Pixel data type of a band, on disk or in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    #[default]
    Float32,
    Float64,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UInt8 => "uint8",
            Self::Int8 => "int8",
            Self::UInt16 => "uint16",
            Self::Int16 => "int16",
            Self::UInt32 => "uint32",
            Self::Int32 => "int32",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Size of one element in bytes.
    pub fn itemsize(&self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 => 1,
            Self::UInt16 | Self::Int16 => 2,
            Self::UInt32 | Self::Int32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }
}

impl FromStr for DataType {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uint8" | "u8" => Ok(Self::UInt8),
            "int8" | "i8" => Ok(Self::Int8),
            "uint16" | "u16" => Ok(Self::UInt16),
            "int16" | "i16" => Ok(Self::Int16),
            "uint32" | "u32" => Ok(Self::UInt32),
            "int32" | "i32" => Ok(Self::Int32),
            "float32" | "f32" => Ok(Self::Float32),
            "float64" | "f64" => Ok(Self::Float64),
            other => Err(LoaderError::Config(format!("unknown data type '{}'", other))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An element type an output band can be stored as.
///
/// Readers hand back `f64` samples; conversion to the output type happens
/// once, when pixels are written into the destination cell.
pub trait Pixel:
    Copy + Send + Sync + Default + PartialEq + fmt::Debug + AsPrimitive<f64> + 'static
{
    const DATA_TYPE: DataType;

    fn from_f64(v: f64) -> Self;

    fn to_f64(self) -> f64 {
        self.as_()
    }
}

macro_rules! impl_int_pixel {
    ($($t:ty => $dt:ident),* $(,)?) => {
        $(
            impl Pixel for $t {
                const DATA_TYPE: DataType = DataType::$dt;

                fn from_f64(v: f64) -> Self {
                    // Saturating; NaN becomes 0.
                    v.round() as $t
                }
            }
        )*
    };
}

impl_int_pixel!(
    u8 => UInt8,
    i8 => Int8,
    u16 => UInt16,
    i16 => Int16,
    u32 => UInt32,
    i32 => Int32,
);

impl Pixel for f32 {
    const DATA_TYPE: DataType = DataType::Float32;

    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl Pixel for f64 {
    const DATA_TYPE: DataType = DataType::Float64;

    fn from_f64(v: f64) -> Self {
        v
    }
}

/// Resampling method used when pixels cannot be pasted directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    /// Nearest neighbour (preserves exact values).
    #[default]
    Nearest,
    /// Bilinear interpolation.
    Bilinear,
    /// Bicubic (Catmull-Rom) interpolation.
    Cubic,
}

impl Resampling {
    pub fn is_nearest(&self) -> bool {
        matches!(self, Self::Nearest)
    }
}

impl FromStr for Resampling {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "bilinear" => Ok(Self::Bilinear),
            "cubic" | "bicubic" => Ok(Self::Cubic),
            other => Err(LoaderError::Config(format!(
                "unknown resampling method '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Resampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => write!(f, "nearest"),
            Self::Bilinear => write!(f, "bilinear"),
            Self::Cubic => write!(f, "cubic"),
        }
    }
}

/// A setting given once for all bands or per band with a `*` fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum PerBand<T> {
    All(T),
    Map(HashMap<String, T>),
}

impl<T: Clone> PerBand<T> {
    /// Value for `band`: exact entry, then `*`, then `None`.
    pub fn get(&self, band: &str) -> Option<T> {
        match self {
            Self::All(v) => Some(v.clone()),
            Self::Map(m) => m.get(band).or_else(|| m.get("*")).cloned(),
        }
    }

    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<String>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl<T> From<T> for PerBand<T> {
    fn from(value: T) -> Self {
        Self::All(value)
    }
}

/// How one output band is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterLoadParams {
    /// Output data type.
    pub dtype: DataType,
    /// Value written where no source has data. Also the output nodata.
    pub fill_value: Option<f64>,
    /// Source nodata used when the file declares none.
    pub src_nodata_fallback: Option<f64>,
    /// Source nodata that replaces whatever the file declares.
    pub src_nodata_override: Option<f64>,
    pub use_overviews: bool,
    pub resampling: Resampling,
    pub fail_on_error: bool,
    /// Dimension names, `["y", "x"]` unless the band carries extra axes.
    pub dims: Vec<String>,
}

impl Default for RasterLoadParams {
    fn default() -> Self {
        Self {
            dtype: DataType::Float32,
            fill_value: None,
            src_nodata_fallback: None,
            src_nodata_override: None,
            use_overviews: true,
            resampling: Resampling::Nearest,
            fail_on_error: true,
            dims: vec!["y".to_string(), "x".to_string()],
        }
    }
}

impl RasterLoadParams {
    /// Nearest-neighbour params for `dtype`, nodata both ways.
    pub fn same_as(dtype: DataType, nodata: Option<f64>) -> Self {
        Self {
            dtype,
            fill_value: nodata,
            src_nodata_fallback: nodata,
            ..Self::default()
        }
    }

    pub fn nearest(&self) -> bool {
        self.resampling.is_nearest()
    }

    /// Dimensions after the two spatial ones.
    pub fn extra_dims(&self) -> &[String] {
        if self.dims.len() > 2 {
            &self.dims[2..]
        } else {
            &[]
        }
    }
}
