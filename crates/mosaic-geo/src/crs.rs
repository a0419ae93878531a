//! Coordinate Reference System types and utilities.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{GeoError, GeoResult};
use crate::utm::UtmZone;

const EARTH_RADIUS: f64 = 6_378_137.0;
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// Geographic codes that share WGS84 lon/lat axes closely enough to be
/// treated as the same grid space.
const GEOGRAPHIC_CODES: &[u32] = &[4326, 4269, 4258, 4979];

/// A CRS identified by its EPSG code.
///
/// Accepts formats like:
/// - "EPSG:4326"
/// - "epsg:3857"
/// - "CRS:84" / "OGC:CRS84" (WGS84 lon/lat)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs {
    epsg: u32,
}

impl Crs {
    /// WGS84 geographic lon/lat.
    pub const WGS84: Crs = Crs { epsg: 4326 };

    /// Web Mercator.
    pub const WEB_MERCATOR: Crs = Crs { epsg: 3857 };

    pub fn from_epsg(epsg: u32) -> Self {
        Self { epsg }
    }

    /// Parse a CRS string.
    pub fn parse(s: &str) -> GeoResult<Self> {
        let normalized = s.trim().to_uppercase();

        match normalized.as_str() {
            "CRS:84" | "OGC:CRS84" | "WGS84" => return Ok(Self::WGS84),
            "EPSG:900913" => return Ok(Self::WEB_MERCATOR),
            _ => {}
        }

        normalized
            .strip_prefix("EPSG:")
            .and_then(|code| code.parse::<u32>().ok())
            .map(Self::from_epsg)
            .ok_or_else(|| GeoError::UnsupportedCrs(s.to_string()))
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    /// Check if this is a geographic (lat/lon) CRS.
    pub fn is_geographic(&self) -> bool {
        GEOGRAPHIC_CODES.contains(&self.epsg)
    }

    /// Two CRSs describe the same coordinate space.
    pub fn is_equivalent(&self, other: &Crs) -> bool {
        self == other || (self.is_geographic() && other.is_geographic())
    }

    /// Names of the spatial dimensions, y first.
    pub fn dimensions(&self) -> (&'static str, &'static str) {
        if self.is_geographic() {
            ("latitude", "longitude")
        } else {
            ("y", "x")
        }
    }

    /// UTM zone, for EPSG 326zz/327zz codes.
    pub fn utm_zone(&self) -> Option<UtmZone> {
        UtmZone::from_epsg(self.epsg)
    }

    /// Transform a single point into `to`.
    ///
    /// Goes through WGS84 lon/lat, so any pair of geographic, Web Mercator
    /// and UTM codes is supported.
    pub fn transform_point(&self, to: &Crs, x: f64, y: f64) -> GeoResult<(f64, f64)> {
        if self.is_equivalent(to) {
            return Ok((x, y));
        }

        let unsupported = || GeoError::UnsupportedTransform {
            from: self.to_string(),
            to: to.to_string(),
        };
        let (lon, lat) = self.unproject(x, y).ok_or_else(unsupported)?;
        to.project(lon, lat).ok_or_else(unsupported)
    }

    fn unproject(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if self.is_geographic() {
            return Some((x, y));
        }
        match self.epsg {
            3857 => Some(mercator_to_lonlat(x, y)),
            _ => self.utm_zone().map(|zone| zone.inverse(x, y)),
        }
    }

    fn project(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        if self.is_geographic() {
            return Some((lon, lat));
        }
        match self.epsg {
            3857 => Some(lonlat_to_mercator(lon, lat)),
            _ => self.utm_zone().map(|zone| zone.forward(lon, lat)),
        }
    }
}

fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT);
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

impl std::str::FromStr for Crs {
    type Err = GeoError;

    fn from_str(s: &str) -> GeoResult<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Crs {
    type Error = GeoError;

    fn try_from(value: String) -> GeoResult<Self> {
        Self::parse(&value)
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crs() {
        assert_eq!(Crs::parse("EPSG:4326").unwrap(), Crs::WGS84);
        assert_eq!(Crs::parse("epsg:3857").unwrap(), Crs::WEB_MERCATOR);
        assert_eq!(Crs::parse("CRS:84").unwrap(), Crs::WGS84);
        assert_eq!(Crs::parse("EPSG:32633").unwrap().epsg(), 32633);
        assert!(Crs::parse("not-a-crs").is_err());
    }

    #[test]
    fn test_mercator_roundtrip() {
        let (x, y) = Crs::WGS84
            .transform_point(&Crs::WEB_MERCATOR, 10.0, 45.0)
            .unwrap();
        assert!((x - 1_113_194.9).abs() < 1.0);
        let (lon, lat) = Crs::WEB_MERCATOR.transform_point(&Crs::WGS84, x, y).unwrap();
        assert!((lon - 10.0).abs() < 1e-9);
        assert!((lat - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_unsupported_transform() {
        let bng = Crs::from_epsg(27700);
        assert!(matches!(
            bng.transform_point(&Crs::WGS84, 0.0, 0.0),
            Err(GeoError::UnsupportedTransform { .. })
        ));
        assert_eq!(bng.transform_point(&bng, 1.0, 2.0).unwrap(), (1.0, 2.0));
    }

    #[test]
    fn test_utm_through_lonlat() {
        let utm = Crs::from_epsg(32633);
        let (e, n) = Crs::WGS84.transform_point(&utm, 15.0, 0.0).unwrap();
        assert!((e - 500_000.0).abs() < 1e-6);
        assert!(n.abs() < 1e-6);

        // Mercator to UTM and back lands on the same spot.
        let (mx, my) = Crs::WGS84
            .transform_point(&Crs::WEB_MERCATOR, 14.5, 48.2)
            .unwrap();
        let (e, n) = Crs::WEB_MERCATOR.transform_point(&utm, mx, my).unwrap();
        let (lon, lat) = utm.transform_point(&Crs::WGS84, e, n).unwrap();
        assert!((lon - 14.5).abs() < 1e-6);
        assert!((lat - 48.2).abs() < 1e-6);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Crs::WEB_MERCATOR).unwrap();
        assert_eq!(json, "\"EPSG:3857\"");
        let back: Crs = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Crs::WEB_MERCATOR);
    }
}
