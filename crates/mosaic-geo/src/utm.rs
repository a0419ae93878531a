//! Universal Transverse Mercator on the WGS84 ellipsoid.
//!
//! Zones are addressed by their EPSG codes: `326zz` north, `327zz` south,
//! `zz` in `1..=60`. Forward and inverse use the series expansions from
//! Snyder, *Map Projections: A Working Manual* (USGS PP 1395), which stay
//! within a millimetre inside a zone and degrade slowly a few degrees
//! outside it.

const A: f64 = 6_378_137.0;
const FLATTENING: f64 = 1.0 / 298.257_223_563;
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// One UTM zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtmZone {
    pub zone: u8,
    pub north: bool,
}

impl UtmZone {
    /// Zone for an EPSG code, `None` outside 32601..=32660 and 32701..=32760.
    pub fn from_epsg(epsg: u32) -> Option<Self> {
        let (north, zone) = match epsg {
            32601..=32660 => (true, epsg - 32600),
            32701..=32760 => (false, epsg - 32700),
            _ => return None,
        };
        Some(Self {
            zone: zone as u8,
            north,
        })
    }

    /// Central meridian in degrees.
    pub fn central_meridian(&self) -> f64 {
        f64::from(self.zone) * 6.0 - 183.0
    }

    fn false_northing(&self) -> f64 {
        if self.north {
            0.0
        } else {
            FALSE_NORTHING_SOUTH
        }
    }

    /// Degrees lon/lat to easting/northing in metres.
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let e2 = eccentricity_squared();
        let ep2 = e2 / (1.0 - e2);

        let phi = lat.to_radians();
        let (sin_phi, cos_phi) = phi.sin_cos();
        let tan_phi = phi.tan();

        let n = A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
        let t = tan_phi * tan_phi;
        let c = ep2 * cos_phi * cos_phi;
        let a = (lon - self.central_meridian()).to_radians() * cos_phi;
        let m = meridian_arc(phi, e2);

        let x = K0
            * n
            * (a + (1.0 - t + c) * a.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0);
        let y = K0
            * (m + n
                * tan_phi
                * (a * a / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));

        (FALSE_EASTING + x, self.false_northing() + y)
    }

    /// Easting/northing in metres to degrees lon/lat.
    pub fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let e2 = eccentricity_squared();
        let ep2 = e2 / (1.0 - e2);
        let e4 = e2 * e2;
        let e6 = e4 * e2;

        let x = easting - FALSE_EASTING;
        let m = (northing - self.false_northing()) / K0;
        let mu = m / (A * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

        let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());
        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let (sin1, cos1) = phi1.sin_cos();
        let tan1 = phi1.tan();
        let c1 = ep2 * cos1 * cos1;
        let t1 = tan1 * tan1;
        let w = 1.0 - e2 * sin1 * sin1;
        let n1 = A / w.sqrt();
        let r1 = A * (1.0 - e2) / w.powf(1.5);
        let d = x / (n1 * K0);

        let phi = phi1
            - (n1 * tan1 / r1)
                * (d * d / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);
        let dlon = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
                / 120.0)
            / cos1;

        (self.central_meridian() + dlon.to_degrees(), phi.to_degrees())
    }
}

fn eccentricity_squared() -> f64 {
    FLATTENING * (2.0 - FLATTENING)
}

/// Distance along the central meridian from the equator to `phi`.
fn meridian_arc(phi: f64, e2: f64) -> f64 {
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    A * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
        - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}
