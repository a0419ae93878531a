//! Resampling a source window onto a destination grid.
//!
//! Pixel `(row, col)` covers `[col, col+1) x [row, row+1)` in grid space, so
//! the sample position of a world point is its fractional pixel position
//! minus half a pixel.

use mosaic_geo::GeoBox;
use ndarray::{Array3, ArrayView2, ArrayView3, Axis};

use super::nodata::is_nodata;
use crate::error::Result;
use crate::types::Resampling;

/// Value of the pixel containing `(x, y)`.
fn nearest(data: ArrayView2<'_, f64>, x: f64, y: f64, nodata: Option<f64>) -> Option<f64> {
    let (height, width) = data.dim();
    let col = (x + 0.5).floor();
    let row = (y + 0.5).floor();
    if col < 0.0 || row < 0.0 || col >= width as f64 || row >= height as f64 {
        return None;
    }
    let v = data[[row as usize, col as usize]];
    (!is_nodata(v, nodata)).then_some(v)
}

/// Weighted mean of the four surrounding pixels; missing if any is missing.
fn bilinear(data: ArrayView2<'_, f64>, x: f64, y: f64, nodata: Option<f64>) -> Option<f64> {
    let (height, width) = data.dim();
    if x < -0.5 || y < -0.5 || x > width as f64 - 0.5 || y > height as f64 - 0.5 {
        return None;
    }

    let x = x.clamp(0.0, (width - 1) as f64);
    let y = y.clamp(0.0, (height - 1) as f64);
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let xf = x - x0 as f64;
    let yf = y - y0 as f64;

    let v00 = data[[y0, x0]];
    let v10 = data[[y0, x1]];
    let v01 = data[[y1, x0]];
    let v11 = data[[y1, x1]];
    if [v00, v10, v01, v11].iter().any(|&v| is_nodata(v, nodata)) {
        return None;
    }

    let top = v00 * (1.0 - xf) + v10 * xf;
    let bottom = v01 * (1.0 - xf) + v11 * xf;
    Some(top * (1.0 - yf) + bottom * yf)
}

/// Catmull-Rom over the 4x4 neighbourhood, bilinear when any of it is
/// missing.
fn cubic(data: ArrayView2<'_, f64>, x: f64, y: f64, nodata: Option<f64>) -> Option<f64> {
    let (height, width) = data.dim();
    if x < -0.5 || y < -0.5 || x > width as f64 - 0.5 || y > height as f64 - 0.5 {
        return None;
    }

    let xi = x.floor() as i64;
    let yi = y.floor() as i64;
    let xf = x - xi as f64;
    let yf = y - yi as f64;

    let mut values = [[0.0f64; 4]; 4];
    for (j, row) in values.iter_mut().enumerate() {
        for (i, v) in row.iter_mut().enumerate() {
            let px = (xi + i as i64 - 1).clamp(0, width as i64 - 1) as usize;
            let py = (yi + j as i64 - 1).clamp(0, height as i64 - 1) as usize;
            *v = data[[py, px]];
            if is_nodata(*v, nodata) {
                return bilinear(data, x, y, nodata);
            }
        }
    }

    let cols = values.map(|r| cubic_1d(r[0], r[1], r[2], r[3], xf));
    Some(cubic_1d(cols[0], cols[1], cols[2], cols[3], yf))
}

fn cubic_1d(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;

    let a = -0.5 * p0 + 1.5 * p1 - 1.5 * p2 + 0.5 * p3;
    let b = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
    let c = -0.5 * p0 + 0.5 * p2;
    let d = p1;

    a * t3 + b * t2 + c * t + d
}

/// Resample `src` (on `src_gbox`, shape `(rows, cols, planes)`) onto
/// `dst_gbox`. Pixels without a valid sample get `dst_nodata`.
pub fn reproject(
    src: ArrayView3<'_, f64>,
    src_gbox: &GeoBox,
    src_nodata: Option<f64>,
    dst_gbox: &GeoBox,
    dst_nodata: f64,
    method: Resampling,
) -> Result<Array3<f64>> {
    let planes = src.len_of(Axis(2));
    let (dst_h, dst_w) = dst_gbox.shape();
    let mut out = Array3::from_elem((dst_h, dst_w, planes), dst_nodata);
    if src.is_empty() {
        return Ok(out);
    }

    let sample = match method {
        Resampling::Nearest => nearest,
        Resampling::Bilinear => bilinear,
        Resampling::Cubic => cubic,
    };

    for row in 0..dst_h {
        for col in 0..dst_w {
            let (wx, wy) = dst_gbox.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
            let (sx, sy) = dst_gbox.crs.transform_point(&src_gbox.crs, wx, wy)?;
            let (px, py) = src_gbox.world_to_pixel(sx, sy);

            for k in 0..planes {
                let plane = src.index_axis(Axis(2), k);
                if let Some(v) = sample(plane, px - 0.5, py - 0.5, src_nodata) {
                    out[[row, col, k]] = v;
                }
            }
        }
    }

    Ok(out)
}
