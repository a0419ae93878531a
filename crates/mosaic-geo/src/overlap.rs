//! Source/destination window computation for a read.
//!
//! Given the grid a raster is stored on and the grid we want pixels on,
//! work out which part of each is involved, whether a straight windowed
//! copy is enough, and how much the source may be decimated.

use serde::{Deserialize, Serialize};

use crate::error::GeoResult;
use crate::{GeoBox, Roi};

/// Scale differences below this are treated as identical pixel sizes.
const SCALE_EPS: f64 = 1e-6;

/// Outcome of [`compute_reproject_roi`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReprojectInfo {
    /// Window of the source grid that needs reading.
    pub roi_src: Roi,
    /// Window of the destination grid that receives pixels.
    pub roi_dst: Roi,
    /// Source and destination are pixel-aligned: copy without resampling.
    pub paste_ok: bool,
    /// Integer decimation factor the source can be read at.
    pub read_shrink: usize,
    /// Destination pixel size in source pixels, `(x, y)`.
    pub scale: (f64, f64),
}

impl ReprojectInfo {
    fn empty(scale: (f64, f64)) -> Self {
        Self {
            roi_src: Roi::empty(),
            roi_dst: Roi::empty(),
            paste_ok: false,
            read_shrink: 1,
            scale,
        }
    }
}

/// Compute the read plan from `src` onto `dst`.
///
/// `tolerance` is the largest sub-pixel translation (in source pixels) for
/// which a direct paste is still allowed.
pub fn compute_reproject_roi(src: &GeoBox, dst: &GeoBox, tolerance: f64) -> GeoResult<ReprojectInfo> {
    if src.crs.is_equivalent(&dst.crs) {
        Ok(same_crs_roi(src, dst, tolerance))
    } else {
        cross_crs_roi(src, dst)
    }
}

fn same_crs_roi(src: &GeoBox, dst: &GeoBox, tolerance: f64) -> ReprojectInfo {
    let scale = (dst.affine.sx / src.affine.sx, dst.affine.sy / src.affine.sy);

    let roi_dst = dst.bbox_to_roi(&src.extent());
    if roi_dst.is_empty() {
        return ReprojectInfo::empty(scale);
    }

    let unit_scale = (scale.0 - 1.0).abs() < SCALE_EPS && (scale.1 - 1.0).abs() < SCALE_EPS;
    if unit_scale {
        // Offset of the destination origin in source pixels.
        let (col_off, row_off) = src.world_to_pixel(dst.affine.tx, dst.affine.ty);
        let aligned = (col_off - col_off.round()).abs() <= tolerance
            && (row_off - row_off.round()).abs() <= tolerance;

        if aligned {
            let col_off = col_off.round() as i64;
            let row_off = row_off.round() as i64;
            return paste_windows(src, roi_dst, row_off, col_off, scale);
        }
    }

    let roi_src = src.bbox_to_roi(&dst.slice(&roi_dst).extent());
    if roi_src.is_empty() {
        return ReprojectInfo::empty(scale);
    }

    ReprojectInfo {
        roi_src,
        roi_dst,
        paste_ok: false,
        read_shrink: shrink_factor(scale),
        scale,
    }
}

/// Map a destination window onto the source by integer offset, clipping
/// both so they stay the same shape.
fn paste_windows(
    src: &GeoBox,
    roi_dst: Roi,
    row_off: i64,
    col_off: i64,
    scale: (f64, f64),
) -> ReprojectInfo {
    let clip = |start: usize, end: usize, off: i64, limit: usize| -> Option<(usize, usize, usize)> {
        let s = (start as i64 + off).max(0);
        let e = (end as i64 + off).min(limit as i64);
        if s >= e {
            return None;
        }
        // Returns (dst_start, src_start, len).
        Some(((s - off) as usize, s as usize, (e - s) as usize))
    };

    let rows = clip(roi_dst.row_start, roi_dst.row_end, row_off, src.height);
    let cols = clip(roi_dst.col_start, roi_dst.col_end, col_off, src.width);

    match (rows, cols) {
        (Some((dr, sr, h)), Some((dc, sc, w))) => ReprojectInfo {
            roi_src: Roi::new(sr, sr + h, sc, sc + w),
            roi_dst: Roi::new(dr, dr + h, dc, dc + w),
            paste_ok: true,
            read_shrink: 1,
            scale,
        },
        _ => ReprojectInfo::empty(scale),
    }
}

fn cross_crs_roi(src: &GeoBox, dst: &GeoBox) -> GeoResult<ReprojectInfo> {
    let dst_in_src = dst.footprint().to_crs(&src.crs)?.bbox();
    let src_in_dst = src.footprint().to_crs(&dst.crs)?.bbox();

    let scale = local_scale(src, dst)?;
    let roi_src = src.bbox_to_roi(&dst_in_src);
    let roi_dst = dst.bbox_to_roi(&src_in_dst);
    if roi_src.is_empty() || roi_dst.is_empty() {
        return Ok(ReprojectInfo::empty(scale));
    }

    Ok(ReprojectInfo {
        roi_src,
        roi_dst,
        paste_ok: false,
        read_shrink: shrink_factor(scale),
        scale,
    })
}

/// Size of one destination pixel near the grid centre, in source pixels.
fn local_scale(src: &GeoBox, dst: &GeoBox) -> GeoResult<(f64, f64)> {
    let cc = dst.width as f64 / 2.0;
    let cr = dst.height as f64 / 2.0;
    let to_src = |col: f64, row: f64| -> GeoResult<(f64, f64)> {
        let (x, y) = dst.pixel_to_world(col, row);
        let (sx, sy) = dst.crs.transform_point(&src.crs, x, y)?;
        Ok(src.world_to_pixel(sx, sy))
    };

    let origin = to_src(cc, cr)?;
    let right = to_src(cc + 1.0, cr)?;
    let down = to_src(cc, cr + 1.0)?;
    let sx = ((right.0 - origin.0).powi(2) + (right.1 - origin.1).powi(2)).sqrt();
    let sy = ((down.0 - origin.0).powi(2) + (down.1 - origin.1).powi(2)).sqrt();
    Ok((sx, sy))
}

fn shrink_factor(scale: (f64, f64)) -> usize {
    let s = scale.0.abs().min(scale.1.abs());
    (s + SCALE_EPS).floor().max(1.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Affine, BoundingBox, Crs, Resolution};

    fn utm(width: usize, height: usize, res: f64, tx: f64, ty: f64) -> GeoBox {
        GeoBox::new(width, height, Affine::new(res, tx, -res, ty), Crs::from_epsg(32633))
    }

    #[test]
    fn test_aligned_paste() {
        let src = utm(10, 10, 1.0, 0.0, 10.0);
        let dst = utm(4, 4, 1.0, 8.0, 10.0);
        let rr = compute_reproject_roi(&src, &dst, 0.05).unwrap();
        assert!(rr.paste_ok);
        assert_eq!(rr.read_shrink, 1);
        assert_eq!(rr.roi_dst, Roi::new(0, 4, 0, 2));
        assert_eq!(rr.roi_src, Roi::new(0, 4, 8, 10));
    }

    #[test]
    fn test_sub_pixel_shift_depends_on_tolerance() {
        let src = utm(10, 10, 1.0, 0.0, 10.0);
        let dst = utm(4, 4, 1.0, 2.5, 8.0);

        let strict = compute_reproject_roi(&src, &dst, 0.05).unwrap();
        assert!(!strict.paste_ok);

        let loose = compute_reproject_roi(&src, &dst, 0.9).unwrap();
        assert!(loose.paste_ok);
        assert_eq!(loose.roi_src.shape(), loose.roi_dst.shape());
    }

    #[test]
    fn test_coarser_destination_shrinks() {
        let src = utm(100, 100, 1.0, 0.0, 100.0);
        let dst = GeoBox::from_bbox(
            &BoundingBox::new(0.0, 0.0, 100.0, 100.0),
            Crs::from_epsg(32633),
            Resolution::square(4.0),
        )
        .unwrap();
        let rr = compute_reproject_roi(&src, &dst, 0.05).unwrap();
        assert!(!rr.paste_ok);
        assert_eq!(rr.read_shrink, 4);
        assert_eq!(rr.roi_src, Roi::full((100, 100)));
        assert_eq!(rr.roi_dst, Roi::full((25, 25)));
    }

    #[test]
    fn test_disjoint_grids_are_empty() {
        let src = utm(10, 10, 1.0, 0.0, 10.0);
        let dst = utm(4, 4, 1.0, 50.0, 10.0);
        let rr = compute_reproject_roi(&src, &dst, 0.9).unwrap();
        assert!(rr.roi_dst.is_empty());
        assert!(rr.roi_src.is_empty());
    }

    #[test]
    fn test_cross_crs() {
        let src = GeoBox::from_bbox(
            &BoundingBox::new(-10.0, -10.0, 10.0, 10.0),
            Crs::WGS84,
            Resolution::square(0.1),
        )
        .unwrap();
        let dst = GeoBox::from_bbox(
            &BoundingBox::new(0.0, 0.0, 500_000.0, 500_000.0),
            Crs::WEB_MERCATOR,
            Resolution::square(10_000.0),
        )
        .unwrap();
        let rr = compute_reproject_roi(&src, &dst, 0.05).unwrap();
        assert!(!rr.paste_ok);
        assert!(!rr.roi_src.is_empty());
        assert_eq!(rr.roi_dst, Roi::full(dst.shape()));
        assert!(rr.read_shrink >= 1);
    }
}
