//! Nodata bookkeeping shared by readers and fusion.

use ndarray::{Array3, ArrayView3};

use crate::types::{DataType, RasterLoadParams};

/// Source nodata: override, else what the file declares, else fallback.
pub fn resolve_src_nodata(file_nodata: Option<f64>, cfg: &RasterLoadParams) -> Option<f64> {
    cfg.src_nodata_override
        .or(file_nodata)
        .or(cfg.src_nodata_fallback)
}

/// Destination nodata: fill value, else NaN for floats, else source nodata.
pub fn resolve_dst_nodata(
    dtype: DataType,
    fill_value: Option<f64>,
    src_nodata: Option<f64>,
) -> Option<f64> {
    fill_value
        .or_else(|| dtype.is_float().then_some(f64::NAN))
        .or(src_nodata)
}

/// Equality with NaN equal to NaN.
pub fn same_nodata(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b || (a.is_nan() && b.is_nan()),
        _ => false,
    }
}

/// Whether `v` is missing under `nodata`. NaN is always missing.
#[inline]
pub fn is_nodata(v: f64, nodata: Option<f64>) -> bool {
    v.is_nan() || nodata.is_some_and(|n| v == n)
}

pub fn nodata_mask(pix: ArrayView3<'_, f64>, nodata: Option<f64>) -> Array3<bool> {
    pix.map(|&v| is_nodata(v, nodata))
}

/// Value a destination cell starts out with.
pub fn initial_fill(cfg: &RasterLoadParams) -> f64 {
    match cfg.fill_value {
        Some(v) => v,
        None if cfg.dtype.is_float() => f64::NAN,
        None => 0.0,
    }
}

/// Marker fusion uses to find pixels still unfilled. `None` means only
/// NaN counts, which for integer outputs is nothing.
pub fn fusion_nodata(cfg: &RasterLoadParams) -> Option<f64> {
    cfg.fill_value
        .or(cfg.src_nodata_override)
        .or(cfg.src_nodata_fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_src_nodata_precedence() {
        let mut cfg = RasterLoadParams::default();
        assert_eq!(resolve_src_nodata(Some(0.0), &cfg), Some(0.0));
        cfg.src_nodata_fallback = Some(-1.0);
        assert_eq!(resolve_src_nodata(None, &cfg), Some(-1.0));
        assert_eq!(resolve_src_nodata(Some(0.0), &cfg), Some(0.0));
        cfg.src_nodata_override = Some(9.0);
        assert_eq!(resolve_src_nodata(Some(0.0), &cfg), Some(9.0));
    }

    #[test]
    fn test_dst_nodata_precedence() {
        assert_eq!(resolve_dst_nodata(DataType::UInt8, Some(5.0), Some(0.0)), Some(5.0));
        assert!(resolve_dst_nodata(DataType::Float32, None, Some(0.0))
            .unwrap()
            .is_nan());
        assert_eq!(resolve_dst_nodata(DataType::Int16, None, Some(-9.0)), Some(-9.0));
        assert_eq!(resolve_dst_nodata(DataType::Int16, None, None), None);
    }

    #[test]
    fn test_same_nodata_nan_aware() {
        assert!(same_nodata(Some(f64::NAN), Some(f64::NAN)));
        assert!(same_nodata(None, None));
        assert!(!same_nodata(Some(0.0), None));
        assert!(!same_nodata(Some(0.0), Some(1.0)));
    }

    #[test]
    fn test_nodata_mask() {
        let pix = array![[[0.0], [1.0]], [[f64::NAN], [2.0]]];
        let mask = nodata_mask(pix.view(), Some(0.0));
        assert_eq!(mask, array![[[true], [false]], [[true], [false]]]);
    }

    #[test]
    fn test_initial_fill() {
        let mut cfg = RasterLoadParams::default();
        assert!(initial_fill(&cfg).is_nan());
        cfg.dtype = DataType::UInt16;
        assert_eq!(initial_fill(&cfg), 0.0);
        cfg.fill_value = Some(7.0);
        assert_eq!(initial_fill(&cfg), 7.0);
    }
}
