//! 2x downsampling for building overview levels.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::nodata::is_nodata;

/// How a 2x2 block becomes one overview pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownsampleMethod {
    /// Average of valid pixels - continuous data.
    #[default]
    Mean,
    /// Maximum of valid pixels - preserves peaks.
    Max,
    /// Top-left pixel - categorical data.
    Nearest,
}

/// Halve both dimensions, rounding up; edge blocks use what exists.
///
/// Blocks with no valid pixel become `nodata` (NaN when unset).
pub fn downsample_2x(
    data: ArrayView2<'_, f64>,
    nodata: Option<f64>,
    method: DownsampleMethod,
) -> Array2<f64> {
    let (height, width) = data.dim();
    let out_h = height.div_ceil(2);
    let out_w = width.div_ceil(2);
    let missing = nodata.unwrap_or(f64::NAN);

    Array2::from_shape_fn((out_h, out_w), |(r, c)| {
        let r0 = r * 2;
        let c0 = c * 2;
        let block = data.slice(ndarray::s![r0..(r0 + 2).min(height), c0..(c0 + 2).min(width)]);

        if method == DownsampleMethod::Nearest {
            return block[[0, 0]];
        }

        let valid = block.iter().copied().filter(|&v| !is_nodata(v, nodata));
        let result = match method {
            DownsampleMethod::Mean => {
                let (sum, count) = valid.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                (count > 0).then(|| sum / count as f64)
            }
            DownsampleMethod::Max => valid.fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |a| a.max(v)))
            }),
            DownsampleMethod::Nearest => None,
        };
        result.unwrap_or(missing)
    })
}

/// Overview levels with factors 2, 4, 8, ... until either side would drop
/// below `min_dimension`.
pub fn build_overviews(
    data: ArrayView2<'_, f64>,
    nodata: Option<f64>,
    method: DownsampleMethod,
    min_dimension: usize,
) -> Vec<(usize, Array2<f64>)> {
    let mut levels = Vec::new();
    let mut current = data.to_owned();
    let mut factor = 1;

    loop {
        let (h, w) = current.dim();
        if h.div_ceil(2) < min_dimension || w.div_ceil(2) < min_dimension || h < 2 || w < 2 {
            break;
        }
        current = downsample_2x(current.view(), nodata, method);
        factor *= 2;
        levels.push((factor, current.clone()));
    }

    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_downsample_mean() {
        let data = array![[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]];
        let out = downsample_2x(data.view(), None, DownsampleMethod::Mean);
        assert_eq!(out, array![[3.5, 5.5]]);
    }

    #[test]
    fn test_downsample_skips_nodata() {
        let data = array![[0.0, 2.0], [0.0, 4.0]];
        let out = downsample_2x(data.view(), Some(0.0), DownsampleMethod::Mean);
        assert_eq!(out[[0, 0]], 3.0);

        let empty = array![[0.0, 0.0], [0.0, 0.0]];
        let out = downsample_2x(empty.view(), Some(0.0), DownsampleMethod::Max);
        assert_eq!(out[[0, 0]], 0.0);
    }

    #[test]
    fn test_downsample_odd_edges() {
        let data = array![[1.0, 2.0, 9.0], [3.0, 4.0, 9.0], [7.0, 7.0, 1.0]];
        let out = downsample_2x(data.view(), None, DownsampleMethod::Max);
        assert_eq!(out, array![[4.0, 9.0], [7.0, 1.0]]);

        let nearest = downsample_2x(data.view(), None, DownsampleMethod::Nearest);
        assert_eq!(nearest, array![[1.0, 9.0], [7.0, 1.0]]);
    }

    #[test]
    fn test_build_overviews() {
        let data = Array2::<f64>::ones((16, 16));
        let levels = build_overviews(data.view(), None, DownsampleMethod::Mean, 2);
        let factors: Vec<_> = levels.iter().map(|(f, _)| *f).collect();
        assert_eq!(factors, vec![2, 4, 8]);
        assert_eq!(levels[2].1.dim(), (2, 2));
    }
}
