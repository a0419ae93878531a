//! Overview level selection.

/// Index of the coarsest overview whose decimation factor does not exceed
/// `read_shrink`. `overviews` are factors, finest first.
pub fn pick_overview(read_shrink: usize, overviews: &[usize]) -> Option<usize> {
    let mut picked = None;
    for (idx, &factor) in overviews.iter().enumerate() {
        if factor > read_shrink {
            break;
        }
        picked = Some(idx);
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_overview() {
        let ovr = [2, 4, 8, 16];
        assert_eq!(pick_overview(1, &ovr), None);
        assert_eq!(pick_overview(2, &ovr), Some(0));
        assert_eq!(pick_overview(3, &ovr), Some(0));
        assert_eq!(pick_overview(8, &ovr), Some(2));
        assert_eq!(pick_overview(100, &ovr), Some(3));
        assert_eq!(pick_overview(4, &[]), None);
    }
}
