//! Mapping of items onto output cells.

use std::collections::BTreeMap;

use mosaic_geo::GeoboxTiles;

use crate::error::{LoaderError, Result};
use crate::grouping::TimeGroups;
use crate::item::ParsedItem;

/// `(time slice, row, col)` to contributing item indices, in fusion
/// priority order. Cells nothing overlaps are absent.
pub type BinMap = BTreeMap<(usize, usize, usize), Vec<usize>>;

/// Place every grouped item into the cells its footprint overlaps.
pub fn bin_items(
    items: &[ParsedItem],
    groups: &TimeGroups,
    tiles: &GeoboxTiles,
    bands: &[String],
) -> Result<BinMap> {
    let crs = tiles.geobox().crs;

    let cells: Vec<Vec<(usize, usize)>> = items
        .iter()
        .map(|item| {
            let footprint = item.safe_footprint(&crs, bands)?.ok_or_else(|| {
                LoaderError::FootprintMissing {
                    item_id: item.id.clone(),
                }
            })?;
            Ok(tiles.tiles_for_bbox(&footprint.bbox()))
        })
        .collect::<Result<_>>()?;

    let mut bins = BinMap::new();
    for (t, group) in groups.groups.iter().enumerate() {
        for &idx in group {
            for &(row, col) in &cells[idx] {
                bins.entry((t, row, col)).or_default().push(idx);
            }
        }
    }

    tracing::debug!(
        items = items.len(),
        cells = bins.len(),
        grid = ?tiles.shape(),
        "binned items"
    );
    Ok(bins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::RasterCollectionMetadata;
    use chrono::{TimeZone, Utc};
    use indexmap::IndexMap;
    use mosaic_geo::{Affine, BoundingBox, Crs, GeoBox, Geometry};
    use std::sync::Arc;

    fn tiles() -> GeoboxTiles {
        let gbox = GeoBox::new(8, 4, Affine::new(1.0, 0.0, -1.0, 4.0), Crs::WEB_MERCATOR);
        GeoboxTiles::new(gbox, (4, 4)).unwrap()
    }

    fn item(id: &str, bbox: Option<BoundingBox>) -> ParsedItem {
        let md = Arc::new(RasterCollectionMetadata::new("c", IndexMap::new()));
        let mut item = ParsedItem::new(id, md, IndexMap::new())
            .with_datetime(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        if let Some(bbox) = bbox {
            item = item.with_geometry(Geometry::from_bbox(&bbox, Crs::WEB_MERCATOR));
        }
        item
    }

    #[test]
    fn test_bins_follow_group_order() {
        let items = vec![
            item("left", Some(BoundingBox::new(0.0, 0.0, 4.0, 4.0))),
            item("all", Some(BoundingBox::new(0.0, 0.0, 8.0, 4.0))),
            item("outside", Some(BoundingBox::new(20.0, 0.0, 30.0, 4.0))),
        ];
        let groups = TimeGroups {
            groups: vec![vec![1, 0, 2]],
            timestamps: vec![Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()],
        };

        let bins = bin_items(&items, &groups, &tiles(), &[]).unwrap();
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[&(0, 0, 0)], vec![1, 0]);
        assert_eq!(bins[&(0, 0, 1)], vec![1]);
    }

    #[test]
    fn test_missing_footprint_is_fatal() {
        let items = vec![item("ghost", None)];
        let groups = TimeGroups {
            groups: vec![vec![0]],
            timestamps: vec![Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()],
        };
        assert!(matches!(
            bin_items(&items, &groups, &tiles(), &[]),
            Err(LoaderError::FootprintMissing { .. })
        ));
    }

    #[test]
    fn test_lonlat_geometry_bins_onto_utm_grid() {
        // 10 km cells over zone 33N, starting at the central meridian.
        let gbox = GeoBox::new(
            4,
            4,
            Affine::new(10_000.0, 500_000.0, -10_000.0, 40_000.0),
            Crs::from_epsg(32633),
        );
        let tiles = GeoboxTiles::new(gbox, (2, 2)).unwrap();
        let md = Arc::new(RasterCollectionMetadata::new("c", IndexMap::new()));
        let item = ParsedItem::new("east", md, IndexMap::new())
            .with_datetime(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .with_geometry(Geometry::from_bbox(
                &BoundingBox::new(15.2, 0.01, 15.3, 0.3),
                Crs::WGS84,
            ))
            .strip();
        let groups = TimeGroups {
            groups: vec![vec![0]],
            timestamps: vec![Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()],
        };

        let bins = bin_items(&[item], &groups, &tiles, &[]).unwrap();
        // Roughly x 522..534 km, y 1..34 km: the east column of both rows.
        let mut cells: Vec<_> = bins.keys().copied().collect();
        cells.sort();
        assert_eq!(cells, vec![(0, 0, 1), (0, 1, 1)]);
    }
}
