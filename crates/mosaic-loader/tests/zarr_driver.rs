//! Loads through the Zarr backend from a temporary local store.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use mosaic_geo::{Affine, Crs, GeoBox};
use mosaic_loader::driver::{LoadContext, ReaderSettings};
use mosaic_loader::{
    load, BackendDriver, BandKey, DataType, LoadOptions, ParsedItem, RasterBandMetadata,
    RasterCollectionMetadata, RasterLoadParams, RasterSource, ReaderDriver, ZarrBackend,
};
use zarrs::array::{ArrayBuilder, DataType as ZarrDataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

/// Value at (row, col) = col * 1000 + row.
fn create_test_data(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// Write one georeferenced float32 array at `array_path`.
fn write_array(
    store: &Arc<FilesystemStore>,
    array_path: &str,
    data: &[f32],
    (height, width): (usize, usize),
    attrs: serde_json::Map<String, serde_json::Value>,
) -> anyhow::Result<()> {
    let array = ArrayBuilder::new(
        vec![height as u64, width as u64],
        ZarrDataType::Float32,
        vec![4u64, 4u64].try_into()?,
        FillValue::from(f32::NAN),
    )
    .attributes(attrs)
    .build(store.clone(), array_path)?;
    array.store_metadata()?;

    let subset = ArraySubset::new_with_start_shape(vec![0, 0], vec![height as u64, width as u64])?;
    array.store_array_subset_elements(&subset, data)?;
    Ok(())
}

fn geo_attrs(res: f64, nodata: Option<f64>) -> serde_json::Map<String, serde_json::Value> {
    let mut attrs = serde_json::Map::new();
    attrs.insert("crs".to_string(), serde_json::json!("EPSG:3857"));
    attrs.insert(
        "transform".to_string(),
        serde_json::json!([res, 0.0, 0.0, 0.0, -res, 80.0]),
    );
    if let Some(nd) = nodata {
        attrs.insert("nodata".to_string(), serde_json::json!(nd));
    }
    attrs
}

fn grid(size: usize, res: f64) -> GeoBox {
    GeoBox::new(size, size, Affine::new(res, 0.0, -res, 80.0), Crs::WEB_MERCATOR)
}

fn create_store(path: &Path) -> anyhow::Result<Arc<FilesystemStore>> {
    std::fs::create_dir_all(path)?;
    Ok(Arc::new(FilesystemStore::new(path)?))
}

fn item_for(uri: &str, subdataset: Option<&str>) -> ParsedItem {
    let meta = RasterBandMetadata {
        data_type: DataType::Float32,
        nodata: Some(-1.0),
        ..Default::default()
    };
    let mut bands = IndexMap::new();
    bands.insert(BandKey::new("temp", 1), meta.clone());
    let collection = Arc::new(RasterCollectionMetadata::new("zarr-test", bands));

    let mut source = RasterSource::new(uri).with_geobox(grid(8, 10.0)).with_meta(meta);
    source.subdataset = subdataset.map(str::to_string);
    let mut sources = IndexMap::new();
    sources.insert(BandKey::new("temp", 1), source);

    let when = chrono::DateTime::parse_from_rfc3339("2024-12-12T00:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    ParsedItem::new("z1", collection, sources).with_datetime(when)
}

#[test]
fn test_load_through_default_registry() -> anyhow::Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let zarr_path = temp_dir.path().join("temp.zarr");
    let store = create_store(&zarr_path)?;

    let mut data = create_test_data(8, 8);
    data[0] = -1.0;
    write_array(&store, "/", &data, (8, 8), geo_attrs(10.0, Some(-1.0)))?;

    let uri = format!("file://{}", zarr_path.display());
    // "zarr" is the default driver name.
    let ds = load(&[item_for(&uri, None)], &LoadOptions::new())?;
    let px = ds.band("temp").and_then(|b| b.data()).unwrap().to_f64();

    assert_eq!(px.dim(), (1, 8, 8, 1));
    assert_eq!(px[[0, 0, 0, 0]], -1.0);
    assert_eq!(px[[0, 2, 3, 0]], 3002.0);
    assert_eq!(px[[0, 7, 7, 0]], 7007.0);
    Ok(())
}

#[test]
fn test_overview_read_for_coarse_grid() -> anyhow::Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let zarr_path = temp_dir.path().join("ovr.zarr");
    let store = create_store(&zarr_path)?;

    let full = create_test_data(8, 8);
    // Every other pixel of the full-resolution array.
    let coarse: Vec<f32> = (0..4)
        .flat_map(|row| (0..4).map(move |col| ((col * 2) * 1000 + row * 2) as f32))
        .collect();

    let mut attrs = geo_attrs(10.0, None);
    attrs.insert(
        "overviews".to_string(),
        serde_json::json!([{"factor": 2, "path": "/temp_ovr2"}]),
    );
    write_array(&store, "/temp", &full, (8, 8), attrs)?;
    write_array(&store, "/temp_ovr2", &coarse, (4, 4), geo_attrs(20.0, None))?;

    let driver = BackendDriver::new(ZarrBackend::with_root(temp_dir.path()));
    let ctx = LoadContext::new(None, ReaderSettings::default());
    let mut src = RasterSource::new("ovr.zarr");
    src.subdataset = Some("/temp".to_string());
    let reader = driver.open(&src, &ctx).unwrap();

    let (roi, px) = reader.read(&RasterLoadParams::default(), &grid(4, 20.0)).unwrap();
    assert_eq!((roi.height(), roi.width()), (4, 4));
    assert_eq!(px[[1, 1, 0]], 2002.0);
    assert_eq!(px[[3, 2, 0]], 4006.0);
    Ok(())
}

#[test]
fn test_missing_store_is_read_error() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let uri = format!("file://{}", temp_dir.path().join("nope.zarr").display());

    let strict = load(&[item_for(&uri, None)], &LoadOptions::new());
    assert!(matches!(strict, Err(mosaic_loader::LoaderError::ReadIo { .. })));

    let lenient = load(&[item_for(&uri, None)], &LoadOptions::new().fail_on_error(false)).unwrap();
    let px = lenient.band("temp").and_then(|b| b.data()).unwrap().to_f64();
    assert!(px.iter().all(|&v| v == -1.0));
    assert_eq!(lenient.read_failures().len(), 1);
}
