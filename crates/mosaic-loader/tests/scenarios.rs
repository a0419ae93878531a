//! End-to-end loads over in-memory rasters.

use mosaic_loader::config::LoaderConfig;
use mosaic_loader::driver::{LoadContext, ReaderDriver, ReaderSettings};
use mosaic_loader::{
    load, AliasTieBreak, BandKey, DataType, Dataset, GeoQuery, GroupBy, LoadOptions, LoaderError,
    RasterBandMetadata, RasterCollectionMetadata, RasterLoadParams,
};
use ndarray::Array2;
use test_utils::{
    create_constant_grid, create_half_nodata_grid, create_test_grid, grid, utc, FixtureBand,
    MosaicFixture,
};

/// Options that split an 8x4 output into two 4x4 cells.
fn two_cell_opts(fx: &MosaicFixture) -> LoadOptions {
    let config = LoaderConfig {
        chunk_size: 4,
        ..Default::default()
    };
    LoadOptions::new().config(config).driver_instance(fx.driver())
}

fn pixels(ds: &Dataset, band: &str) -> ndarray::Array4<f64> {
    ds.band(band)
        .and_then(|b| b.data())
        .map(|d| d.to_f64())
        .expect("band loaded in memory")
}

#[test]
fn test_halves_come_from_their_own_items() {
    let fx = MosaicFixture::single_band("red");
    let t = utc(2024, 3, 1, 10, 0);
    let left = fx.item("a", t, &grid::mercator(4, 4, 10.0, 0.0, 40.0), vec![create_constant_grid(4, 4, 1.0)], None);
    let right = fx.item("b", t, &grid::mercator(4, 4, 10.0, 40.0, 40.0), vec![create_constant_grid(4, 4, 2.0)], None);

    let ds = load(&[left, right], &two_cell_opts(&fx)).unwrap();
    let px = pixels(&ds, "red");
    assert_eq!(px.dim(), (1, 4, 8, 1));
    assert_eq!(ds.time().len(), 1);
    for y in 0..4 {
        for x in 0..4 {
            assert_eq!(px[[0, y, x, 0]], 1.0);
            assert_eq!(px[[0, y, x + 4, 0]], 2.0);
        }
    }
}

#[test]
fn test_nodata_filled_from_later_item() {
    let fx = MosaicFixture::new(&[FixtureBand::new("red", DataType::Int16, Some(-1.0))]);
    let t = utc(2024, 3, 1, 10, 0);
    let gbox = grid::mercator(4, 4, 10.0, 0.0, 40.0);
    let first = fx.item("a", t, &gbox, vec![create_half_nodata_grid(4, 4, 10.0, -1.0)], Some(-1.0));
    let second = fx.item("b", t, &gbox, vec![create_constant_grid(4, 4, 20.0)], Some(-1.0));

    let ds = load(&[first, second], &two_cell_opts(&fx)).unwrap();
    let data = ds.band("red").and_then(|b| b.data()).unwrap();
    assert_eq!(data.dtype(), DataType::Int16);
    let px = data.as_array::<i16>().unwrap();
    for y in 0..4 {
        assert_eq!(px[[0, y, 0, 0]], 20);
        assert_eq!(px[[0, y, 1, 0]], 20);
        assert_eq!(px[[0, y, 2, 0]], 10);
        assert_eq!(px[[0, y, 3, 0]], 10);
    }
}

#[test]
fn test_solar_day_merges_across_utc_midnight() {
    let fx = MosaicFixture::single_band("red");
    let gbox = grid::geographic(4, 4, 0.01, 170.0, -10.0);
    let late = fx.item("late", utc(2024, 1, 1, 23, 30), &gbox, vec![create_test_grid(4, 4)], None);
    let early = fx.item("early", utc(2024, 1, 2, 0, 30), &gbox, vec![create_constant_grid(4, 4, 5.0)], None);
    let items = vec![late, early];

    let opts = LoadOptions::new()
        .driver_instance(fx.driver())
        .geo(GeoQuery::with_geobox(gbox));
    let by_day = load(&items, &opts.clone().groupby(GroupBy::SolarDay)).unwrap();
    assert_eq!(by_day.time().len(), 1);
    // Earliest timestamp wins the fusion.
    assert_eq!(pixels(&by_day, "red")[[0, 0, 1, 0]], 1000.0);

    let by_time = load(&items, &opts.groupby(GroupBy::Time)).unwrap();
    assert_eq!(by_time.time().len(), 2);
}

#[test]
fn test_unreadable_source_is_skipped() {
    let fx = MosaicFixture::single_band("red");
    let t = utc(2024, 3, 1, 10, 0);
    let items = vec![
        fx.item("a", t, &grid::mercator(4, 4, 10.0, 0.0, 40.0), vec![create_constant_grid(4, 4, 1.0)], None),
        fx.unreadable_item("b", t, &grid::mercator(4, 4, 10.0, 40.0, 40.0)),
        fx.item("c", t, &grid::mercator(4, 4, 10.0, 0.0, 40.0), vec![create_constant_grid(4, 4, 3.0)], None),
    ];

    let opts = two_cell_opts(&fx).nodata(-999.0).fail_on_error(false);
    let ds = load(&items, &opts).unwrap();
    let px = pixels(&ds, "red");
    assert_eq!(px.dim(), (1, 4, 8, 1));
    assert_eq!(px[[0, 0, 0, 0]], 1.0);
    assert!(px.slice(ndarray::s![0, .., 4.., 0]).iter().all(|&v| v == -999.0));

    let failures = ds.read_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].band, "red");
    assert!(failures[0].uri.contains("missing/b"));
    assert_eq!(failures[0].tile, (0, 0, 1));

    let strict = load(&items, &opts.fail_on_error(true));
    assert!(matches!(strict, Err(LoaderError::ReadIo { band: 1, .. })));
}

#[test]
fn test_empty_cell_is_fill() {
    let fx = MosaicFixture::single_band("red");
    let t = utc(2024, 3, 1, 10, 0);
    let item = fx.item("a", t, &grid::mercator(4, 4, 10.0, 0.0, 40.0), vec![create_constant_grid(4, 4, 1.0)], None);
    let out = grid::mercator(8, 4, 10.0, 0.0, 40.0);

    let opts = two_cell_opts(&fx)
        .geo(GeoQuery::with_geobox(out))
        .nodata(7.0);
    let ds = load(&[item], &opts).unwrap();
    let px = pixels(&ds, "red");
    assert!(px.slice(ndarray::s![0, .., 4.., 0]).iter().all(|&v| v == 7.0));
    assert!(ds.read_failures().is_empty());
}

#[test]
fn test_id_grouping_keeps_every_item() {
    let fx = MosaicFixture::single_band("red");
    let t = utc(2024, 3, 1, 10, 0);
    let gbox = grid::mercator(4, 4, 10.0, 0.0, 40.0);
    let items: Vec<_> = (0..3)
        .map(|i| fx.item(&format!("i{}", i), t, &gbox, vec![create_constant_grid(4, 4, i as f64)], None))
        .collect();

    let opts = LoadOptions::new().driver_instance(fx.driver());
    let ds = load(&items, &opts.clone().groupby(GroupBy::Id)).unwrap();
    let px = pixels(&ds, "red");
    assert_eq!(px.dim().0, 3);
    for i in 0..3 {
        assert_eq!(px[[i, 2, 2, 0]], i as f64);
    }

    let merged = load(&items, &opts).unwrap();
    assert_eq!(merged.time().len(), 1);
}

#[test]
fn test_parallel_matches_serial() {
    let fx = MosaicFixture::single_band("red");
    let t = utc(2024, 3, 1, 10, 0);
    let items = vec![
        fx.item("a", t, &grid::mercator(8, 8, 10.0, 0.0, 80.0), vec![create_test_grid(8, 8)], None),
        fx.item("b", t, &grid::mercator(8, 8, 10.0, 40.0, 40.0), vec![create_constant_grid(8, 8, 3.0)], None),
    ];

    let serial = load(&items, &two_cell_opts(&fx).pool(1)).unwrap();
    let parallel = load(&items, &two_cell_opts(&fx).pool(4)).unwrap();
    assert_eq!(pixels(&serial, "red"), pixels(&parallel, "red"));
}

#[test]
fn test_stripped_source_reads_identically() {
    let fx = MosaicFixture::single_band("red");
    let gbox = grid::mercator(6, 6, 10.0, 0.0, 60.0);
    let item = fx.item("a", utc(2024, 3, 1, 10, 0), &gbox, vec![create_test_grid(6, 6)], None);
    let stripped = item.strip();

    let driver = fx.driver();
    let ctx = LoadContext::new(None, ReaderSettings::default());
    let cfg = RasterLoadParams::default();
    let dst = grid::mercator(4, 4, 10.0, 10.0, 50.0);

    let full = driver.open(item.resolve_band("red").unwrap(), &ctx).unwrap();
    let bare = driver.open(stripped.resolve_band("red").unwrap(), &ctx).unwrap();
    assert!(stripped.resolve_band("red").unwrap().geobox.is_none());

    let (roi_a, px_a) = full.read(&cfg, &dst).unwrap();
    let (roi_b, px_b) = bare.read(&cfg, &dst).unwrap();
    assert_eq!(roi_a, roi_b);
    assert_eq!(px_a, px_b);
}

#[test]
fn test_patch_url_reaches_reader() {
    let fx = MosaicFixture::single_band("red");
    let gbox = grid::mercator(4, 4, 10.0, 0.0, 40.0);
    let t = utc(2024, 3, 1, 10, 0);
    // Pixels live under the patched URI only.
    fx.backend.insert(
        "mem://signed/a/red",
        mosaic_loader::MemoryRaster::new(gbox.clone(), vec![Array2::from_elem((4, 4), 9.0)]).unwrap(),
    );
    let item = fx.unreadable_item("a", t, &gbox);

    let opts = LoadOptions::new()
        .driver_instance(fx.driver())
        .patch_url(|uri| uri.replace("mem://missing/", "mem://signed/"));
    let ds = load(&[item], &opts).unwrap();
    assert_eq!(pixels(&ds, "red")[[0, 0, 0, 0]], 9.0);
}

#[test]
fn test_unknown_band_rejected() {
    let fx = MosaicFixture::single_band("red");
    let item = fx.item(
        "a",
        utc(2024, 3, 1, 10, 0),
        &grid::mercator(4, 4, 10.0, 0.0, 40.0),
        vec![create_constant_grid(4, 4, 1.0)],
        None,
    );
    let err = load(&[item], &LoadOptions::new().driver_instance(fx.driver()).bands("nir")).unwrap_err();
    assert!(matches!(err, LoaderError::BandResolution(_)));
}

#[test]
fn test_configured_tie_break_picks_alias_band() {
    let bands = indexmap::IndexMap::from([
        (BandKey::new("B04", 1), RasterBandMetadata::default()),
        (BandKey::new("B03", 1), RasterBandMetadata::default()),
    ]);
    let aliases = indexmap::IndexMap::from([(
        "visible".to_string(),
        vec![BandKey::new("B04", 1), BandKey::new("B03", 1)],
    )]);
    let fx = MosaicFixture::with_collection(
        RasterCollectionMetadata::new("s2", bands).with_aliases(aliases),
    );
    let item = fx.item(
        "a",
        utc(2024, 3, 1, 10, 0),
        &grid::mercator(4, 4, 10.0, 0.0, 40.0),
        vec![create_constant_grid(4, 4, 4.0), create_constant_grid(4, 4, 3.0)],
        None,
    );

    let opts = LoadOptions::new().driver_instance(fx.driver()).bands("visible");
    let first = load(&[item.clone()], &opts).unwrap();
    assert_eq!(pixels(&first, "visible")[[0, 0, 0, 0]], 4.0);

    let config = LoaderConfig {
        alias_tie_break: Some(AliasTieBreak::Lowest),
        ..Default::default()
    };
    let lowest = load(&[item], &opts.config(config)).unwrap();
    // Every pixel comes from B03, including the reads behind the plan.
    assert!(pixels(&lowest, "visible").iter().all(|&v| v == 3.0));
}
