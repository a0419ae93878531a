//! The `load` entry point.
//!
//! ```text
//! items -> bands -> output grid -> time groups -> cells + bins -> plan
//!       -> allocator (memory | graph) -> direct execution when in memory
//! ```

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use mosaic_geo::{Crs, GeoboxTiles};

use crate::binning::bin_items;
use crate::config::LoaderConfig;
use crate::dataset::{assemble_dataset, band_planes, Dataset, DatasetLayout, InMemoryAllocator};
use crate::driver::{
    DriverRegistry, DriverSelection, EnvScope, IoEnv, ReaderDriver, ReaderSettings, SessionConfig,
};
use crate::error::{LoaderError, Result};
use crate::fusion::LoadDiagnostics;
use crate::graph::GraphBuilder;
use crate::grouping::{group_items, GroupBy};
use crate::item::ParsedItem;
use crate::metadata::{BandQuery, RasterCollectionMetadata};
use crate::output_grid::{output_geobox, GeoQuery};
use crate::plan::{
    resolve_chunk_shape, resolve_load_cfg, run_direct, ChunkSpec, DirectOptions, LoadCfgOverrides,
    LoadPlan, LoadProgress,
};
use crate::types::{DataType, PerBand, Resampling};

/// Rewrites a source URI before reading (e.g. signing).
pub type UrlPatcher = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Options for one [`load`] call.
///
/// Setting `chunks` selects the lazy strategy; otherwise pixels are read
/// immediately.
#[derive(Clone)]
pub struct LoadOptions {
    pub bands: BandQuery,
    pub groupby: GroupBy,
    pub resampling: PerBand<Resampling>,
    pub dtype: Option<PerBand<DataType>>,
    pub chunks: Option<ChunkSpec>,
    pub pool_size: Option<usize>,
    pub geo: GeoQuery,
    pub progress: Option<Arc<dyn LoadProgress>>,
    pub fail_on_error: Option<bool>,
    pub patch_url: Option<UrlPatcher>,
    pub preserve_original_order: bool,
    pub driver: DriverSelection,
    pub registry: Option<DriverRegistry>,
    /// Output fill value for every band.
    pub nodata: Option<f64>,
    pub use_overviews: Option<bool>,
    pub env: Option<IoEnv>,
    pub session: Option<SessionConfig>,
    pub config: LoaderConfig,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            bands: BandQuery::All,
            groupby: GroupBy::Time,
            resampling: PerBand::All(Resampling::Nearest),
            dtype: None,
            chunks: None,
            pool_size: None,
            geo: GeoQuery::default(),
            progress: None,
            fail_on_error: None,
            patch_url: None,
            preserve_original_order: false,
            driver: DriverSelection::default(),
            registry: None,
            nodata: None,
            use_overviews: None,
            env: None,
            session: None,
            config: LoaderConfig::default(),
        }
    }
}

impl fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("bands", &self.bands)
            .field("groupby", &self.groupby)
            .field("resampling", &self.resampling)
            .field("dtype", &self.dtype)
            .field("chunks", &self.chunks)
            .field("pool_size", &self.pool_size)
            .field("geo", &self.geo)
            .field("fail_on_error", &self.fail_on_error)
            .field("preserve_original_order", &self.preserve_original_order)
            .field("driver", &self.driver)
            .field("nodata", &self.nodata)
            .field("use_overviews", &self.use_overviews)
            .finish_non_exhaustive()
    }
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bands(mut self, bands: impl Into<BandQuery>) -> Self {
        self.bands = bands.into();
        self
    }

    /// Use [`GroupBy::try_from`] or `str::parse` to start from a name.
    pub fn groupby(mut self, groupby: GroupBy) -> Self {
        self.groupby = groupby;
        self
    }

    pub fn resampling(mut self, resampling: impl Into<PerBand<Resampling>>) -> Self {
        self.resampling = resampling.into();
        self
    }

    pub fn dtype(mut self, dtype: impl Into<PerBand<DataType>>) -> Self {
        self.dtype = Some(dtype.into());
        self
    }

    pub fn chunks(mut self, chunks: ChunkSpec) -> Self {
        self.chunks = Some(chunks);
        self
    }

    pub fn pool(mut self, pool_size: usize) -> Self {
        self.pool_size = Some(pool_size);
        self
    }

    pub fn geo(mut self, geo: GeoQuery) -> Self {
        self.geo = geo;
        self
    }

    pub fn progress(mut self, progress: Arc<dyn LoadProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn fail_on_error(mut self, fail: bool) -> Self {
        self.fail_on_error = Some(fail);
        self
    }

    pub fn patch_url<F>(mut self, patch: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.patch_url = Some(Arc::new(patch));
        self
    }

    pub fn preserve_original_order(mut self, preserve: bool) -> Self {
        self.preserve_original_order = preserve;
        self
    }

    pub fn driver(mut self, driver: impl Into<DriverSelection>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Use `driver` directly, bypassing the registry.
    pub fn driver_instance<D: ReaderDriver + 'static>(mut self, driver: D) -> Self {
        self.driver = DriverSelection::Instance(Arc::new(driver));
        self
    }

    pub fn registry(mut self, registry: DriverRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    pub fn use_overviews(mut self, use_overviews: bool) -> Self {
        self.use_overviews = Some(use_overviews);
        self
    }

    pub fn env(mut self, env: IoEnv) -> Self {
        self.env = Some(env);
        self
    }

    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = Some(session);
        self
    }

    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Environment to scope the load in, when one was requested.
    fn io_env(&self) -> Option<IoEnv> {
        match (&self.env, &self.session) {
            (None, None) => None,
            (env, session) => {
                let mut env = env.clone().unwrap_or_else(IoEnv::capture);
                if let Some(session) = session {
                    env = env.with_session(session.clone());
                }
                Some(env)
            }
        }
    }
}

/// Load `items` into a dataset of shape `(time, y, x)` per band.
pub fn load(items: &[ParsedItem], opts: &LoadOptions) -> Result<Dataset> {
    let config = &opts.config;
    config.validate().map_err(LoaderError::Config)?;

    let first = items
        .first()
        .ok_or_else(|| LoaderError::invalid_query("no items to load"))?;

    let items: Vec<ParsedItem> = match &opts.patch_url {
        Some(patch) => items
            .iter()
            .map(|item| item.patch_urls(|uri| patch(uri), None))
            .collect::<Result<_>>()?,
        None => items.to_vec(),
    };

    let (collection, items) = apply_tie_break(first.collection.clone(), items, config);
    let bands = collection.resolve_bands(&opts.bands)?;
    let names: Vec<String> = bands.keys().cloned().collect();

    let gbox = output_geobox(&items, &names, &opts.geo)?;
    let fallback_lon = gbox
        .footprint()
        .to_crs(&Crs::WGS84)
        .ok()
        .map(|g| g.centroid().0);
    let groups = group_items(&items, &opts.groupby, opts.preserve_original_order, fallback_lon)?;

    let overrides = LoadCfgOverrides {
        dtype: opts.dtype.clone(),
        resampling: opts.resampling.clone(),
        nodata: opts.nodata,
        use_overviews: opts.use_overviews.unwrap_or(config.use_overviews),
        fail_on_error: opts.fail_on_error.unwrap_or(config.fail_on_error),
    };
    let cfgs = resolve_load_cfg(&bands, &overrides);

    let lazy = opts.chunks.is_some();
    let spec = opts.chunks.unwrap_or_default();
    let itemsize = cfgs.values().map(|c| c.dtype.itemsize()).max().unwrap_or(4);
    let (time_chunk, cy, cx) = resolve_chunk_shape(
        groups.len(),
        gbox.shape(),
        &spec,
        itemsize,
        config.chunk_size,
        config.lazy_chunk_bytes,
    );
    let tiles = GeoboxTiles::new(gbox.clone(), (cy, cx))?;
    let bins = bin_items(&items, &groups, &tiles, &names)?;

    let planes = cfgs
        .iter()
        .map(|(name, cfg)| Ok((name.clone(), band_planes(cfg, &collection.extra_dims)?)))
        .collect::<Result<IndexMap<_, _>>>()?;
    let units: IndexMap<String, String> = bands
        .iter()
        .map(|(name, (_, meta))| (name.clone(), meta.units.clone()))
        .collect();

    tracing::info!(
        items = items.len(),
        bands = ?names,
        time = groups.len(),
        shape = ?gbox.shape(),
        crs = gbox.crs.epsg(),
        cell = ?(time_chunk, cy, cx),
        lazy,
        "planning load"
    );

    let plan = Arc::new(LoadPlan {
        items: Arc::new(items.iter().map(ParsedItem::strip).collect()),
        groups,
        tiles: Arc::new(tiles),
        bins,
        cfgs,
        planes,
        time_chunk,
    });

    let registry = opts.registry.clone().unwrap_or_default();
    let driver = opts.driver.resolve(&registry)?;
    let settings = ReaderSettings::from(config);
    let _scope = opts.io_env().map(EnvScope::enter);

    let layout = DatasetLayout {
        geobox: &gbox,
        timestamps: &plan.groups.timestamps,
        bands: &plan.cfgs,
        units: &units,
        extra_dims: &collection.extra_dims,
        extra_coords: &collection.extra_coords,
    };
    let diagnostics = LoadDiagnostics::new();

    if lazy {
        let env = driver.capture_env();
        let mut builder =
            GraphBuilder::new(plan.clone(), driver, env, settings, diagnostics.clone());
        let dataset = assemble_dataset(&layout, diagnostics, &mut builder)?;
        tracing::debug!(nodes = builder.graph().len(), "lazy dataset ready");
        return Ok(dataset);
    }

    let mut dataset = assemble_dataset(&layout, diagnostics, &mut InMemoryAllocator)?;
    let direct = DirectOptions {
        pool_size: opts.pool_size.unwrap_or(config.pool_size),
        progress: opts.progress.clone(),
    };
    run_direct(&plan, &mut dataset, driver.as_ref(), settings, &direct)?;

    let failures = dataset.diagnostics().len();
    if failures > 0 {
        tracing::warn!(failures, "load finished with unreadable sources");
    }
    Ok(dataset)
}

/// Rebind every item to a collection using the configured alias rule.
fn apply_tie_break(
    collection: Arc<RasterCollectionMetadata>,
    items: Vec<ParsedItem>,
    config: &LoaderConfig,
) -> (Arc<RasterCollectionMetadata>, Vec<ParsedItem>) {
    let rule = match config.alias_tie_break {
        Some(rule) if rule != collection.alias_tie_break => rule,
        _ => return (collection, items),
    };

    let mut md = (*collection).clone();
    md.alias_tie_break = rule;
    let md = Arc::new(md);
    let items = items.iter().map(|item| item.with_collection(md.clone())).collect();
    (md, items)
}
