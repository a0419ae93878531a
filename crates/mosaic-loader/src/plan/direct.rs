//! Direct strategy: read and fuse straight into preallocated arrays on a
//! bounded worker pool.

use std::collections::HashMap;
use std::sync::Arc;

use ndarray::{Array4, ArrayViewMut3, Axis};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use super::{LoadChunkTask, LoadPlan};
use crate::dataset::{BandStorage, Dataset};
use crate::driver::{IoEnv, LoadContext, ReaderDriver, ReaderSettings};
use crate::error::{LoaderError, Result};
use crate::fusion::{load_cell, CellScope, LoadDiagnostics};
use crate::item::{ParsedItem, RasterSource};
use crate::metadata::BandKey;
use crate::types::Pixel;
use crate::with_band_data;

/// Receives progress of a direct load, one unit per cell and time step.
pub trait LoadProgress: Send + Sync {
    fn start(&self, _total: usize) {}

    fn advance(&self, n: usize);

    fn finish(&self) {}
}

#[derive(Clone, Default)]
pub struct DirectOptions {
    /// Worker threads; 0 or 1 runs on the calling thread.
    pub pool_size: usize,
    pub progress: Option<Arc<dyn LoadProgress>>,
}

impl std::fmt::Debug for DirectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectOptions")
            .field("pool_size", &self.pool_size)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Shared, read-only state for every unit of one load.
struct Shared<'a> {
    items: &'a [ParsedItem],
    driver: &'a dyn ReaderDriver,
    ctx: &'a LoadContext,
    env: &'a IoEnv,
    diagnostics: &'a LoadDiagnostics,
    progress: Option<&'a dyn LoadProgress>,
}

/// One time step of one cell, with exclusive access to its window.
struct Unit<'a, T> {
    view: ArrayViewMut3<'a, T>,
    task: &'a LoadChunkTask,
    t: usize,
    srcs: &'a [(usize, BandKey)],
}

/// Execute `plan` into the in-memory bands of `dataset`.
pub fn run_direct(
    plan: &LoadPlan,
    dataset: &mut Dataset,
    driver: &dyn ReaderDriver,
    settings: ReaderSettings,
    opts: &DirectOptions,
) -> Result<()> {
    let (h, w) = plan.tiles.geobox().shape();
    let ctx = driver.new_load(Some((plan.n_time(), h, w)), settings)?;
    let env = driver.capture_env();
    let diagnostics = dataset.diagnostics().clone();

    let pool = if opts.pool_size > 1 {
        Some(
            ThreadPoolBuilder::new()
                .num_threads(opts.pool_size)
                .thread_name(|i| format!("mosaic-load-{}", i))
                .build()?,
        )
    } else {
        None
    };

    let (rows, cols) = plan.tiles.shape();
    let total = plan.cfgs.len() * plan.n_time() * rows * cols;
    tracing::debug!(
        driver = %driver.name(),
        pool_size = opts.pool_size.max(1),
        units = total,
        env = ?env.sanitized().options,
        "starting direct load"
    );
    if let Some(p) = &opts.progress {
        p.start(total);
    }

    let shared = Shared {
        items: &plan.items,
        driver,
        ctx: &ctx,
        env: &env,
        diagnostics: &diagnostics,
        progress: opts.progress.as_deref(),
    };

    let result = plan.cfgs.keys().try_for_each(|band| {
        let tasks = plan.tasks_for_band(band)?;
        let var = dataset
            .band_mut(band)
            .ok_or_else(|| LoaderError::execution(format!("band '{}' was not allocated", band)))?;
        match &mut var.storage {
            BandStorage::InMemory(data) => with_band_data!(data, arr => {
                load_band(arr, &tasks, plan, &shared, pool.as_ref())
            }),
            BandStorage::Lazy(_) => Err(LoaderError::execution(format!(
                "band '{}' is lazy, direct load needs memory",
                band
            ))),
        }
    });

    let finalised = driver.finalise_load(ctx);
    if let Some(p) = &opts.progress {
        p.finish();
    }
    result.and(finalised)
}

/// Split `arr` into one mutable view per `(time, row, col)`.
fn split_cells<'a, T>(
    arr: &'a mut Array4<T>,
    plan: &LoadPlan,
) -> HashMap<(usize, usize, usize), ArrayViewMut3<'a, T>> {
    let row_sizes = plan.tiles.row_sizes();
    let col_sizes = plan.tiles.col_sizes();
    let mut cells = HashMap::new();

    for (t, slab) in arr.axis_iter_mut(Axis(0)).enumerate() {
        let mut rest = slab;
        for (row, &height) in row_sizes.iter().enumerate() {
            let (mut strip, tail) = rest.split_at(Axis(0), height);
            rest = tail;
            for (col, &width) in col_sizes.iter().enumerate() {
                let (cell, tail) = strip.split_at(Axis(1), width);
                strip = tail;
                cells.insert((t, row, col), cell);
            }
        }
    }
    cells
}

fn load_band<T: Pixel>(
    arr: &mut Array4<T>,
    tasks: &[LoadChunkTask],
    plan: &LoadPlan,
    shared: &Shared<'_>,
    pool: Option<&rayon::ThreadPool>,
) -> Result<()> {
    let mut cells = split_cells(arr, plan);

    let mut units = Vec::with_capacity(cells.len());
    for task in tasks {
        let (_, row, col) = task.idx;
        for (t, srcs) in task.time_range().zip(&task.srcs) {
            let view = cells.remove(&(t, row, col)).ok_or_else(|| {
                LoaderError::execution(format!("no output window for cell {:?}", (t, row, col)))
            })?;
            units.push(Unit {
                view,
                task,
                t,
                srcs,
            });
        }
    }

    let run = |unit: Unit<'_, T>| run_unit(unit, shared);
    match pool {
        Some(pool) => pool.install(|| units.into_par_iter().try_for_each(run)),
        None => units.into_iter().try_for_each(run),
    }
}

fn run_unit<T: Pixel>(unit: Unit<'_, T>, shared: &Shared<'_>) -> Result<()> {
    let _env = shared.driver.restore_env(shared.env, shared.ctx)?;

    let task = unit.task;
    let sources: Vec<&RasterSource> = unit
        .srcs
        .iter()
        .filter_map(|(idx, key)| shared.items.get(*idx).and_then(|item| item.bands.get(key)))
        .collect();

    let (_, row, col) = task.idx;
    let scope = CellScope {
        band: &task.band,
        tile: (unit.t, row, col),
        cfg: &task.cfg,
        diagnostics: shared.diagnostics,
    };
    load_cell(unit.view, &sources, &task.dst_gbox(), shared.driver, shared.ctx, scope)?;

    if let Some(p) = shared.progress {
        p.advance(1);
    }
    Ok(())
}
