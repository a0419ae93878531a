//! Turns a [`LoadPlan`] into graph-backed bands.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use super::{tokenize, GraphTask, LazyBand, LoadNode, NodeKey, ReadSetup, TaskGraph};
use crate::dataset::{ArrayAllocator, BandStorage};
use crate::driver::{IoEnv, ReaderDriver, ReaderSettings};
use crate::error::{LoaderError, Result};
use crate::fusion::LoadDiagnostics;
use crate::metadata::BandKey;
use crate::plan::LoadPlan;
use crate::types::RasterLoadParams;

/// Inputs that identify one band's blocks.
#[derive(Serialize)]
struct BandToken<'a> {
    band: &'a str,
    cfg: &'a RasterLoadParams,
    tiles: &'a mosaic_geo::GeoboxTiles,
    /// Open tokens per block and time step.
    srcs: &'a [Vec<Vec<String>>],
    env: &'a IoEnv,
    time_chunk: usize,
}

/// Allocator that emits graph nodes instead of buffers.
///
/// No I/O happens while building; reads run when the graph is executed.
pub struct GraphBuilder {
    plan: Arc<LoadPlan>,
    setup: Arc<ReadSetup>,
    diagnostics: LoadDiagnostics,
    graph: TaskGraph,
}

impl GraphBuilder {
    pub fn new(
        plan: Arc<LoadPlan>,
        driver: Arc<dyn ReaderDriver>,
        env: IoEnv,
        settings: ReaderSettings,
        diagnostics: LoadDiagnostics,
    ) -> Self {
        Self {
            plan,
            setup: Arc::new(ReadSetup {
                driver,
                env,
                settings,
            }),
            diagnostics,
            graph: TaskGraph::new(),
        }
    }

    /// Every node emitted so far, across bands.
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    fn open_node(
        &self,
        graph: &mut TaskGraph,
        cache: &mut HashMap<(usize, BandKey), NodeKey>,
        item: usize,
        key: &BandKey,
    ) -> Result<NodeKey> {
        if let Some(node) = cache.get(&(item, key.clone())) {
            return Ok(node.clone());
        }
        let source = self
            .plan
            .items
            .get(item)
            .and_then(|it| it.bands.get(key))
            .ok_or_else(|| LoaderError::execution(format!("item {} has no band {}", item, key)))?
            .strip();

        let token = tokenize(&(self.setup.driver.name(), &source, &self.setup.env))?;
        let node = NodeKey::scalar(format!("open-{}", token));
        graph.insert(
            node.clone(),
            GraphTask::Open {
                source,
                setup: self.setup.clone(),
            },
        );
        cache.insert((item, key.clone()), node.clone());
        Ok(node)
    }
}

impl ArrayAllocator for GraphBuilder {
    fn allocate(
        &mut self,
        band: &str,
        shape: (usize, usize, usize, usize),
        cfg: &RasterLoadParams,
    ) -> Result<BandStorage> {
        let tasks = self.plan.tasks_for_band(band)?;
        let mut graph = TaskGraph::new();

        let cfg_key = NodeKey::scalar(format!("cfg-{}", tokenize(cfg)?));
        graph.insert(cfg_key.clone(), GraphTask::Config(cfg.clone()));
        let tiles = self.plan.tiles.clone();
        let tiles_key = NodeKey::scalar(format!("grid-{}", tokenize(&*tiles)?));
        graph.insert(tiles_key.clone(), GraphTask::Tiles(tiles.clone()));

        let mut cache = HashMap::new();
        let mut open_keys: Vec<Vec<Vec<NodeKey>>> = Vec::with_capacity(tasks.len());
        for task in &tasks {
            let per_step = task
                .srcs
                .iter()
                .map(|step| {
                    step.iter()
                        .map(|(item, key)| self.open_node(&mut graph, &mut cache, *item, key))
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()?;
            open_keys.push(per_step);
        }

        let src_tokens: Vec<Vec<Vec<String>>> = open_keys
            .iter()
            .map(|steps| {
                steps
                    .iter()
                    .map(|keys| keys.iter().map(|k| k.name.clone()).collect())
                    .collect()
            })
            .collect();
        let token = tokenize(&BandToken {
            band,
            cfg,
            tiles: &tiles,
            srcs: &src_tokens,
            env: &self.setup.env,
            time_chunk: self.plan.time_chunk,
        })?;
        let name = format!("{}-{}", band, token);

        let mut blocks = IndexMap::new();
        for (task, srcs) in tasks.iter().zip(open_keys) {
            let (tc, row, col) = task.idx;
            let key = NodeKey::new(name.clone(), vec![tc, row, col]);
            graph.insert(
                key.clone(),
                GraphTask::Load(LoadNode {
                    band: band.to_string(),
                    cfg: cfg_key.clone(),
                    tiles: tiles_key.clone(),
                    idx: task.idx,
                    time_chunk: task.time_chunk,
                    shape: task.shape(),
                    srcs,
                    setup: self.setup.clone(),
                    diagnostics: self.diagnostics.clone(),
                }),
            );
            blocks.insert(task.idx, key);
        }

        let n_time = self.plan.n_time();
        let time_chunks = (0..self.plan.time_chunks())
            .map(|tc| {
                let t0 = tc * self.plan.time_chunk;
                (t0 + self.plan.time_chunk).min(n_time) - t0
            })
            .collect();

        tracing::debug!(
            band = %band,
            name = %name,
            nodes = graph.len(),
            opens = cache.len(),
            "built lazy band"
        );

        self.graph.merge(&graph);
        Ok(BandStorage::Lazy(LazyBand {
            name,
            dtype: cfg.dtype,
            shape,
            chunks: (time_chunks, tiles.row_sizes(), tiles.col_sizes()),
            blocks,
            graph: Arc::new(graph),
            cfg: cfg.clone(),
        }))
    }
}
