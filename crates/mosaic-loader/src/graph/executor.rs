//! Reference executor: runs a [`TaskGraph`] level by level on a rayon pool.

use std::collections::HashMap;
use std::sync::Arc;

use mosaic_geo::GeoboxTiles;
use ndarray::{Array4, Axis};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{GraphTask, LazyBand, LoadNode, NodeKey, ReadSetup, TaskGraph};
use crate::dataset::{BandData, BandPixel};
use crate::driver::nodata::initial_fill;
use crate::driver::LoadContext;
use crate::error::{LoaderError, Result};
use crate::fusion::{load_cell_opened, CellScope, OpenedSource};
use crate::types::{DataType, RasterLoadParams};

/// Result of one node.
#[derive(Clone)]
pub enum NodeOutput {
    Config(RasterLoadParams),
    Tiles(Arc<GeoboxTiles>),
    /// A failed open is kept so the reading block can apply its
    /// failure policy.
    Reader(OpenedSource),
    Block(BandData),
}

impl std::fmt::Debug for NodeOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeOutput::Config(cfg) => f.debug_tuple("Config").field(cfg).finish(),
            NodeOutput::Tiles(tiles) => f.debug_tuple("Tiles").field(&tiles.shape()).finish(),
            NodeOutput::Reader(src) => f
                .debug_struct("Reader")
                .field("uri", &src.uri)
                .field("band", &src.band)
                .field("ok", &src.reader.is_ok())
                .finish(),
            NodeOutput::Block(data) => f.debug_tuple("Block").field(&data.shape()).finish(),
        }
    }
}

type Outputs = HashMap<NodeKey, NodeOutput>;

/// Executes graphs in-process.
#[derive(Debug, Clone, Copy)]
pub struct LocalExecutor {
    pool_size: usize,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self { pool_size: 1 }
    }
}

impl LocalExecutor {
    pub fn new(pool_size: usize) -> Self {
        Self { pool_size }
    }

    /// Evaluate `targets` and everything they depend on.
    pub fn execute(&self, graph: &TaskGraph, targets: &[NodeKey]) -> Result<Outputs> {
        let levels = graph.levels(targets)?;
        let contexts = self.open_contexts(graph, &levels)?;
        let pool = self.pool()?;

        let mut outputs = Outputs::new();
        let result = levels.iter().try_for_each(|level| {
            let eval = |key: &NodeKey| -> Result<(NodeKey, NodeOutput)> {
                let task = graph
                    .get(key)
                    .ok_or_else(|| LoaderError::execution(format!("missing graph node {}", key)))?;
                Ok((key.clone(), evaluate(task, &outputs, &contexts)?))
            };
            let done = match &pool {
                Some(pool) => pool.install(|| level.par_iter().map(eval).collect::<Result<Vec<_>>>()),
                None => level.iter().map(eval).collect::<Result<Vec<_>>>(),
            }?;
            outputs.extend(done);
            Ok(())
        });

        for (setup, ctx) in contexts.into_values() {
            setup.driver.finalise_load(ctx)?;
        }
        result.map(|_| outputs)
    }

    /// Materialize a lazy band.
    pub fn compute(&self, band: &LazyBand) -> Result<BandData> {
        let targets: Vec<NodeKey> = band.blocks.values().cloned().collect();
        let outputs = self.execute(&band.graph, &targets)?;

        let mut data = BandData::filled(band.dtype, band.shape, initial_fill(&band.cfg));
        for (&idx, key) in &band.blocks {
            match outputs.get(key) {
                Some(NodeOutput::Block(block)) => data.paste(band.block_offset(idx), block)?,
                _ => {
                    return Err(LoaderError::execution(format!(
                        "node {} produced no block",
                        key
                    )))
                }
            }
        }
        Ok(data)
    }

    fn pool(&self) -> Result<Option<ThreadPool>> {
        if self.pool_size <= 1 {
            return Ok(None);
        }
        Ok(Some(
            ThreadPoolBuilder::new()
                .num_threads(self.pool_size)
                .thread_name(|i| format!("mosaic-graph-{}", i))
                .build()?,
        ))
    }

    /// One load context per driver used by the nodes to run.
    fn open_contexts(
        &self,
        graph: &TaskGraph,
        levels: &[Vec<NodeKey>],
    ) -> Result<HashMap<String, (Arc<ReadSetup>, LoadContext)>> {
        let mut contexts = HashMap::new();
        for key in levels.iter().flatten() {
            let setup = match graph.get(key) {
                Some(GraphTask::Open { setup, .. }) => setup,
                Some(GraphTask::Load(node)) => &node.setup,
                _ => continue,
            };
            let name = setup.driver.name().to_string();
            if !contexts.contains_key(&name) {
                let ctx = setup.driver.new_load(None, setup.settings)?;
                contexts.insert(name, (setup.clone(), ctx));
            }
        }
        Ok(contexts)
    }
}

fn context_for<'a>(
    contexts: &'a HashMap<String, (Arc<ReadSetup>, LoadContext)>,
    setup: &ReadSetup,
) -> Result<&'a LoadContext> {
    contexts
        .get(setup.driver.name())
        .map(|(_, ctx)| ctx)
        .ok_or_else(|| LoaderError::execution(format!("no load context for {}", setup.driver.name())))
}

fn evaluate(
    task: &GraphTask,
    outputs: &Outputs,
    contexts: &HashMap<String, (Arc<ReadSetup>, LoadContext)>,
) -> Result<NodeOutput> {
    match task {
        GraphTask::Config(cfg) => Ok(NodeOutput::Config(cfg.clone())),
        GraphTask::Tiles(tiles) => Ok(NodeOutput::Tiles(tiles.clone())),
        GraphTask::Open { source, setup } => {
            let ctx = context_for(contexts, setup)?;
            let _env = setup.driver.restore_env(&setup.env, ctx)?;
            let opened = OpenedSource::open(setup.driver.as_ref(), source, ctx);
            Ok(NodeOutput::Reader(opened))
        }
        GraphTask::Load(node) => {
            let cfg = match outputs.get(&node.cfg) {
                Some(NodeOutput::Config(cfg)) => cfg,
                _ => return Err(LoaderError::execution(format!("{} is not a config", node.cfg))),
            };
            let tiles = match outputs.get(&node.tiles) {
                Some(NodeOutput::Tiles(tiles)) => tiles,
                _ => return Err(LoaderError::execution(format!("{} is not a grid", node.tiles))),
            };
            let ctx = context_for(contexts, &node.setup)?;
            let _env = node.setup.driver.restore_env(&node.setup.env, ctx)?;

            let block = match cfg.dtype {
                DataType::UInt8 => load_block::<u8>(node, cfg, tiles, outputs)?,
                DataType::Int8 => load_block::<i8>(node, cfg, tiles, outputs)?,
                DataType::UInt16 => load_block::<u16>(node, cfg, tiles, outputs)?,
                DataType::Int16 => load_block::<i16>(node, cfg, tiles, outputs)?,
                DataType::UInt32 => load_block::<u32>(node, cfg, tiles, outputs)?,
                DataType::Int32 => load_block::<i32>(node, cfg, tiles, outputs)?,
                DataType::Float32 => load_block::<f32>(node, cfg, tiles, outputs)?,
                DataType::Float64 => load_block::<f64>(node, cfg, tiles, outputs)?,
            };
            Ok(NodeOutput::Block(block))
        }
    }
}

fn load_block<T: BandPixel>(
    node: &LoadNode,
    cfg: &RasterLoadParams,
    tiles: &GeoboxTiles,
    outputs: &Outputs,
) -> Result<BandData> {
    let (tc, row, col) = node.idx;
    let dst_gbox = tiles.tile(row, col);
    let mut block = Array4::<T>::from_elem(node.shape, T::from_f64(initial_fill(cfg)));

    for (dt, (step, view)) in node
        .srcs
        .iter()
        .zip(block.axis_iter_mut(Axis(0)))
        .enumerate()
    {
        let readers = step
            .iter()
            .map(|key| match outputs.get(key) {
                Some(NodeOutput::Reader(src)) => Ok(src.clone()),
                _ => Err(LoaderError::execution(format!("{} is not an opened source", key))),
            })
            .collect::<Result<Vec<_>>>()?;

        let scope = CellScope {
            band: &node.band,
            tile: (tc * node.time_chunk + dt, row, col),
            cfg,
            diagnostics: &node.diagnostics,
        };
        load_cell_opened(view, &readers, &dst_gbox, scope)?;
    }
    Ok(T::wrap(block))
}
