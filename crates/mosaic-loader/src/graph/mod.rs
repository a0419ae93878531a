//! Lazy strategy: a content-addressed task graph instead of pixels.
//!
//! Nodes are keyed by a SHA-256 token of their inputs, so building the
//! same request twice yields the same keys and shared inputs collapse
//! into one node. Every cell reading a given source depends on the same
//! `open-*` node. The graph is a plain task table with dependency edges;
//! [`LocalExecutor`] is one way to run it.

pub mod builder;
pub mod executor;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use mosaic_geo::GeoboxTiles;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::driver::{IoEnv, ReaderDriver, ReaderSettings};
use crate::error::{LoaderError, Result};
use crate::fusion::LoadDiagnostics;
use crate::item::RasterSource;
use crate::types::{DataType, RasterLoadParams};

pub use builder::GraphBuilder;
pub use executor::{LocalExecutor, NodeOutput};

/// Identity of a graph node: a name plus an optional block index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub name: String,
    pub index: Vec<usize>,
}

impl NodeKey {
    pub fn new(name: impl Into<String>, index: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index.is_empty() {
            return f.write_str(&self.name);
        }
        let idx: Vec<String> = self.index.iter().map(usize::to_string).collect();
        write!(f, "{}[{}]", self.name, idx.join(","))
    }
}

/// Hex SHA-256 of the JSON form of `value`.
pub fn tokenize<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| LoaderError::execution(format!("cannot tokenize graph input: {}", e)))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Driver, environment and settings a node reads with.
#[derive(Clone)]
pub struct ReadSetup {
    pub driver: Arc<dyn ReaderDriver>,
    pub env: IoEnv,
    pub settings: ReaderSettings,
}

impl fmt::Debug for ReadSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadSetup")
            .field("driver", &self.driver.name())
            .field("env", &self.env.sanitized())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Read-and-fuse of one `(time chunk, row, col)` block.
#[derive(Debug, Clone)]
pub struct LoadNode {
    pub band: String,
    pub cfg: NodeKey,
    pub tiles: NodeKey,
    pub idx: (usize, usize, usize),
    pub time_chunk: usize,
    /// `(time, y, x, planes)` of the block.
    pub shape: (usize, usize, usize, usize),
    /// `open-*` nodes per time step, in fusion priority order.
    pub srcs: Vec<Vec<NodeKey>>,
    pub setup: Arc<ReadSetup>,
    pub diagnostics: LoadDiagnostics,
}

#[derive(Debug, Clone)]
pub enum GraphTask {
    Config(RasterLoadParams),
    Tiles(Arc<GeoboxTiles>),
    Open {
        source: RasterSource,
        setup: Arc<ReadSetup>,
    },
    Load(LoadNode),
}

impl GraphTask {
    pub fn dependencies(&self) -> Vec<NodeKey> {
        match self {
            GraphTask::Config(_) | GraphTask::Tiles(_) | GraphTask::Open { .. } => Vec::new(),
            GraphTask::Load(node) => {
                let mut deps = vec![node.cfg.clone(), node.tiles.clone()];
                for step in &node.srcs {
                    for key in step {
                        if !deps.contains(key) {
                            deps.push(key.clone());
                        }
                    }
                }
                deps
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GraphTask::Config(_) => "config",
            GraphTask::Tiles(_) => "tiles",
            GraphTask::Open { .. } => "open",
            GraphTask::Load(_) => "load",
        }
    }
}

/// Task table with dependency edges, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: IndexMap<NodeKey, GraphTask>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Returns `false` if the key was already present, in
    /// which case the existing node is kept.
    pub fn insert(&mut self, key: NodeKey, task: GraphTask) -> bool {
        if self.tasks.contains_key(&key) {
            return false;
        }
        self.tasks.insert(key, task);
        true
    }

    pub fn get(&self, key: &NodeKey) -> Option<&GraphTask> {
        self.tasks.get(key)
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &NodeKey> {
        self.tasks.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeKey, &GraphTask)> {
        self.tasks.iter()
    }

    pub fn dependencies(&self, key: &NodeKey) -> Vec<NodeKey> {
        self.tasks
            .get(key)
            .map(GraphTask::dependencies)
            .unwrap_or_default()
    }

    /// All `(node, dependency)` edges.
    pub fn edges(&self) -> Vec<(NodeKey, NodeKey)> {
        self.tasks
            .iter()
            .flat_map(|(key, task)| {
                task.dependencies()
                    .into_iter()
                    .map(move |dep| (key.clone(), dep))
            })
            .collect()
    }

    /// Add every node of `other` not already present.
    pub fn merge(&mut self, other: &TaskGraph) {
        for (key, task) in &other.tasks {
            self.insert(key.clone(), task.clone());
        }
    }

    /// Nodes needed for `targets`, grouped so every node comes after all
    /// of its dependencies' groups.
    pub fn levels(&self, targets: &[NodeKey]) -> Result<Vec<Vec<NodeKey>>> {
        let mut depth: IndexMap<NodeKey, usize> = IndexMap::new();
        let mut visiting = Vec::new();
        for key in targets {
            self.depth_of(key, &mut depth, &mut visiting)?;
        }

        let max = depth.values().copied().max().map_or(0, |d| d + 1);
        let mut levels = vec![Vec::new(); max];
        for (key, d) in depth {
            levels[d].push(key);
        }
        Ok(levels)
    }

    fn depth_of(
        &self,
        key: &NodeKey,
        depth: &mut IndexMap<NodeKey, usize>,
        visiting: &mut Vec<NodeKey>,
    ) -> Result<usize> {
        if let Some(&d) = depth.get(key) {
            return Ok(d);
        }
        if visiting.contains(key) {
            return Err(LoaderError::execution(format!("cycle through node {}", key)));
        }
        let task = self
            .tasks
            .get(key)
            .ok_or_else(|| LoaderError::execution(format!("missing graph node {}", key)))?;

        visiting.push(key.clone());
        let mut d = 0;
        for dep in task.dependencies() {
            d = d.max(self.depth_of(&dep, depth, visiting)? + 1);
        }
        visiting.pop();

        depth.insert(key.clone(), d);
        Ok(d)
    }
}

/// A band whose blocks are graph nodes.
#[derive(Debug, Clone)]
pub struct LazyBand {
    pub name: String,
    pub dtype: DataType,
    /// `(time, y, x, planes)`.
    pub shape: (usize, usize, usize, usize),
    /// Block sizes along time, y and x.
    pub chunks: (Vec<usize>, Vec<usize>, Vec<usize>),
    /// `(time chunk, row, col)` to the node producing that block.
    pub blocks: IndexMap<(usize, usize, usize), NodeKey>,
    pub graph: Arc<TaskGraph>,
    pub cfg: RasterLoadParams,
}

impl LazyBand {
    /// Pixel offset `(time, y, x)` of block `idx`.
    pub fn block_offset(&self, idx: (usize, usize, usize)) -> (usize, usize, usize) {
        let start = |sizes: &[usize], n: usize| sizes.iter().take(n).sum::<usize>();
        (
            start(&self.chunks.0, idx.0),
            start(&self.chunks.1, idx.1),
            start(&self.chunks.2, idx.2),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg_node(fill: f64) -> GraphTask {
        GraphTask::Config(RasterLoadParams::same_as(DataType::Int16, Some(fill)))
    }

    #[test]
    fn test_tokenize_is_stable() {
        let a = tokenize(&("red", 1, [1.0, 2.0])).unwrap();
        let b = tokenize(&("red", 1, [1.0, 2.0])).unwrap();
        let c = tokenize(&("red", 2, [1.0, 2.0])).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_node_key_display() {
        assert_eq!(NodeKey::scalar("cfg-1").to_string(), "cfg-1");
        assert_eq!(NodeKey::new("red-ab", vec![0, 1, 2]).to_string(), "red-ab[0,1,2]");
    }

    #[test]
    fn test_insert_dedups() {
        let mut graph = TaskGraph::new();
        assert!(graph.insert(NodeKey::scalar("a"), cfg_node(0.0)));
        assert!(!graph.insert(NodeKey::scalar("a"), cfg_node(1.0)));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_missing_dependency_is_error() {
        let mut graph = TaskGraph::new();
        graph.insert(NodeKey::scalar("a"), cfg_node(0.0));
        assert_eq!(graph.levels(&[NodeKey::scalar("a")]).unwrap().len(), 1);
        assert!(graph.levels(&[NodeKey::scalar("nope")]).is_err());
    }
}
