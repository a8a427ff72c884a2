//! Frame catalogs.

use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::ops::{Bound, RangeBounds};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::frame::{Frame, FrameOrder};
use crate::error::RasterError;
use crate::spatial::{Bounds, Quadtree, DEFAULT_MAX_DEPTH, DEFAULT_NODE_LIMIT};

/// Which frames a catalog query returns, and in what order.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogFilter {
    /// Footprints must intersect this box. `None` matches everywhere.
    pub region: Option<Bounds>,
    /// Allowed imagery types. `None` allows all.
    pub imagery_types: Option<Vec<String>>,
    /// Allowed native GSD.
    pub gsd: (Bound<f64>, Bound<f64>),
    pub order: FrameOrder,
}

impl Default for CatalogFilter {
    fn default() -> Self {
        Self {
            region: None,
            imagery_types: None,
            gsd: (Bound::Unbounded, Bound::Unbounded),
            order: FrameOrder::default(),
        }
    }
}

impl CatalogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(mut self, region: Bounds) -> Self {
        self.region = Some(region);
        self
    }

    pub fn imagery_types(mut self, types: Option<Vec<String>>) -> Self {
        self.imagery_types = types;
        self
    }

    pub fn gsd(mut self, range: impl RangeBounds<f64>) -> Self {
        self.gsd = (range.start_bound().cloned(), range.end_bound().cloned());
        self
    }

    pub fn order(mut self, order: FrameOrder) -> Self {
        self.order = order;
        self
    }

    pub fn matches(&self, frame: &Frame) -> bool {
        self.gsd.contains(&frame.min_gsd)
            && self
                .imagery_types
                .as_ref()
                .map_or(true, |types| types.iter().any(|t| *t == frame.imagery_type))
            && self.region.as_ref().map_or(true, |r| frame.intersects(r))
    }
}

/// Source of frame descriptors.
pub trait FrameCatalog: Send + Sync {
    /// Frames matching `filter`, sorted by its order.
    fn query(&self, filter: &CatalogFilter) -> Result<Vec<Frame>, RasterError>;
}

#[derive(Serialize, Deserialize)]
struct CatalogFile {
    frames: Vec<Frame>,
}

struct Entries {
    slots: Vec<Option<Frame>>,
    by_path: HashMap<PathBuf, usize>,
    free: Vec<usize>,
    index: Quadtree<usize>,
}

/// In-memory catalog indexed by a quadtree over frame bounds.
pub struct MemoryCatalog {
    entries: RwLock<Entries>,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::with_index(DEFAULT_NODE_LIMIT, DEFAULT_MAX_DEPTH)
    }

    /// Catalog with explicit quadtree tuning.
    pub fn with_index(node_limit: usize, max_depth: u32) -> Self {
        let index = Quadtree::new(Bounds::world())
            .with_node_limit(node_limit)
            .with_max_depth(max_depth);
        Self {
            entries: RwLock::new(Entries {
                slots: Vec::new(),
                by_path: HashMap::new(),
                free: Vec::new(),
                index,
            }),
        }
    }

    pub fn from_frames(frames: impl IntoIterator<Item = Frame>) -> Self {
        let catalog = Self::new();
        for frame in frames {
            catalog.insert(frame);
        }
        catalog
    }

    /// Adds a frame, replacing any frame with the same path.
    pub fn insert(&self, frame: Frame) {
        let mut entries = self.entries.write();
        let bounds = frame.bounds();

        if let Some(&id) = entries.by_path.get(&frame.path) {
            entries.index.refresh(id, bounds);
            entries.slots[id] = Some(frame);
            return;
        }

        let id = match entries.free.pop() {
            Some(id) => id,
            None => {
                entries.slots.push(None);
                entries.slots.len() - 1
            }
        };
        entries.by_path.insert(frame.path.clone(), id);
        entries.index.insert(id, bounds);
        entries.slots[id] = Some(frame);
    }

    pub fn remove(&self, path: &Path) -> Option<Frame> {
        let mut entries = self.entries.write();
        let id = entries.by_path.remove(path)?;
        entries.index.remove(&id);
        entries.free.push(id);
        entries.slots[id].take()
    }

    pub fn len(&self) -> usize {
        self.entries.read().by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every frame, finest first.
    pub fn frames(&self) -> Vec<Frame> {
        let entries = self.entries.read();
        let mut frames: Vec<Frame> = entries.slots.iter().flatten().cloned().collect();
        FrameOrder::FinestFirst.sort(&mut frames);
        frames
    }

    /// Frames whose footprint contains the point, finest first.
    pub fn frames_at(&self, x: f64, y: f64) -> Vec<Frame> {
        let entries = self.entries.read();
        let probe = Bounds::new(x, y, x, y);
        let mut frames: Vec<Frame> = entries
            .index
            .query(&probe)
            .into_iter()
            .filter_map(|id| entries.slots[id].as_ref())
            .filter(|f| f.covers_point(x, y))
            .cloned()
            .collect();
        FrameOrder::FinestFirst.sort(&mut frames);
        frames
    }

    /// Loads a catalog from a JSON document of the form `{"frames": [...]}`.
    pub fn load_json(path: &Path) -> Result<Self, RasterError> {
        let catalog = Self::new();
        catalog.extend_from_json(path)?;
        Ok(catalog)
    }

    /// Adds every frame of a JSON catalog document. Returns how many were read.
    pub fn extend_from_json(&self, path: &Path) -> Result<usize, RasterError> {
        let file = fs::File::open(path)?;
        let parsed: CatalogFile = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| RasterError::Catalog(format!("{}: {}", path.display(), e)))?;
        let count = parsed.frames.len();
        for frame in parsed.frames {
            self.insert(frame);
        }
        debug!(path = %path.display(), frames = count, "Loaded frame catalog");
        Ok(count)
    }

    pub fn save_json(&self, path: &Path) -> Result<(), RasterError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let document = CatalogFile {
            frames: self.frames(),
        };
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &document)
            .map_err(|e| RasterError::Catalog(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }
}

impl FrameCatalog for MemoryCatalog {
    fn query(&self, filter: &CatalogFilter) -> Result<Vec<Frame>, RasterError> {
        let entries = self.entries.read();

        let candidates = match &filter.region {
            Some(region) => entries.index.query(region),
            None => entries.by_path.values().copied().collect(),
        };

        let mut frames: Vec<Frame> = candidates
            .into_iter()
            .filter_map(|id| entries.slots[id].as_ref())
            .filter(|f| filter.matches(f))
            .cloned()
            .collect();
        filter.order.sort(&mut frames);
        Ok(frames)
    }
}
