//! Quad-decomposed tile cache with pyramid derivation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::RgbaImage;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::record::{QuadLayout, Quadrant, TileRecord};
use super::store::TileStore;
use crate::error::RasterError;
use crate::source::{pixels, ReadOutcome, TileAddress, TileSource};

/// Levels below a tile searched for cached pixels before reading the source.
pub const DEFAULT_MAX_DERIVE_DEPTH: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCacheConfig {
    /// How many levels of finer cached tiles may be combined to fill a
    /// missing quadrant. Zero always reads the source.
    pub max_derive_depth: u32,

    /// Push newly obtained tiles into their coarser ancestors.
    pub propagate_to_parents: bool,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            max_derive_depth: DEFAULT_MAX_DERIVE_DEPTH,
            propagate_to_parents: true,
        }
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Quadrants read from the source.
    pub source_reads: u64,
    /// Quadrants built from finer cached tiles.
    pub derived_parts: u64,
    /// Quadrants already present when requested.
    pub part_hits: u64,
    /// Quadrants written into ancestors by propagation.
    pub parent_contributions: u64,
}

#[derive(Default)]
struct Counters {
    source_reads: AtomicU64,
    derived_parts: AtomicU64,
    part_hits: AtomicU64,
    parent_contributions: AtomicU64,
}

/// Cache in front of one [`TileSource`].
///
/// Each tile is stored as up to four quadrants. A request fills whatever
/// quadrants are missing, first from finer cached tiles and otherwise from
/// the source, then merges them into the stored record without replacing
/// anything already there. New pixels also flow upward: every fresh tile
/// becomes one quadrant of its parent, and a parent that becomes complete
/// does the same for its own parent.
///
/// ```text
///      L-1   ┌───────┬───────┐
///            │  UL   │  UR ◄─┼──── resampled from L (r, c) when fresh
///            ├───────┼───────┤
///            │  LL   │  LR   │
///            └───────┴───────┘
///      L     (r, c): parts from cache ─► derive from L+1 ─► source read
/// ```
pub struct TileCache {
    source: Arc<dyn TileSource>,
    store: Arc<dyn TileStore>,
    config: TileCacheConfig,
    record_lock: Mutex<()>,
    counters: Counters,
}

impl TileCache {
    pub fn new(source: Arc<dyn TileSource>, store: Arc<dyn TileStore>) -> Self {
        Self::with_config(source, store, TileCacheConfig::default())
    }

    pub fn with_config(
        source: Arc<dyn TileSource>,
        store: Arc<dyn TileStore>,
        config: TileCacheConfig,
    ) -> Self {
        Self {
            source,
            store,
            config,
            record_lock: Mutex::new(()),
            counters: Counters::default(),
        }
    }

    pub fn source(&self) -> &Arc<dyn TileSource> {
        &self.source
    }

    pub fn config(&self) -> &TileCacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            source_reads: self.counters.source_reads.load(Ordering::Relaxed),
            derived_parts: self.counters.derived_parts.load(Ordering::Relaxed),
            part_hits: self.counters.part_hits.load(Ordering::Relaxed),
            parent_contributions: self.counters.parent_contributions.load(Ordering::Relaxed),
        }
    }

    /// Drops every stored record.
    pub fn clear(&self) -> Result<(), RasterError> {
        let _guard = self.record_lock.lock();
        self.store.clear()
    }

    /// Returns the pixels of `address`, filling missing quadrants as needed.
    ///
    /// Quadrants obtained before a cancellation or a source failure are
    /// still written to the store.
    pub fn get(
        &self,
        address: TileAddress,
        cancel: &CancellationToken,
    ) -> Result<ReadOutcome<RgbaImage>, RasterError> {
        let grid = *self.source.grid();
        if !grid.contains(address) {
            return Err(RasterError::InvalidTile(address));
        }

        let layout = QuadLayout::for_tile(&grid, address);
        let mut parts = self.load_parts(&layout)?;

        let hits = layout.required().filter(|q| parts[q.index()].is_some()).count();
        self.counters.part_hits.fetch_add(hits as u64, Ordering::Relaxed);

        let mut fresh = Vec::new();
        let mut canceled = false;
        let mut failure = None;

        for quadrant in layout.required() {
            if parts[quadrant.index()].is_some() {
                continue;
            }
            if cancel.is_cancelled() {
                canceled = true;
                break;
            }
            match self.obtain_part(&layout, quadrant, cancel) {
                Ok(ReadOutcome::Complete(part)) => {
                    parts[quadrant.index()] = Some(part.clone());
                    fresh.push((quadrant, part));
                }
                Ok(ReadOutcome::Canceled) => {
                    canceled = true;
                    break;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if !fresh.is_empty() {
            self.merge(&layout, &fresh)?;
        }
        if let Some(e) = failure {
            return Err(e);
        }
        if canceled {
            debug!(tile = %address, committed = fresh.len(), "Tile request canceled");
            return Ok(ReadOutcome::Canceled);
        }

        let tile = layout
            .composite(&parts)
            .ok_or_else(|| RasterError::CacheCorrupt(format!("tile {} incomplete after fill", address)))?;

        if !fresh.is_empty() && self.config.propagate_to_parents {
            self.propagate(address, tile.clone())?;
        }
        Ok(ReadOutcome::Complete(tile))
    }

    /// Fills one quadrant from finer cached tiles, or else from the source.
    fn obtain_part(
        &self,
        layout: &QuadLayout,
        quadrant: Quadrant,
        cancel: &CancellationToken,
    ) -> Result<ReadOutcome<RgbaImage>, RasterError> {
        if let Some(part) = self.derive_part(layout, quadrant, self.config.max_derive_depth)? {
            self.counters.derived_parts.fetch_add(1, Ordering::Relaxed);
            return Ok(ReadOutcome::Complete(part));
        }

        let (width, height) = layout.part_size(quadrant);
        let rect = layout.part_source_rect(quadrant);
        let outcome = self.source.read(rect, width, height, cancel)?;
        if !outcome.is_canceled() {
            self.counters.source_reads.fetch_add(1, Ordering::Relaxed);
            trace!(tile = %layout.address, ?quadrant, "Quadrant read from source");
        }
        Ok(outcome)
    }

    /// Builds a quadrant from the child tile covering it, using only cached
    /// data up to `depth` levels down.
    fn derive_part(
        &self,
        layout: &QuadLayout,
        quadrant: Quadrant,
        depth: u32,
    ) -> Result<Option<RgbaImage>, RasterError> {
        if depth == 0 {
            return Ok(None);
        }
        let child = layout.address.child(quadrant.dy(), quadrant.dx());
        if !self.source.grid().contains(child) {
            return Ok(None);
        }

        let Some(tile) = self.assemble_cached(child, depth - 1)? else {
            return Ok(None);
        };
        let (width, height) = layout.part_size(quadrant);
        Ok(Some(pixels::resample(&tile, width, height)))
    }

    /// Composites a tile without touching the source. Quadrants derived on
    /// the way are stored even if the tile stays incomplete.
    fn assemble_cached(&self, address: TileAddress, depth: u32) -> Result<Option<RgbaImage>, RasterError> {
        let layout = QuadLayout::for_tile(self.source.grid(), address);
        let mut parts = self.load_parts(&layout)?;
        let mut derived = Vec::new();
        let mut complete = true;

        for quadrant in layout.required() {
            if parts[quadrant.index()].is_some() {
                continue;
            }
            match self.derive_part(&layout, quadrant, depth)? {
                Some(part) => {
                    parts[quadrant.index()] = Some(part.clone());
                    derived.push((quadrant, part));
                }
                None => {
                    complete = false;
                    break;
                }
            }
        }

        if !derived.is_empty() {
            self.merge(&layout, &derived)?;
        }
        Ok(if complete { layout.composite(&parts) } else { None })
    }

    /// Writes a fresh tile into its ancestors, stopping at the first parent
    /// that already had the quadrant or is still incomplete.
    fn propagate(&self, mut address: TileAddress, mut tile: RgbaImage) -> Result<(), RasterError> {
        let grid = *self.source.grid();

        while let Some(parent) = address.parent() {
            let quadrant = Quadrant::of_child(address);
            let layout = QuadLayout::for_tile(&grid, parent);
            if !layout.requires(quadrant) {
                break;
            }

            let (width, height) = layout.part_size(quadrant);
            let part = pixels::resample(&tile, width, height);
            let (record, added) = self.merge(&layout, &[(quadrant, part)])?;
            if !added {
                break;
            }
            self.counters.parent_contributions.fetch_add(1, Ordering::Relaxed);
            trace!(tile = %parent, ?quadrant, "Quadrant propagated from child");

            match layout.composite(&record.decode(&layout)) {
                Some(parent_tile) => {
                    address = parent;
                    tile = parent_tile;
                }
                None => break,
            }
        }
        Ok(())
    }

    fn load_parts(&self, layout: &QuadLayout) -> Result<[Option<RgbaImage>; 4], RasterError> {
        Ok(match self.load_record(layout)? {
            Some(record) => record.decode(layout),
            None => Default::default(),
        })
    }

    fn load_record(&self, layout: &QuadLayout) -> Result<Option<TileRecord>, RasterError> {
        let Some(record) = self.store.load(layout.address)? else {
            return Ok(None);
        };
        if (record.width, record.height) != (layout.width, layout.height) {
            warn!(
                tile = %layout.address,
                stored = ?(record.width, record.height),
                expected = ?(layout.width, layout.height),
                "Discarding tile record with wrong size"
            );
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Read-modify-write of one record. Present quadrants are never replaced.
    ///
    /// Returns the stored record and whether anything was added.
    fn merge(
        &self,
        layout: &QuadLayout,
        parts: &[(Quadrant, RgbaImage)],
    ) -> Result<(TileRecord, bool), RasterError> {
        let _guard = self.record_lock.lock();

        let mut record = self
            .load_record(layout)?
            .unwrap_or_else(|| TileRecord::new(layout.width, layout.height));

        let mut added = false;
        for (quadrant, part) in parts {
            added |= record.insert(*quadrant, part, layout);
        }
        if added {
            self.store.save(layout.address, &record)?;
        }
        Ok((record, added))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryTileStore;
    use crate::source::test_support::PatternSource;
    use crate::source::{SourceRect, TileGrid};

    struct Fixture {
        source: Arc<PatternSource>,
        store: Arc<MemoryTileStore>,
        cache: TileCache,
    }

    fn fixture(size: u64, tile: u32, config: TileCacheConfig) -> Fixture {
        let source = Arc::new(PatternSource::new(size, size, tile));
        let store = Arc::new(MemoryTileStore::new());
        let cache = TileCache::with_config(
            Arc::clone(&source) as Arc<dyn TileSource>,
            Arc::clone(&store) as Arc<dyn TileStore>,
            config,
        );
        Fixture { source, store, cache }
    }

    fn get(cache: &TileCache, address: TileAddress) -> RgbaImage {
        cache
            .get(address, &CancellationToken::new())
            .unwrap()
            .complete()
            .unwrap()
    }

    fn stored(f: &Fixture, address: TileAddress) -> Option<TileRecord> {
        f.store.load(address).unwrap()
    }

    #[test]
    fn test_native_tile_matches_source() {
        let f = fixture(256, 64, TileCacheConfig::default());
        let native = f.source.grid().finest_level();
        let tile = get(&f.cache, TileAddress::new(native, 1, 2));

        assert_eq!(tile.dimensions(), (64, 64));
        assert_eq!(tile.get_pixel(0, 0), &f.source.pixel(128, 64));
        assert_eq!(tile.get_pixel(63, 63), &f.source.pixel(191, 127));
        assert_eq!(f.cache.stats().source_reads, 4);
    }

    #[test]
    fn test_second_request_is_served_from_store() {
        let f = fixture(256, 64, TileCacheConfig::default());
        let address = TileAddress::new(1, 0, 1);

        let first = get(&f.cache, address);
        let reads = f.cache.stats().source_reads;
        let tile_reads = f.source.tile_reads();

        let second = get(&f.cache, address);
        assert_eq!(first, second);
        assert_eq!(f.cache.stats().source_reads, reads);
        assert_eq!(f.source.tile_reads(), tile_reads);
        assert_eq!(f.cache.stats().part_hits, 4);
    }

    #[test]
    fn test_fresh_tile_fills_parent_quadrant() {
        let f = fixture(256, 64, TileCacheConfig::default());
        let native = f.source.grid().finest_level();
        let child = TileAddress::new(native, 1, 0);

        get(&f.cache, child);

        let parent = child.parent().unwrap();
        let grid = *f.source.grid();
        let layout = QuadLayout::for_tile(&grid, parent);
        let record = stored(&f, parent).unwrap();
        assert!(record.has(Quadrant::LowerLeft, &layout));
        assert!(!record.has(Quadrant::UpperLeft, &layout));
        assert_eq!(f.cache.stats().parent_contributions, 1);
    }

    #[test]
    fn test_parent_from_four_children_needs_no_source() {
        let f = fixture(256, 64, TileCacheConfig::default());
        let native = f.source.grid().finest_level();
        for (row, column) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
            get(&f.cache, TileAddress::new(native, row, column));
        }

        let reads = f.cache.stats().source_reads;
        let parent = get(&f.cache, TileAddress::new(native - 1, 0, 0));

        assert_eq!(f.cache.stats().source_reads, reads);
        assert_eq!(parent.dimensions(), (64, 64));
        // Box average of source pixels (0,0), (1,0), (0,1), (1,1)
        assert_eq!(parent.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_complete_parent_propagates_further() {
        let f = fixture(256, 64, TileCacheConfig::default());
        let native = f.source.grid().finest_level();
        for (row, column) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
            get(&f.cache, TileAddress::new(native, row, column));
        }

        // Parent (native-1, 0, 0) is complete, so it contributed to (native-2, 0, 0)
        let grid = *f.source.grid();
        let grandparent = TileAddress::new(native - 2, 0, 0);
        let layout = QuadLayout::for_tile(&grid, grandparent);
        let record = stored(&f, grandparent).unwrap();
        assert!(record.has(Quadrant::UpperLeft, &layout));
    }

    #[test]
    fn test_missing_part_derived_from_cached_children() {
        let config = TileCacheConfig {
            propagate_to_parents: false,
            ..Default::default()
        };
        let f = fixture(256, 64, config);
        let native = f.source.grid().finest_level();
        get(&f.cache, TileAddress::new(native, 0, 0));
        assert!(stored(&f, TileAddress::new(native - 1, 0, 0)).is_none());

        let reads = f.cache.stats().source_reads;
        get(&f.cache, TileAddress::new(native - 1, 0, 0));

        // Upper-left quadrant derived; the other three come from the source
        assert_eq!(f.cache.stats().derived_parts, 1);
        assert_eq!(f.cache.stats().source_reads, reads + 3);
    }

    #[test]
    fn test_zero_derive_depth_reads_source() {
        let config = TileCacheConfig {
            max_derive_depth: 0,
            propagate_to_parents: false,
        };
        let f = fixture(256, 64, config);
        let native = f.source.grid().finest_level();
        for (row, column) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
            get(&f.cache, TileAddress::new(native, row, column));
        }

        let reads = f.cache.stats().source_reads;
        get(&f.cache, TileAddress::new(native - 1, 0, 0));
        assert_eq!(f.cache.stats().derived_parts, 0);
        assert_eq!(f.cache.stats().source_reads, reads + 4);
    }

    #[test]
    fn test_existing_quadrant_never_overwritten() {
        let f = fixture(128, 64, TileCacheConfig::default());
        let grid = *f.source.grid();
        let address = TileAddress::new(grid.finest_level(), 0, 0);
        let layout = QuadLayout::for_tile(&grid, address);

        let marker = RgbaImage::from_pixel(32, 32, image::Rgba([1, 2, 3, 4]));
        let mut record = TileRecord::new(64, 64);
        record.insert(Quadrant::UpperLeft, &marker, &layout);
        f.store.save(address, &record).unwrap();

        let tile = get(&f.cache, address);
        assert_eq!(tile.get_pixel(5, 5), &image::Rgba([1, 2, 3, 4]));
        assert_eq!(tile.get_pixel(40, 40), &f.source.pixel(40, 40));
        assert_eq!(f.cache.stats().source_reads, 3);
    }

    #[test]
    fn test_canceled_request_reads_nothing() {
        let f = fixture(128, 64, TileCacheConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = f.cache.get(TileAddress::new(1, 0, 0), &cancel).unwrap();
        assert!(outcome.is_canceled());
        assert_eq!(f.cache.stats().source_reads, 0);
        assert!(f.store.is_empty());
    }

    /// Cancels its token after a fixed number of tile reads.
    struct CancelAfter {
        inner: PatternSource,
        remaining: std::sync::atomic::AtomicUsize,
        token: CancellationToken,
    }

    impl TileSource for CancelAfter {
        fn uri(&self) -> &str {
            self.inner.uri()
        }

        fn grid(&self) -> &TileGrid {
            self.inner.grid()
        }

        fn read_tile(
            &self,
            address: TileAddress,
            cancel: &CancellationToken,
        ) -> Result<ReadOutcome<RgbaImage>, RasterError> {
            let outcome = self.inner.read_tile(address, cancel)?;
            if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.token.cancel();
            }
            Ok(outcome)
        }
    }

    #[test]
    fn test_cancel_mid_request_commits_obtained_parts() {
        let token = CancellationToken::new();
        let source = Arc::new(CancelAfter {
            inner: PatternSource::new(128, 128, 64),
            remaining: std::sync::atomic::AtomicUsize::new(2),
            token: token.clone(),
        });
        let store = Arc::new(MemoryTileStore::new());
        let cache = TileCache::new(source.clone(), store.clone());

        let grid = *source.grid();
        let address = TileAddress::new(grid.finest_level(), 0, 0);
        let outcome = cache.get(address, &token).unwrap();
        assert!(outcome.is_canceled());

        let layout = QuadLayout::for_tile(&grid, address);
        let record = store.load(address).unwrap().unwrap();
        assert!(record.has(Quadrant::UpperLeft, &layout));
        assert!(record.has(Quadrant::UpperRight, &layout));
        assert!(!record.is_complete(&layout));

        // A later request only fetches what is missing
        let before = cache.stats().source_reads;
        let tile = cache
            .get(address, &CancellationToken::new())
            .unwrap()
            .complete()
            .unwrap();
        assert_eq!(cache.stats().source_reads, before + 2);
        assert_eq!(tile.get_pixel(63, 63), &source.inner.pixel(63, 63));
    }

    #[test]
    fn test_invalid_address_rejected() {
        let f = fixture(128, 64, TileCacheConfig::default());
        let result = f.cache.get(TileAddress::new(9, 0, 0), &CancellationToken::new());
        assert!(matches!(result, Err(RasterError::InvalidTile(_))));
    }

    #[test]
    fn test_edge_tile_uses_clipped_quadrants() {
        let source = Arc::new(PatternSource::new(200, 100, 64));
        let cache = TileCache::new(source.clone(), Arc::new(MemoryTileStore::new()));
        let native = source.grid().finest_level();

        // Column 3 spans source x 192..200
        let tile = get(&cache, TileAddress::new(native, 0, 3));
        assert_eq!(tile.dimensions(), (8, 64));
        assert_eq!(tile.get_pixel(7, 40), &source.pixel(199, 40));
        assert_eq!(cache.stats().source_reads, 2);

        let rect = QuadLayout::for_tile(source.grid(), TileAddress::new(native, 0, 3))
            .part_source_rect(Quadrant::LowerLeft);
        assert_eq!(rect, SourceRect::new(192, 32, 8, 32));
    }

    #[test]
    fn test_clear_forgets_everything() {
        let f = fixture(128, 64, TileCacheConfig::default());
        get(&f.cache, TileAddress::new(1, 0, 0));
        assert!(!f.store.is_empty());

        f.cache.clear().unwrap();
        assert!(f.store.is_empty());
    }
}
