//! A tile source that reads through a [`TileCache`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::RgbaImage;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::TileCache;
use crate::error::RasterError;
use crate::source::{ReadOutcome, TileAddress, TileGrid, TileSource};

/// Serves tiles at or above `min_cache_level` from the cache and the rest
/// straight from the wrapped source.
///
/// The first store failure is logged and turns caching off for the life of
/// this instance; reads continue against the source. Errors from the source
/// itself are returned as they are.
pub struct CachedTileSource {
    cache: Arc<TileCache>,
    min_cache_level: u32,
    cache_enabled: AtomicBool,
}

impl CachedTileSource {
    pub fn new(cache: Arc<TileCache>) -> Self {
        Self {
            cache,
            min_cache_level: 0,
            cache_enabled: AtomicBool::new(true),
        }
    }

    /// Finest levels only; coarser tiles bypass the cache.
    pub fn with_min_cache_level(mut self, level: u32) -> Self {
        self.min_cache_level = level;
        self
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.cache_enabled.load(Ordering::Relaxed)
    }

    fn inner(&self) -> &Arc<dyn TileSource> {
        self.cache.source()
    }
}

impl TileSource for CachedTileSource {
    fn uri(&self) -> &str {
        self.inner().uri()
    }

    fn grid(&self) -> &TileGrid {
        self.inner().grid()
    }

    fn read_tile(
        &self,
        address: TileAddress,
        cancel: &CancellationToken,
    ) -> Result<ReadOutcome<RgbaImage>, RasterError> {
        if address.level < self.min_cache_level || !self.is_cache_enabled() {
            return self.inner().read_tile(address, cancel);
        }

        match self.cache.get(address, cancel) {
            Ok(outcome) => Ok(outcome),
            Err(e @ (RasterError::Io(_) | RasterError::CacheCorrupt(_))) => {
                warn!(uri = %self.uri(), tile = %address, error = %e, "Tile cache failed, reading source directly");
                self.cache_enabled.store(false, Ordering::Relaxed);
                self.inner().read_tile(address, cancel)
            }
            Err(e) => Err(e),
        }
    }

    fn tile_version(&self, address: TileAddress) -> u64 {
        self.inner().tile_version(address)
    }
}
