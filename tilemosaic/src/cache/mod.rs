//! Persistent tile cache.
//!
//! Tiles are cached per source as quadrant records so that partially
//! obtained tiles survive cancellation and coarser levels can be assembled
//! from finer ones without touching the source.
//!
//! - [`TileCache`]: request path, derivation and upward propagation
//! - [`TileStore`]: record persistence, [`DiskTileStore`] or [`MemoryTileStore`]
//! - [`CachedTileSource`]: plugs a cache back in wherever a [`TileSource`] is expected
//!
//! [`TileSource`]: crate::source::TileSource

mod cached;
mod record;
mod store;
mod tile_cache;

pub use cached::CachedTileSource;
pub use record::{QuadLayout, Quadrant, TileRecord};
pub use store::{DiskTileStore, MemoryTileStore, TileStore, STORE_FORMAT};
pub use tile_cache::{CacheStats, TileCache, TileCacheConfig, DEFAULT_MAX_DERIVE_DEPTH};
