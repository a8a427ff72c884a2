//! Configuration file handling.
//!
//! Settings live in `~/.tilemosaic/config.ini`. Missing keys take their
//! defaults, so an empty or absent file is a valid configuration.
//!
//! The settings map onto the runtime configs of the library:
//!
//! ```text
//!   [cache]   ──► TileCacheConfig, MosaicServiceConfig
//!   [tiles]   ──► ReaderOptions
//!   [index]   ──► MemoryCatalog quadtree
//!   [mosaic]  ──► MosaicServiceConfig, catalog path
//!   [rpc]     ──► RpcModel solver
//!   [logging] ──► init_logging
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::{DEFAULT_CACHE_DIR_NAME, DEFAULT_LOG_DIR_NAME, DEFAULT_LOG_FILE};
pub use file::{
    config_directory, config_file_path, ConfigFileError, CONFIG_DIR_NAME, CONFIG_FILE_NAME,
};
pub use settings::{
    CacheSettings, ConfigFile, IndexSettings, LoggingSettings, MosaicSettings, RpcSettings,
    TileSettings,
};

use crate::cache::TileCacheConfig;
use crate::coord::RpcModel;
use crate::mosaic::MemoryCatalog;
use crate::service::MosaicServiceConfig;
use crate::source::ReaderOptions;

impl ConfigFile {
    pub fn tile_cache_config(&self) -> TileCacheConfig {
        TileCacheConfig {
            max_derive_depth: self.cache.max_derive_depth,
            propagate_to_parents: self.cache.propagate_to_parents,
        }
    }

    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            tile_width: self.tiles.tile_width,
            tile_height: self.tiles.tile_height,
        }
    }

    /// Service settings with caching under `[cache] directory`.
    pub fn service_config(&self) -> MosaicServiceConfig {
        MosaicServiceConfig {
            buffer_pixels: self.mosaic.buffer_pixels,
            cache_directory: Some(self.cache.directory.clone()),
            cache: self.tile_cache_config(),
            min_cache_level: self.cache.min_level,
        }
    }

    /// An empty catalog using the `[index]` quadtree tuning.
    pub fn empty_catalog(&self) -> MemoryCatalog {
        MemoryCatalog::with_index(self.index.node_limit, self.index.max_depth)
    }

    /// Applies the `[rpc]` solver settings to a model.
    pub fn tune_rpc(&self, model: RpcModel) -> RpcModel {
        model
            .with_max_iterations(self.rpc.max_iterations)
            .with_tolerance(self.rpc.tolerance)
    }
}
