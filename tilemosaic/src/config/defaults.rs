//! Default configuration values.

use super::file::config_directory;
use super::settings::{
    CacheSettings, ConfigFile, IndexSettings, LoggingSettings, MosaicSettings, RpcSettings,
    TileSettings,
};
use crate::cache::DEFAULT_MAX_DERIVE_DEPTH;
use crate::coord::{DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE};
use crate::mosaic::DEFAULT_BUFFER_PIXELS;
use crate::source::DEFAULT_TILE_SIZE;
use crate::spatial::{DEFAULT_MAX_DEPTH, DEFAULT_NODE_LIMIT};

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "tilemosaic.log";

/// Default cache directory name under the config directory.
pub const DEFAULT_CACHE_DIR_NAME: &str = "cache";

/// Default log directory name under the config directory.
pub const DEFAULT_LOG_DIR_NAME: &str = "logs";

impl Default for ConfigFile {
    fn default() -> Self {
        let base = config_directory();
        Self {
            cache: CacheSettings {
                directory: base.join(DEFAULT_CACHE_DIR_NAME),
                max_derive_depth: DEFAULT_MAX_DERIVE_DEPTH,
                propagate_to_parents: true,
                min_level: 0,
            },
            tiles: TileSettings {
                tile_width: DEFAULT_TILE_SIZE,
                tile_height: DEFAULT_TILE_SIZE,
            },
            index: IndexSettings {
                node_limit: DEFAULT_NODE_LIMIT,
                max_depth: DEFAULT_MAX_DEPTH,
            },
            mosaic: MosaicSettings {
                catalog: None,
                buffer_pixels: DEFAULT_BUFFER_PIXELS,
            },
            rpc: RpcSettings {
                max_iterations: DEFAULT_MAX_ITERATIONS,
                tolerance: DEFAULT_TOLERANCE,
            },
            logging: LoggingSettings {
                directory: base.join(DEFAULT_LOG_DIR_NAME),
                file: DEFAULT_LOG_FILE.to_string(),
            },
        }
    }
}
