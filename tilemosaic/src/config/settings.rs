//! Settings structs, one per INI section.

use std::path::PathBuf;

/// Top-level configuration loaded from `config.ini`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub cache: CacheSettings,
    pub tiles: TileSettings,
    pub index: IndexSettings,
    pub mosaic: MosaicSettings,
    pub rpc: RpcSettings,
    pub logging: LoggingSettings,
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    /// Root directory for per-frame tile stores.
    pub directory: PathBuf,
    /// How many levels below a missing part the cache searches for
    /// cached children before reading the source.
    pub max_derive_depth: u32,
    /// Push freshly read parts up into coarser levels.
    pub propagate_to_parents: bool,
    /// Coarser levels than this are read without the cache.
    pub min_level: u32,
}

/// `[tiles]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSettings {
    /// Nominal tile width in pixels.
    pub tile_width: u32,
    /// Nominal tile height in pixels.
    pub tile_height: u32,
}

/// `[index]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSettings {
    /// Items a quadtree node holds before it splits.
    pub node_limit: usize,
    /// Deepest quadtree level.
    pub max_depth: u32,
}

/// `[mosaic]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicSettings {
    /// Default frame catalog (JSON).
    pub catalog: Option<PathBuf>,
    /// Overlap added around accepted frames, in view pixels.
    pub buffer_pixels: f64,
}

/// `[rpc]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcSettings {
    /// Newton iteration cap for the image-to-ground inverse.
    pub max_iterations: u32,
    /// Convergence tolerance, in image pixels.
    pub tolerance: f64,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
}
