//! tilemosaic - tiled access to large georeferenced imagery
//!
//! Reads huge image frames as pyramids of fixed-size tiles, caches them on
//! disk in a way that lets coarse tiles be assembled from fine ones, and
//! picks which frames of a large mosaic catalog to show for a view.
//!
//! ```text
//!   ViewRequest ──► MosaicService ──► MosaicResolver ──► FrameCatalog (quadtree)
//!                        │                  │
//!                        │            selected frames
//!                        ▼                  ▼
//!                 FrameLifecycleManager ◄───┘
//!                        │ handles, zombies, releases
//!                        ▼
//!                 TileSource ◄── CachedTileSource ◄── TileCache ◄── TileStore
//!                  (single / composite)
//! ```
//!
//! Ground/image conversion for a frame lives in [`coord`].

pub mod cache;
pub mod config;
pub mod coord;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod mosaic;
pub mod service;
pub mod source;
pub mod spatial;

pub use error::RasterError;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
