//! Spatial indexing.
//!
//! [`Quadtree`] answers "which objects intersect this region" for frames,
//! tiles, or any other keyed object with a bounding box.

mod bounds;
mod quadtree;

pub use bounds::Bounds;
pub use quadtree::{Quadtree, DEFAULT_MAX_DEPTH, DEFAULT_NODE_LIMIT};
