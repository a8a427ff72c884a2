//! Mosaic resolution over a frame catalog.
//!
//! A mosaic is a catalog of many frames. For each view the
//! [`MosaicResolver`] picks the few frames that cover it at the requested
//! resolution:
//!
//! ```text
//!   MosaicQuery ──► split at antimeridian ──► per part:
//!                                             catalog sweep(s) by GSD band
//!                                               │
//!                                               ▼
//!                                   skip covered / buffer + union
//!                                               │
//!                                   stop when view covered
//!                                               ▼
//!                                  merged frame list (first seen)
//! ```

mod catalog;
mod frame;
mod resolver;

pub use catalog::{CatalogFilter, FrameCatalog, MemoryCatalog};
pub use frame::{Frame, FrameOrder, WGS84_SRID};
pub use resolver::{
    MosaicQuery, MosaicResolver, Region, SelectionMode, DEFAULT_BUFFER_PIXELS, METERS_PER_DEGREE,
};
