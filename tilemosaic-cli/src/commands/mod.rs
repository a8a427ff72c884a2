//! CLI command implementations.
//!
//! - [`cache`] - Tile cache maintenance (clear, stats)
//! - [`config`] - Configuration file (init, path, show)
//! - [`info`] - Tile pyramid of an image
//! - [`locate`] - Pixel/ground conversion for a catalogued frame
//! - [`query`] - Frame selection for a view
//! - [`tile`] - Extract one tile
//! - [`view`] - Run the mosaic service for a view

pub mod cache;
pub mod common;
pub mod config;
pub mod info;
pub mod locate;
pub mod query;
pub mod tile;
pub mod view;
