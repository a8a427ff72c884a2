//! Tile source abstraction.
//!
//! A [`TileSource`] exposes a raster as a pyramid of tiles described by a
//! [`TileGrid`]. Implementations provide single-tile reads; arbitrary region
//! reads with subsampling are composed from tiles by [`read_region`].
//!
//! # Architecture
//!
//! ```text
//!                    read(rect, dst_w, dst_h)
//!                              │
//!                              ▼
//!              ┌───────────────────────────────┐
//!              │ pick coarsest level with      │
//!              │ 2^k ≤ subsample ratio         │
//!              └───────────────┬───────────────┘
//!                              ▼
//!              ┌───────────────────────────────┐
//!              │ for each touching tile:       │──► cancel? ──► Canceled
//!              │   read_tile → crop → scale    │
//!              │   → paste into destination    │
//!              └───────────────┬───────────────┘
//!                              ▼
//!                       Complete(pixels)
//! ```
//!
//! Variants:
//! - [`SingleFileSource`]: one image file decoded with the `image` crate
//! - [`CompositeSource`]: several readers over one grid, picking the reader
//!   with the highest tile version per tile
//!
//! Readers are created through an explicit [`ReaderRegistry`].

mod composite;
mod grid;
pub mod pixels;
mod registry;
mod single;

pub use composite::CompositeSource;
pub use grid::TileGrid;
pub use registry::{ReaderFactory, ReaderOptions, ReaderRegistry, DEFAULT_TILE_SIZE};
pub use single::SingleFileSource;

use std::fmt;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::RasterError;

/// Address of one tile in a pyramid. Level 0 is the coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileAddress {
    pub level: u32,
    pub row: u64,
    pub column: u64,
}

impl TileAddress {
    pub fn new(level: u32, row: u64, column: u64) -> Self {
        Self { level, row, column }
    }

    /// Tile one level coarser that contains this tile, or `None` at level 0.
    pub fn parent(&self) -> Option<TileAddress> {
        if self.level == 0 {
            return None;
        }
        Some(TileAddress::new(self.level - 1, self.row / 2, self.column / 2))
    }

    /// Child tile one level finer. `dy`/`dx` select the lower/right half.
    pub fn child(&self, dy: u64, dx: u64) -> TileAddress {
        TileAddress::new(self.level + 1, self.row * 2 + dy, self.column * 2 + dx)
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{} r{} c{}", self.level, self.row, self.column)
    }
}

/// Rectangle in native-resolution source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceRect {
    pub x: u64,
    pub y: u64,
    pub width: u64,
    pub height: u64,
}

impl SourceRect {
    pub fn new(x: u64, y: u64, width: u64, height: u64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> u64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u64 {
        self.y + self.height
    }

    /// Overlap of two rectangles, `None` when they do not overlap.
    pub fn intersection(&self, other: &SourceRect) -> Option<SourceRect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some(SourceRect::new(x0, y0, x1 - x0, y1 - y0))
    }
}

/// Result of a cooperative, cancellable read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome<T> {
    Complete(T),
    Canceled,
}

impl<T> ReadOutcome<T> {
    pub fn is_canceled(&self) -> bool {
        matches!(self, ReadOutcome::Canceled)
    }

    /// The completed value, if any.
    pub fn complete(self) -> Option<T> {
        match self {
            ReadOutcome::Complete(v) => Some(v),
            ReadOutcome::Canceled => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ReadOutcome<U> {
        match self {
            ReadOutcome::Complete(v) => ReadOutcome::Complete(f(v)),
            ReadOutcome::Canceled => ReadOutcome::Canceled,
        }
    }
}

/// A tiled raster reader.
pub trait TileSource: Send + Sync {
    /// Identifier of the underlying dataset.
    fn uri(&self) -> &str;

    fn grid(&self) -> &TileGrid;

    /// Reads one tile at its own level's resolution.
    fn read_tile(
        &self,
        address: TileAddress,
        cancel: &CancellationToken,
    ) -> Result<ReadOutcome<RgbaImage>, RasterError>;

    /// Version of the data at `address`. Higher versions win in composites.
    fn tile_version(&self, _address: TileAddress) -> u64 {
        0
    }

    /// Reads `rect` scaled to `dst_width`×`dst_height`.
    fn read(
        &self,
        rect: SourceRect,
        dst_width: u32,
        dst_height: u32,
        cancel: &CancellationToken,
    ) -> Result<ReadOutcome<RgbaImage>, RasterError> {
        read_region(self, rect, dst_width, dst_height, cancel)
    }
}

/// Composites a region read from the tiles of `source`.
///
/// Uses the coarsest level whose reduction does not exceed the subsample
/// ratio, and checks `cancel` before every tile.
pub fn read_region<S: TileSource + ?Sized>(
    source: &S,
    rect: SourceRect,
    dst_width: u32,
    dst_height: u32,
    cancel: &CancellationToken,
) -> Result<ReadOutcome<RgbaImage>, RasterError> {
    let grid = *source.grid();
    if rect.is_empty() || dst_width == 0 || dst_height == 0 {
        return Err(RasterError::InvalidRegion(format!(
            "{:?} -> {}x{}",
            rect, dst_width, dst_height
        )));
    }
    if rect.right() > grid.width() || rect.bottom() > grid.height() {
        return Err(RasterError::InvalidRegion(format!(
            "{:?} outside {}x{}",
            rect,
            grid.width(),
            grid.height()
        )));
    }

    let ratio = (rect.width as f64 / dst_width as f64).min(rect.height as f64 / dst_height as f64);
    let reduction = if ratio < 2.0 { 0 } else { ratio.log2().floor() as u32 };
    let level = grid.level_for_reduction(reduction);

    let first_col = grid.tile_column(level, rect.x);
    let last_col = grid.tile_column(level, rect.right() - 1);
    let first_row = grid.tile_row(level, rect.y);
    let last_row = grid.tile_row(level, rect.bottom() - 1);

    let mut output = RgbaImage::new(dst_width, dst_height);

    for row in first_row..=last_row {
        for column in first_col..=last_col {
            if cancel.is_cancelled() {
                return Ok(ReadOutcome::Canceled);
            }

            let address = TileAddress::new(level, row, column);
            let tile = match source.read_tile(address, cancel)? {
                ReadOutcome::Complete(tile) => tile,
                ReadOutcome::Canceled => return Ok(ReadOutcome::Canceled),
            };

            let tile_rect = grid.tile_source_rect(address);
            let Some(overlap) = rect.intersection(&tile_rect) else {
                continue;
            };

            // Overlap in the tile's own pixels
            let sx = tile.width() as f64 / tile_rect.width as f64;
            let sy = tile.height() as f64 / tile_rect.height as f64;
            let px0 = ((overlap.x - tile_rect.x) as f64 * sx).floor() as u32;
            let py0 = ((overlap.y - tile_rect.y) as f64 * sy).floor() as u32;
            let px1 = (((overlap.right() - tile_rect.x) as f64 * sx).ceil() as u32).min(tile.width());
            let py1 = (((overlap.bottom() - tile_rect.y) as f64 * sy).ceil() as u32).min(tile.height());

            // Overlap in destination pixels
            let dx0 = scale_offset(overlap.x - rect.x, dst_width, rect.width);
            let dy0 = scale_offset(overlap.y - rect.y, dst_height, rect.height);
            let dx1 = scale_offset(overlap.right() - rect.x, dst_width, rect.width);
            let dy1 = scale_offset(overlap.bottom() - rect.y, dst_height, rect.height);

            if px1 <= px0 || py1 <= py0 || dx1 <= dx0 || dy1 <= dy0 {
                continue;
            }

            let part = pixels::crop(&tile, px0, py0, px1 - px0, py1 - py0);
            let scaled = pixels::resample(&part, dx1 - dx0, dy1 - dy0);
            pixels::blit(&mut output, &scaled, dx0, dy0);
        }
    }

    Ok(ReadOutcome::Complete(output))
}

fn scale_offset(offset: u64, dst: u32, src: u64) -> u32 {
    ((offset as u128 * dst as u128) / src as u128) as u32
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// In-memory source whose pixel (x, y) encodes its source coordinates.
    pub struct PatternSource {
        uri: String,
        grid: TileGrid,
        tile_reads: AtomicUsize,
        version: u64,
        tint: u8,
    }

    impl PatternSource {
        pub fn new(width: u64, height: u64, tile: u32) -> Self {
            Self {
                uri: format!("pattern://{}x{}", width, height),
                grid: TileGrid::new(width, height, tile, tile).unwrap(),
                tile_reads: AtomicUsize::new(0),
                version: 0,
                tint: 0,
            }
        }

        pub fn with_version(mut self, version: u64, tint: u8) -> Self {
            self.version = version;
            self.tint = tint;
            self
        }

        pub fn tile_reads(&self) -> usize {
            self.tile_reads.load(Ordering::SeqCst)
        }

        pub fn pixel(&self, x: u64, y: u64) -> image::Rgba<u8> {
            image::Rgba([(x % 251) as u8, (y % 241) as u8, self.tint, 255])
        }
    }

    impl TileSource for PatternSource {
        fn uri(&self) -> &str {
            &self.uri
        }

        fn grid(&self) -> &TileGrid {
            &self.grid
        }

        fn read_tile(
            &self,
            address: TileAddress,
            cancel: &CancellationToken,
        ) -> Result<ReadOutcome<RgbaImage>, RasterError> {
            if !self.grid.contains(address) {
                return Err(RasterError::InvalidTile(address));
            }
            if cancel.is_cancelled() {
                return Ok(ReadOutcome::Canceled);
            }
            self.tile_reads.fetch_add(1, Ordering::SeqCst);

            let (w, h) = self.grid.tile_size(address);
            let rect = self.grid.tile_source_rect(address);
            let step = 1u64 << self.grid.reduction(address.level);
            let tile = RgbaImage::from_fn(w, h, |x, y| {
                let sx = (rect.x + x as u64 * step).min(self.grid.width() - 1);
                let sy = (rect.y + y as u64 * step).min(self.grid.height() - 1);
                self.pixel(sx, sy)
            });
            Ok(ReadOutcome::Complete(tile))
        }

        fn tile_version(&self, _address: TileAddress) -> u64 {
            self.version
        }
    }
}
