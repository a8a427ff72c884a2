//! Tile pyramid geometry.
//!
//! Level 0 is the coarsest level; the finest level `num_levels - 1` is the
//! native resolution. A level's *reduction* `k` is its distance from the
//! finest level, and one pixel at that level covers `2^k` source pixels.
//!
//! ```text
//!   level 0 (k = 2)      level 1 (k = 1)          level 2 (k = 0, native)
//!   ┌──────┐             ┌──────┬──────┐          ┌───┬───┬───┬───┐
//!   │ 0,0  │             │ 0,0  │ 0,1  │          │   │   │   │   │
//!   └──────┘             ├──────┼──────┤          ├───┼───┼───┼───┤
//!                        │ 1,0  │ 1,1  │          │   │   │   │   │
//!                        └──────┴──────┘          └───┴───┴───┴───┘
//! ```

use serde::{Deserialize, Serialize};

use super::{SourceRect, TileAddress};
use crate::error::RasterError;

/// Dimensions and tiling of one raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGrid {
    width: u64,
    height: u64,
    tile_width: u32,
    tile_height: u32,
    num_levels: u32,
}

impl TileGrid {
    /// Creates a grid with the natural number of levels for the tile size.
    pub fn new(width: u64, height: u64, tile_width: u32, tile_height: u32) -> Result<Self, RasterError> {
        if width == 0 || height == 0 || tile_width == 0 || tile_height == 0 {
            return Err(RasterError::InvalidRegion(format!(
                "grid {}x{} with {}x{} tiles",
                width, height, tile_width, tile_height
            )));
        }
        Ok(Self {
            width,
            height,
            tile_width,
            tile_height,
            num_levels: Self::level_count(width, height, tile_width, tile_height),
        })
    }

    /// Overrides the number of levels (at least one).
    pub fn with_num_levels(mut self, num_levels: u32) -> Self {
        self.num_levels = num_levels.clamp(1, 63);
        self
    }

    /// Number of levels obtained by halving until one axis fits in a tile.
    pub fn level_count(width: u64, height: u64, tile_width: u32, tile_height: u32) -> u32 {
        let tw = tile_width.max(1) as u64;
        let th = tile_height.max(1) as u64;
        let (mut w, mut h) = (width, height);
        let mut levels = 1;
        while w.div_ceil(tw) > 1 && h.div_ceil(th) > 1 {
            w = (w >> 1).max(1);
            h = (h >> 1).max(1);
            levels += 1;
        }
        levels
    }

    pub fn width(&self) -> u64 {
        self.width
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    pub fn num_levels(&self) -> u32 {
        self.num_levels
    }

    /// Native-resolution level.
    pub fn finest_level(&self) -> u32 {
        self.num_levels - 1
    }

    /// Power-of-two reduction of `level` relative to native resolution.
    pub fn reduction(&self, level: u32) -> u32 {
        self.finest_level().saturating_sub(level)
    }

    /// Level whose reduction is `k`, clamped to the coarsest level.
    pub fn level_for_reduction(&self, k: u32) -> u32 {
        self.finest_level().saturating_sub(k)
    }

    pub fn level_width(&self, level: u32) -> u64 {
        (self.width >> self.reduction(level)).max(1)
    }

    pub fn level_height(&self, level: u32) -> u64 {
        (self.height >> self.reduction(level)).max(1)
    }

    pub fn tiles_x(&self, level: u32) -> u64 {
        self.level_width(level).div_ceil(self.tile_width as u64)
    }

    pub fn tiles_y(&self, level: u32) -> u64 {
        self.level_height(level).div_ceil(self.tile_height as u64)
    }

    pub fn contains(&self, address: TileAddress) -> bool {
        address.level < self.num_levels
            && address.column < self.tiles_x(address.level)
            && address.row < self.tiles_y(address.level)
    }

    /// Pixel width of a tile at `level`; edge tiles may be narrower.
    pub fn tile_width_at(&self, level: u32, column: u64) -> u32 {
        let tw = self.tile_width as u64;
        self.level_width(level).saturating_sub(tw * column).min(tw) as u32
    }

    pub fn tile_height_at(&self, level: u32, row: u64) -> u32 {
        let th = self.tile_height as u64;
        self.level_height(level).saturating_sub(th * row).min(th) as u32
    }

    /// Source-pixel span of one tile at `level`.
    fn pitch_x(&self, level: u32) -> u64 {
        (self.tile_width as u64) << self.reduction(level)
    }

    fn pitch_y(&self, level: u32) -> u64 {
        (self.tile_height as u64) << self.reduction(level)
    }

    pub fn tile_source_x(&self, level: u32, column: u64) -> u64 {
        column * self.pitch_x(level)
    }

    pub fn tile_source_y(&self, level: u32, row: u64) -> u64 {
        row * self.pitch_y(level)
    }

    pub fn tile_source_width(&self, level: u32, column: u64) -> u64 {
        let x = self.tile_source_x(level, column);
        self.pitch_x(level).min(self.width.saturating_sub(x))
    }

    pub fn tile_source_height(&self, level: u32, row: u64) -> u64 {
        let y = self.tile_source_y(level, row);
        self.pitch_y(level).min(self.height.saturating_sub(y))
    }

    /// Column at `level` containing source x.
    pub fn tile_column(&self, level: u32, source_x: u64) -> u64 {
        source_x / self.pitch_x(level)
    }

    /// Row at `level` containing source y.
    pub fn tile_row(&self, level: u32, source_y: u64) -> u64 {
        source_y / self.pitch_y(level)
    }

    /// Source rectangle covered by a tile.
    pub fn tile_source_rect(&self, address: TileAddress) -> SourceRect {
        SourceRect::new(
            self.tile_source_x(address.level, address.column),
            self.tile_source_y(address.level, address.row),
            self.tile_source_width(address.level, address.column),
            self.tile_source_height(address.level, address.row),
        )
    }

    /// Pixel dimensions of a tile at its own level.
    pub fn tile_size(&self, address: TileAddress) -> (u32, u32) {
        (
            self.tile_width_at(address.level, address.column),
            self.tile_height_at(address.level, address.row),
        )
    }

    /// Full-resolution bounds of the image.
    pub fn full_rect(&self) -> SourceRect {
        SourceRect::new(0, 0, self.width, self.height)
    }
}
