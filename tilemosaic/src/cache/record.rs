//! Tile records and quadrant layout.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::source::{pixels, SourceRect, TileAddress, TileGrid};

/// One quarter of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quadrant {
    UpperLeft,
    UpperRight,
    LowerLeft,
    LowerRight,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [
        Quadrant::UpperLeft,
        Quadrant::UpperRight,
        Quadrant::LowerLeft,
        Quadrant::LowerRight,
    ];

    /// Slot in [`TileRecord::parts`].
    pub fn index(self) -> usize {
        match self {
            Quadrant::UpperLeft => 0,
            Quadrant::UpperRight => 1,
            Quadrant::LowerLeft => 2,
            Quadrant::LowerRight => 3,
        }
    }

    /// Presence bit in [`TileRecord::mask`].
    pub fn mask(self) -> u8 {
        match self {
            Quadrant::UpperLeft => 0x01,
            Quadrant::UpperRight => 0x02,
            Quadrant::LowerRight => 0x04,
            Quadrant::LowerLeft => 0x08,
        }
    }

    /// Column offset, 0 or 1.
    pub fn dx(self) -> u64 {
        match self {
            Quadrant::UpperRight | Quadrant::LowerRight => 1,
            _ => 0,
        }
    }

    /// Row offset, 0 or 1.
    pub fn dy(self) -> u64 {
        match self {
            Quadrant::LowerLeft | Quadrant::LowerRight => 1,
            _ => 0,
        }
    }

    /// Quadrant a child tile occupies within its parent.
    pub fn of_child(address: TileAddress) -> Quadrant {
        match (address.row % 2, address.column % 2) {
            (0, 0) => Quadrant::UpperLeft,
            (0, _) => Quadrant::UpperRight,
            (_, 0) => Quadrant::LowerLeft,
            _ => Quadrant::LowerRight,
        }
    }
}

/// Persisted state of one tile: its size, a presence mask, and up to four
/// RGBA8 quadrant blobs in UL, UR, LL, LR order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRecord {
    pub width: u32,
    pub height: u32,
    pub mask: u8,
    pub parts: [Option<Vec<u8>>; 4],
}

impl TileRecord {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// True when the quadrant is flagged and its blob has the expected size.
    pub fn has(&self, quadrant: Quadrant, layout: &QuadLayout) -> bool {
        let (w, h) = layout.part_size(quadrant);
        self.mask & quadrant.mask() != 0
            && self.parts[quadrant.index()]
                .as_ref()
                .is_some_and(|p| p.len() == (w as usize) * (h as usize) * 4)
    }

    pub fn part(&self, quadrant: Quadrant, layout: &QuadLayout) -> Option<RgbaImage> {
        if !self.has(quadrant, layout) {
            return None;
        }
        let (w, h) = layout.part_size(quadrant);
        let bytes = self.parts[quadrant.index()].clone()?;
        RgbaImage::from_raw(w, h, bytes)
    }

    /// Adds a quadrant unless a valid one is already present.
    ///
    /// Returns whether the record changed.
    pub fn insert(&mut self, quadrant: Quadrant, part: &RgbaImage, layout: &QuadLayout) -> bool {
        if self.has(quadrant, layout) || part.dimensions() != layout.part_size(quadrant) {
            return false;
        }
        self.parts[quadrant.index()] = Some(part.as_raw().clone());
        self.mask |= quadrant.mask();
        true
    }

    /// True when every quadrant the layout requires is present.
    pub fn is_complete(&self, layout: &QuadLayout) -> bool {
        layout.required().all(|q| self.has(q, layout))
    }

    /// Decoded quadrants, indexed by [`Quadrant::index`].
    pub fn decode(&self, layout: &QuadLayout) -> [Option<RgbaImage>; 4] {
        Quadrant::ALL.map(|q| self.part(q, layout))
    }
}

/// Pixel and source geometry of one tile's quadrants.
///
/// Quadrants split at half the nominal tile size, so an edge tile narrower
/// than half a tile needs only its left (or upper) quadrants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuadLayout {
    pub address: TileAddress,
    pub width: u32,
    pub height: u32,
    half_width: u32,
    half_height: u32,
    source: SourceRect,
    sub_pitch_x: u64,
    sub_pitch_y: u64,
}

impl QuadLayout {
    pub fn for_tile(grid: &TileGrid, address: TileAddress) -> Self {
        let (width, height) = grid.tile_size(address);
        let half_width = (grid.tile_width() / 2).max(1);
        let half_height = (grid.tile_height() / 2).max(1);
        let k = grid.reduction(address.level);

        Self {
            address,
            width,
            height,
            half_width,
            half_height,
            source: grid.tile_source_rect(address),
            sub_pitch_x: (half_width as u64) << k,
            sub_pitch_y: (half_height as u64) << k,
        }
    }

    pub fn requires(&self, quadrant: Quadrant) -> bool {
        (quadrant.dx() == 0 || self.width > self.half_width)
            && (quadrant.dy() == 0 || self.height > self.half_height)
    }

    /// Quadrants this tile needs, in UL, UR, LL, LR order.
    pub fn required(&self) -> impl Iterator<Item = Quadrant> + '_ {
        Quadrant::ALL.into_iter().filter(|q| self.requires(*q))
    }

    pub fn part_size(&self, quadrant: Quadrant) -> (u32, u32) {
        let w = if quadrant.dx() == 0 {
            self.width.min(self.half_width)
        } else {
            self.width.saturating_sub(self.half_width)
        };
        let h = if quadrant.dy() == 0 {
            self.height.min(self.half_height)
        } else {
            self.height.saturating_sub(self.half_height)
        };
        (w, h)
    }

    /// Offset of the quadrant inside the tile.
    pub fn part_origin(&self, quadrant: Quadrant) -> (u32, u32) {
        (
            quadrant.dx() as u32 * self.half_width,
            quadrant.dy() as u32 * self.half_height,
        )
    }

    /// Native-resolution source pixels covered by the quadrant.
    pub fn part_source_rect(&self, quadrant: Quadrant) -> SourceRect {
        let x = self.source.x + quadrant.dx() * self.sub_pitch_x;
        let y = self.source.y + quadrant.dy() * self.sub_pitch_y;
        SourceRect::new(
            x,
            y,
            self.sub_pitch_x.min(self.source.right().saturating_sub(x)),
            self.sub_pitch_y.min(self.source.bottom().saturating_sub(y)),
        )
    }

    /// Assembles the full tile, or `None` if a required quadrant is missing.
    pub fn composite(&self, parts: &[Option<RgbaImage>; 4]) -> Option<RgbaImage> {
        let mut tile = RgbaImage::new(self.width, self.height);
        for quadrant in self.required() {
            let part = parts[quadrant.index()].as_ref()?;
            let (x, y) = self.part_origin(quadrant);
            pixels::blit(&mut tile, part, x, y);
        }
        Some(tile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> TileGrid {
        // Level 1 is native 600x400, level 0 is 300x200
        TileGrid::new(600, 400, 256, 256).unwrap()
    }

    #[test]
    fn test_masks_and_indices() {
        let masks: Vec<u8> = Quadrant::ALL.iter().map(|q| q.mask()).collect();
        assert_eq!(masks, vec![0x01, 0x02, 0x08, 0x04]);
        let indices: Vec<usize> = Quadrant::ALL.iter().map(|q| q.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_of_child() {
        assert_eq!(Quadrant::of_child(TileAddress::new(2, 4, 6)), Quadrant::UpperLeft);
        assert_eq!(Quadrant::of_child(TileAddress::new(2, 4, 7)), Quadrant::UpperRight);
        assert_eq!(Quadrant::of_child(TileAddress::new(2, 5, 6)), Quadrant::LowerLeft);
        assert_eq!(Quadrant::of_child(TileAddress::new(2, 5, 7)), Quadrant::LowerRight);
    }

    #[test]
    fn test_full_tile_needs_four_parts() {
        let layout = QuadLayout::for_tile(&grid(), TileAddress::new(0, 0, 0));
        assert_eq!((layout.width, layout.height), (256, 200));
        assert_eq!(layout.required().count(), 4);
        assert_eq!(layout.part_size(Quadrant::LowerRight), (128, 72));
        assert_eq!(
            layout.part_source_rect(Quadrant::LowerRight),
            SourceRect::new(256, 256, 256, 144)
        );
    }

    #[test]
    fn test_narrow_edge_tile_needs_left_parts_only() {
        // Native column 2 is 600 - 512 = 88 px wide
        let layout = QuadLayout::for_tile(&grid(), TileAddress::new(1, 0, 2));
        let required: Vec<Quadrant> = layout.required().collect();
        assert_eq!(required, vec![Quadrant::UpperLeft, Quadrant::LowerLeft]);
        assert_eq!(layout.part_size(Quadrant::UpperLeft), (88, 128));
    }

    #[test]
    fn test_insert_never_overwrites() {
        let layout = QuadLayout::for_tile(&grid(), TileAddress::new(1, 0, 2));
        let mut record = TileRecord::new(layout.width, layout.height);

        let red = RgbaImage::from_pixel(88, 128, image::Rgba([255, 0, 0, 255]));
        let blue = RgbaImage::from_pixel(88, 128, image::Rgba([0, 0, 255, 255]));

        assert!(record.insert(Quadrant::UpperLeft, &red, &layout));
        assert!(!record.insert(Quadrant::UpperLeft, &blue, &layout));
        assert_eq!(record.mask, 0x01);
        assert_eq!(record.part(Quadrant::UpperLeft, &layout), Some(red));
        assert!(!record.is_complete(&layout));
    }

    #[test]
    fn test_wrong_size_part_rejected() {
        let layout = QuadLayout::for_tile(&grid(), TileAddress::new(1, 0, 0));
        let mut record = TileRecord::new(layout.width, layout.height);
        let wrong = RgbaImage::new(10, 10);
        assert!(!record.insert(Quadrant::UpperLeft, &wrong, &layout));
        assert_eq!(record.mask, 0);
    }

    #[test]
    fn test_composite_places_parts() {
        let layout = QuadLayout::for_tile(&grid(), TileAddress::new(1, 0, 0));
        let mut parts: [Option<RgbaImage>; 4] = Default::default();
        for q in layout.required() {
            let (w, h) = layout.part_size(q);
            let shade = q.index() as u8 * 50;
            parts[q.index()] = Some(RgbaImage::from_pixel(w, h, image::Rgba([shade, 0, 0, 255])));
        }

        let tile = layout.composite(&parts).unwrap();
        assert_eq!(tile.get_pixel(0, 0)[0], 0);
        assert_eq!(tile.get_pixel(200, 10)[0], 50);
        assert_eq!(tile.get_pixel(10, 200)[0], 100);
        assert_eq!(tile.get_pixel(200, 200)[0], 150);

        parts[3] = None;
        assert!(layout.composite(&parts).is_none());
    }
}
