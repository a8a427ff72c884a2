//! Version-arbitrated composite of several readers.

use std::sync::Arc;

use image::RgbaImage;
use tokio_util::sync::CancellationToken;

use super::{ReadOutcome, TileAddress, TileGrid, TileSource};
use crate::error::RasterError;

/// Several readers over the same grid, e.g. a base file plus update layers.
///
/// Each tile is served by the reader reporting the highest
/// [`tile_version`](TileSource::tile_version) at that address. Ties go to the
/// reader registered first, so results are reproducible.
pub struct CompositeSource {
    uri: String,
    grid: TileGrid,
    readers: Vec<Arc<dyn TileSource>>,
}

impl CompositeSource {
    pub fn new(uri: impl Into<String>, readers: Vec<Arc<dyn TileSource>>) -> Result<Self, RasterError> {
        let uri = uri.into();
        let first = readers
            .first()
            .ok_or_else(|| RasterError::unavailable(&uri, "composite has no readers"))?;
        let grid = *first.grid();

        if let Some(mismatch) = readers.iter().find(|r| *r.grid() != grid) {
            return Err(RasterError::InvalidRegion(format!(
                "reader {} grid {:?} does not match {:?}",
                mismatch.uri(),
                mismatch.grid(),
                grid
            )));
        }

        Ok(Self { uri, grid, readers })
    }

    pub fn readers(&self) -> &[Arc<dyn TileSource>] {
        &self.readers
    }

    /// Reader chosen for `address`.
    pub fn select(&self, address: TileAddress) -> &Arc<dyn TileSource> {
        let mut best = &self.readers[0];
        let mut best_version = best.tile_version(address);
        for reader in &self.readers[1..] {
            let version = reader.tile_version(address);
            if version > best_version {
                best = reader;
                best_version = version;
            }
        }
        best
    }
}

impl TileSource for CompositeSource {
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
        self.select(address).read_tile(address, cancel)
    }

    fn tile_version(&self, address: TileAddress) -> u64 {
        self.readers
            .iter()
            .map(|r| r.tile_version(address))
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::test_support::PatternSource;

    fn layer(version: u64, tint: u8) -> Arc<dyn TileSource> {
        Arc::new(PatternSource::new(64, 64, 32).with_version(version, tint))
    }

    #[test]
    fn test_highest_version_wins() {
        let composite =
            CompositeSource::new("composite", vec![layer(1, 10), layer(3, 30), layer(2, 20)])
                .unwrap();
        let cancel = CancellationToken::new();

        let tile = composite
            .read_tile(TileAddress::new(1, 0, 0), &cancel)
            .unwrap()
            .complete()
            .unwrap();

        assert_eq!(tile.get_pixel(0, 0)[2], 30);
        assert_eq!(composite.tile_version(TileAddress::new(1, 0, 0)), 3);
    }

    #[test]
    fn test_tie_goes_to_first_reader() {
        let composite =
            CompositeSource::new("composite", vec![layer(5, 11), layer(5, 22)]).unwrap();
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            let tile = composite
                .read_tile(TileAddress::new(0, 0, 0), &cancel)
                .unwrap()
                .complete()
                .unwrap();
            assert_eq!(tile.get_pixel(0, 0)[2], 11);
        }
    }

    #[test]
    fn test_empty_composite_unavailable() {
        let result = CompositeSource::new("empty", Vec::new());
        assert!(matches!(result, Err(RasterError::SourceUnavailable { .. })));
    }

    #[test]
    fn test_grid_mismatch_rejected() {
        let other: Arc<dyn TileSource> = Arc::new(PatternSource::new(128, 64, 32));
        let result = CompositeSource::new("mixed", vec![layer(0, 0), other]);
        assert!(matches!(result, Err(RasterError::InvalidRegion(_))));
    }
}
