//! Reader for one image file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbaImage;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{pixels, ReadOutcome, TileAddress, TileGrid, TileSource};
use crate::error::RasterError;

/// A raster backed by a single image decoded with the `image` crate.
///
/// Opening reads only the header; the pixels are decoded on the first tile
/// read and kept for the life of the source.
pub struct SingleFileSource {
    uri: String,
    path: Option<PathBuf>,
    grid: TileGrid,
    version: u64,
    decoded: Mutex<Option<Arc<RgbaImage>>>,
}

impl SingleFileSource {
    /// Opens an image file, failing with `SourceUnavailable` if its header
    /// cannot be read.
    pub fn open(path: &Path, tile_width: u32, tile_height: u32) -> Result<Self, RasterError> {
        let uri = path.display().to_string();
        let (width, height) =
            image::image_dimensions(path).map_err(|e| RasterError::unavailable(&uri, e))?;
        let grid = TileGrid::new(width as u64, height as u64, tile_width, tile_height)?;

        Ok(Self {
            uri,
            path: Some(path.to_path_buf()),
            grid,
            version: 0,
            decoded: Mutex::new(None),
        })
    }

    /// Wraps an already decoded image.
    pub fn from_image(
        uri: impl Into<String>,
        image: RgbaImage,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<Self, RasterError> {
        let grid = TileGrid::new(
            image.width() as u64,
            image.height() as u64,
            tile_width,
            tile_height,
        )?;
        Ok(Self {
            uri: uri.into(),
            path: None,
            grid,
            version: 0,
            decoded: Mutex::new(Some(Arc::new(image))),
        })
    }

    /// Version reported for every tile of this file.
    pub fn with_tile_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn pixels(&self) -> Result<Arc<RgbaImage>, RasterError> {
        let mut guard = self.decoded.lock();
        if let Some(image) = guard.as_ref() {
            return Ok(Arc::clone(image));
        }

        let path = self
            .path
            .as_ref()
            .ok_or_else(|| RasterError::unavailable(&self.uri, "no backing file"))?;
        debug!(uri = %self.uri, "Decoding source image");
        let image = Arc::new(
            image::open(path)
                .map_err(|e| RasterError::unavailable(&self.uri, e))?
                .to_rgba8(),
        );
        *guard = Some(Arc::clone(&image));
        Ok(image)
    }
}

impl TileSource for SingleFileSource {
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

        let full = self.pixels()?;
        let rect = self.grid.tile_source_rect(address);
        let (width, height) = self.grid.tile_size(address);

        let region = pixels::crop(
            &full,
            rect.x as u32,
            rect.y as u32,
            rect.width as u32,
            rect.height as u32,
        );
        Ok(ReadOutcome::Complete(pixels::resample(&region, width, height)))
    }

    fn tile_version(&self, _address: TileAddress) -> u64 {
        self.version
    }
}
