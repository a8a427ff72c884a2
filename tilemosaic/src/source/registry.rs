//! Explicit registry of reader factories.
//!
//! The application builds one [`ReaderRegistry`] at startup and passes it to
//! whatever needs to open frames. There is no process-wide registration.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::{CompositeSource, SingleFileSource, TileSource};
use crate::error::RasterError;

/// Default tile edge in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Image extensions handled by the built-in file reader.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp", "webp"];

/// Options handed to every factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    pub tile_width: u32,
    pub tile_height: u32,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
        }
    }
}

/// Creates a reader for a path.
pub type ReaderFactory =
    Arc<dyn Fn(&Path, &ReaderOptions) -> Result<Arc<dyn TileSource>, RasterError> + Send + Sync>;

/// Maps lower-case file extensions to reader factories.
#[derive(Clone)]
pub struct ReaderRegistry {
    factories: HashMap<String, ReaderFactory>,
    options: ReaderOptions,
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ReaderRegistry {
    /// Registry with no factories.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            options: ReaderOptions::default(),
        }
    }

    /// Registry with the built-in image file reader.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        let factory: ReaderFactory = Arc::new(open_image_file);
        for ext in IMAGE_EXTENSIONS {
            registry.register(ext, Arc::clone(&factory));
        }
        registry
    }

    pub fn with_options(mut self, options: ReaderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Registers (or replaces) the factory for an extension.
    pub fn register(&mut self, extension: &str, factory: ReaderFactory) {
        self.factories.insert(extension.to_ascii_lowercase(), factory);
    }

    pub fn supports(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.factories.contains_key(&ext))
    }

    /// Opens a reader for `path` using its extension.
    pub fn open(&self, path: &Path) -> Result<Arc<dyn TileSource>, RasterError> {
        let uri = path.display().to_string();
        let factory = extension_of(path)
            .and_then(|ext| self.factories.get(&ext))
            .ok_or_else(|| RasterError::unavailable(&uri, "no reader registered for extension"))?;
        factory(path, &self.options)
    }

    /// Opens every path and combines them; later paths are update layers only
    /// when their readers report higher tile versions.
    pub fn open_composite(&self, uri: &str, paths: &[&Path]) -> Result<CompositeSource, RasterError> {
        let readers = paths
            .iter()
            .map(|p| self.open(p))
            .collect::<Result<Vec<_>, _>>()?;
        CompositeSource::new(uri, readers)
    }
}

fn open_image_file(path: &Path, options: &ReaderOptions) -> Result<Arc<dyn TileSource>, RasterError> {
    let source = SingleFileSource::open(path, options.tile_width, options.tile_height)?;
    Ok(Arc::new(source))
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}
