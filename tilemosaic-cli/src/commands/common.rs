//! Helpers shared across commands.

use std::path::{Path, PathBuf};

use tilemosaic::config::ConfigFile;
use tilemosaic::mosaic::{MemoryCatalog, Region};
use tilemosaic::source::ReaderRegistry;

use crate::error::CliError;

/// Reader registry using the configured tile size.
pub fn registry(config: &ConfigFile) -> ReaderRegistry {
    ReaderRegistry::with_defaults().with_options(config.reader_options())
}

/// Loads the catalog from `--catalog`, else from `[mosaic] catalog`.
pub fn load_catalog(config: &ConfigFile, path: Option<&Path>) -> Result<MemoryCatalog, CliError> {
    let path: PathBuf = path
        .map(Path::to_path_buf)
        .or_else(|| config.mosaic.catalog.clone())
        .ok_or(CliError::NoCatalog)?;
    let catalog = config.empty_catalog();
    catalog.extend_from_json(&path)?;
    Ok(catalog)
}

/// Parses `west,south,east,north`.
pub fn parse_bbox(value: &str) -> Result<Region, String> {
    let parts: Vec<f64> = value
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid number in bbox: {}", e))?;
    let [west, south, east, north] = parts[..] else {
        return Err("expected west,south,east,north".to_string());
    };
    Region::new(west, south, east, north).map_err(|e| e.to_string())
}
