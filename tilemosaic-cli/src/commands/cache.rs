//! Tile cache maintenance.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::Subcommand;
use tilemosaic::cache::{DiskTileStore, TileStore};
use tilemosaic::config::ConfigFile;
use tilemosaic::service::cache_key;

use super::common::registry;
use crate::error::CliError;

#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Remove cached tiles, for one image or for everything
    Clear {
        /// Only clear the cache of this image
        image: Option<PathBuf>,
    },
    /// Show cache size
    Stats,
}

pub fn run(config: &ConfigFile, action: CacheAction) -> Result<(), CliError> {
    let cache_dir = &config.cache.directory;

    match action {
        CacheAction::Clear { image: Some(image) } => {
            let source = registry(config).open(&image)?;
            let dir = cache_dir.join(cache_key(&image));
            DiskTileStore::open(&dir, source.uri(), *source.grid())?.clear()?;
            println!("Cleared tile cache for {}", image.display());
            Ok(())
        }
        CacheAction::Clear { image: None } => {
            println!("Clearing tile cache at: {}", cache_dir.display());
            if !cache_dir.exists() {
                return Ok(());
            }
            let (records, bytes) = usage(cache_dir).map_err(|error| cache_error(cache_dir, error))?;
            fs::remove_dir_all(cache_dir).map_err(|error| cache_error(cache_dir, error))?;
            println!("Deleted {} tile record(s), freed {}", records, format_bytes(bytes));
            Ok(())
        }
        CacheAction::Stats => {
            println!("Tile cache: {}", cache_dir.display());
            let (records, bytes) = if cache_dir.exists() {
                usage(cache_dir).map_err(|error| cache_error(cache_dir, error))?
            } else {
                (0, 0)
            };
            println!("  Records: {}", records);
            println!("  Size:    {}", format_bytes(bytes));
            Ok(())
        }
    }
}

fn cache_error(path: &Path, error: io::Error) -> CliError {
    CliError::CacheDirectory {
        path: path.to_path_buf(),
        error,
    }
}

/// Tile records and total bytes under `dir`.
fn usage(dir: &Path) -> io::Result<(u64, u64)> {
    let mut records = 0;
    let mut bytes = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            let (r, b) = usage(&entry.path())?;
            records += r;
            bytes += b;
        } else {
            if entry.path().extension().is_some_and(|e| e == "tile") {
                records += 1;
            }
            bytes += meta.len();
        }
    }
    Ok((records, bytes))
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
