//! Single tile extraction.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tilemosaic::cache::{DiskTileStore, TileCache};
use tilemosaic::config::ConfigFile;
use tilemosaic::service::cache_key;
use tilemosaic::source::{ReadOutcome, TileAddress};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::common::registry;
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct TileArgs {
    /// Source image
    pub image: PathBuf,

    /// Pyramid level, 0 is coarsest (default: full resolution)
    #[arg(long)]
    pub level: Option<u32>,

    #[arg(long, default_value = "0")]
    pub row: u64,

    #[arg(long, default_value = "0")]
    pub col: u64,

    /// Output image (format from extension)
    #[arg(long, short)]
    pub output: PathBuf,

    /// Read through the disk tile cache
    #[arg(long)]
    pub cache: bool,
}

pub fn run(config: &ConfigFile, args: TileArgs) -> Result<(), CliError> {
    let source = registry(config).open(&args.image)?;
    let grid = *source.grid();
    let address = TileAddress::new(
        args.level.unwrap_or_else(|| grid.finest_level()),
        args.row,
        args.col,
    );
    let cancel = CancellationToken::new();

    let outcome = if args.cache {
        let dir = config.cache.directory.join(cache_key(&args.image));
        let store = DiskTileStore::open(&dir, source.uri(), grid)?;
        let cache = TileCache::with_config(source, Arc::new(store), config.tile_cache_config());
        let outcome = cache.get(address, &cancel)?;

        let stats = cache.stats();
        info!(
            tile = %address,
            source_reads = stats.source_reads,
            derived = stats.derived_parts,
            hits = stats.part_hits,
            "Cached tile read"
        );
        outcome
    } else {
        source.read_tile(address, &cancel)?
    };

    let ReadOutcome::Complete(tile) = outcome else {
        return Err(CliError::Interrupted(format!("tile {} canceled", address)));
    };
    tile.save(&args.output).map_err(|error| CliError::ImageWrite {
        path: args.output.clone(),
        error,
    })?;

    println!(
        "Wrote {} ({} x {}) to {}",
        address,
        tile.width(),
        tile.height(),
        args.output.display()
    );
    Ok(())
}
