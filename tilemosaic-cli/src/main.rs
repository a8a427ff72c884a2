//! tilemosaic CLI - Command-line interface
//!
//! Inspects tiled images, extracts tiles through the disk cache and runs
//! mosaic selection against a frame catalog.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tilemosaic::config::{config_file_path, ConfigFile};
use tilemosaic::logging::init_logging;

use commands::cache::CacheAction;
use commands::config::ConfigAction;
use commands::locate::LocateArgs;
use commands::query::QueryArgs;
use commands::tile::TileArgs;
use commands::view::ViewArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "tilemosaic")]
#[command(version, about = "Tiled raster imagery and mosaic selection", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.tilemosaic/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the tile pyramid of an image
    Info {
        /// Source image
        image: PathBuf,
    },
    /// Extract one tile to an image file
    Tile(TileArgs),
    /// Select catalog frames for a view
    Query(QueryArgs),
    /// Convert between pixel and ground coordinates of a frame
    Locate(LocateArgs),
    /// Run the mosaic service for a view
    View(ViewArgs),
    /// Tile cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.unwrap_or_else(config_file_path);

    // Config commands must work even when the file is invalid.
    if let Commands::Config { action } = cli.command {
        return commands::config::run(&config_path, action);
    }

    let config = ConfigFile::load_from(&config_path)?;
    let _logging = init_logging(&config.logging.directory, &config.logging.file)
        .map_err(CliError::LoggingInit)?;

    match cli.command {
        Commands::Info { image } => commands::info::run(&config, &image),
        Commands::Tile(args) => commands::tile::run(&config, args),
        Commands::Query(args) => commands::query::run(&config, args),
        Commands::Locate(args) => commands::locate::run(&config, args),
        Commands::View(args) => commands::view::run(&config, args),
        Commands::Cache { action } => commands::cache::run(&config, action),
        Commands::Config { .. } => Ok(()),
    }
}
