//! CLI error handling with user-friendly messages.

use std::fmt;
use std::path::PathBuf;
use std::process;

use tilemosaic::config::ConfigFileError;
use tilemosaic::RasterError;

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(std::io::Error),
    /// Configuration file could not be read or written
    Config(ConfigFileError),
    /// A raster, cache or catalog operation failed
    Raster(RasterError),
    /// No catalog given on the command line or in the config
    NoCatalog,
    /// Frame path not present in the catalog
    UnknownFrame(PathBuf),
    /// Failed to write an output image
    ImageWrite { path: PathBuf, error: image::ImageError },
    /// Cache directory maintenance failed
    CacheDirectory { path: PathBuf, error: std::io::Error },
    /// Async runtime could not be started
    Runtime(std::io::Error),
    /// The request was canceled or timed out
    Interrupted(String),
}

impl CliError {
    /// Prints the error and exits with status 1.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::NoCatalog => {
                eprintln!();
                eprintln!("Pass --catalog <file.json> or set it in the config file:");
                eprintln!("  [mosaic]");
                eprintln!("  catalog = ~/imagery/frames.json");
            }
            CliError::Config(ConfigFileError::InvalidValue { .. }) => {
                eprintln!();
                eprintln!("Run 'tilemosaic config path' to locate the file.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Raster(e) => write!(f, "{}", e),
            CliError::NoCatalog => write!(f, "No frame catalog configured"),
            CliError::UnknownFrame(path) => {
                write!(f, "Frame '{}' is not in the catalog", path.display())
            }
            CliError::ImageWrite { path, error } => {
                write!(f, "Failed to write image '{}': {}", path.display(), error)
            }
            CliError::CacheDirectory { path, error } => {
                write!(f, "Cache directory '{}': {}", path.display(), error)
            }
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::Interrupted(msg) => write!(f, "Interrupted: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::LoggingInit(e) => Some(e),
            CliError::Config(e) => Some(e),
            CliError::Raster(e) => Some(e),
            CliError::ImageWrite { error, .. } => Some(error),
            CliError::CacheDirectory { error, .. } => Some(error),
            CliError::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RasterError> for CliError {
    fn from(e: RasterError) -> Self {
        CliError::Raster(e)
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}
