//! Configuration file commands.

use std::path::Path;

use clap::Subcommand;
use tilemosaic::config::ConfigFile;

use crate::error::CliError;

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the configuration file location
    Path,
    /// Print the effective configuration
    Show,
}

pub fn run(path: &Path, action: ConfigAction) -> Result<(), CliError> {
    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                println!("Config file already exists: {}", path.display());
                println!("Use --force to overwrite it with defaults.");
                return Ok(());
            }
            ConfigFile::default().save_to(path)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
        ConfigAction::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = ConfigFile::load_from(path)?;
            println!("{:#?}", config);
            Ok(())
        }
    }
}
