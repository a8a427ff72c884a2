//! Image pyramid summary.

use std::path::Path;

use tilemosaic::config::ConfigFile;

use super::common::registry;
use crate::error::CliError;

pub fn run(config: &ConfigFile, image: &Path) -> Result<(), CliError> {
    let source = registry(config).open(image)?;
    let grid = *source.grid();

    println!("Image:  {}", source.uri());
    println!("Size:   {} x {}", grid.width(), grid.height());
    println!("Tiles:  {} x {}", grid.tile_width(), grid.tile_height());
    println!("Levels: {}", grid.num_levels());
    println!();
    println!("  level  reduction  size           tiles");
    for level in 0..grid.num_levels() {
        println!(
            "  {:>5}  {:>9}  {:>13}  {} x {}",
            level,
            format!("1/{}", 1u64 << grid.reduction(level)),
            format!("{} x {}", grid.level_width(level), grid.level_height(level)),
            grid.tiles_x(level),
            grid.tiles_y(level),
        );
    }
    Ok(())
}
