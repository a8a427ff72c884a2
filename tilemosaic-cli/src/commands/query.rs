//! Frame selection for a view.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tilemosaic::config::ConfigFile;
use tilemosaic::mosaic::{MosaicQuery, MosaicResolver, Region, SelectionMode};

use super::common::{load_catalog, parse_bbox};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Frame catalog (JSON); defaults to [mosaic] catalog
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// View as west,south,east,north in degrees
    #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
    pub bbox: Region,

    /// Target ground sample distance in meters
    #[arg(long)]
    pub gsd: f64,

    /// Resolution mode: max, min or ignore
    #[arg(long, default_value = "max")]
    pub mode: SelectionMode,

    /// Only frames of this imagery type (repeatable)
    #[arg(long = "type")]
    pub imagery_types: Vec<String>,

    /// Print the selection as a JSON catalog
    #[arg(long)]
    pub json: bool,
}

impl QueryArgs {
    pub fn imagery_types(&self) -> Option<Vec<String>> {
        (!self.imagery_types.is_empty()).then(|| self.imagery_types.clone())
    }
}

pub fn run(config: &ConfigFile, args: QueryArgs) -> Result<(), CliError> {
    let catalog = load_catalog(config, args.catalog.as_deref())?;
    let resolver =
        MosaicResolver::new(Arc::new(catalog)).with_buffer_pixels(config.mosaic.buffer_pixels);

    let query = MosaicQuery::new(args.bbox, args.gsd)
        .with_mode(args.mode)
        .with_imagery_types(args.imagery_types());
    let frames = resolver.query(&query)?;

    if args.json {
        let document = serde_json::json!({ "frames": frames });
        println!("{:#}", document);
        return Ok(());
    }

    println!("{} frame(s), mode {}, target {} m", frames.len(), args.mode, args.gsd);
    for frame in &frames {
        println!(
            "  {:<10} {:>8.2} m  {}",
            frame.imagery_type,
            frame.min_gsd,
            frame.path.display()
        );
    }
    Ok(())
}
