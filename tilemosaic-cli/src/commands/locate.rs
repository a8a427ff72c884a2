//! Pixel/ground conversion for a catalogued frame.

use std::path::PathBuf;

use clap::Args;
use tilemosaic::config::ConfigFile;
use tilemosaic::coord::{Convergence, CoordinateModel, GroundPoint, ImagePoint};

use super::common::{load_catalog, registry};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct LocateArgs {
    /// Frame path as listed in the catalog
    pub frame: PathBuf,

    /// Frame catalog (JSON); defaults to [mosaic] catalog
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Image position x,y in pixels
    #[arg(long, value_parser = parse_pair, allow_hyphen_values = true, conflicts_with = "ground")]
    pub pixel: Option<(f64, f64)>,

    /// Ground position lon,lat
    #[arg(long, value_parser = parse_pair, allow_hyphen_values = true, required_unless_present = "pixel")]
    pub ground: Option<(f64, f64)>,
}

pub fn run(config: &ConfigFile, args: LocateArgs) -> Result<(), CliError> {
    let catalog = load_catalog(config, args.catalog.as_deref())?;
    let frame = catalog
        .frames()
        .into_iter()
        .find(|f| f.path == args.frame)
        .ok_or_else(|| CliError::UnknownFrame(args.frame.clone()))?;

    let source = registry(config).open(&frame.path)?;
    let grid = source.grid();
    let model = match frame.coordinate_model(grid.width() as u32, grid.height() as u32)? {
        CoordinateModel::Rpc(rpc) => CoordinateModel::Rpc(config.tune_rpc(rpc)),
        affine => affine,
    };
    let kind = if model.is_precise() { "rpc" } else { "affine" };

    if let Some((x, y)) = args.pixel {
        let estimate = model.inverse(ImagePoint::new(x, y))?;
        println!(
            "pixel ({}, {}) -> ground ({:.8}, {:.8}) [{}]",
            x, y, estimate.point.x, estimate.point.y, kind
        );
        match estimate.convergence {
            Convergence::Exact => {}
            Convergence::Converged { iterations } => {
                println!("  converged in {} iteration(s)", iterations)
            }
            Convergence::BestEffort {
                residual,
                iterations,
            } => println!(
                "  best effort after {} iteration(s), residual {:.3e} px",
                iterations, residual
            ),
        }
    }
    if let Some((lon, lat)) = args.ground {
        let pixel = model.forward(GroundPoint::new(lon, lat))?;
        println!(
            "ground ({}, {}) -> pixel ({:.3}, {:.3}) [{}]",
            lon, lat, pixel.x, pixel.y, kind
        );
    }
    Ok(())
}

fn parse_pair(value: &str) -> Result<(f64, f64), String> {
    let (a, b) = value
        .split_once(',')
        .ok_or_else(|| "expected two comma-separated numbers".to_string())?;
    let parse = |s: &str| s.trim().parse::<f64>().map_err(|e| e.to_string());
    Ok((parse(a)?, parse(b)?))
}
