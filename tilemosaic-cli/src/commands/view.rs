//! Runs the mosaic service for one view and reports what it would draw.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tilemosaic::config::ConfigFile;
use tilemosaic::mosaic::{Region, SelectionMode};
use tilemosaic::service::{MosaicService, MosaicServiceConfig, ViewRequest};
use tracing::info;

use super::common::{load_catalog, parse_bbox, registry};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct ViewArgs {
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

    /// Seconds to wait for the service
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// Open frames without the tile cache
    #[arg(long)]
    pub no_cache: bool,
}

pub fn run(config: &ConfigFile, args: ViewArgs) -> Result<(), CliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    runtime.block_on(view(config, args))
}

async fn view(config: &ConfigFile, args: ViewArgs) -> Result<(), CliError> {
    let catalog = load_catalog(config, args.catalog.as_deref())?;
    let service_config = if args.no_cache {
        MosaicServiceConfig {
            cache_directory: None,
            ..config.service_config()
        }
    } else {
        config.service_config()
    };

    let (service, mut releases) =
        MosaicService::start(service_config, Arc::new(catalog), registry(config));
    let mut snapshots = service.subscribe();

    let types = (!args.imagery_types.is_empty()).then(|| args.imagery_types.clone());
    service.request(
        ViewRequest::new(args.bbox, args.gsd)
            .with_mode(args.mode)
            .with_imagery_types(types),
    );

    let waited = tokio::time::timeout(Duration::from_secs(args.timeout), async {
        loop {
            if snapshots.borrow_and_update().generation > 0 {
                return true;
            }
            if snapshots.changed().await.is_err() {
                return false;
            }
        }
    })
    .await;
    if !matches!(waited, Ok(true)) {
        service.shutdown().await;
        return Err(CliError::Interrupted(
            "no snapshot from the mosaic service".to_string(),
        ));
    }

    let snapshot = service.snapshot();
    println!("{} frame(s) to draw, back to front:", snapshot.items.len());
    for item in &snapshot.items {
        let grid = item.source.grid();
        println!(
            "  {:>5}  {:>8.2} m  {} x {}  {}",
            item.handle.to_string(),
            item.frame.min_gsd,
            grid.width(),
            grid.height(),
            item.frame.path.display()
        );
    }
    for path in service.unavailable() {
        println!("  unavailable: {}", path.display());
    }

    // Stand in for a renderer that draws everything it was given.
    for item in &snapshot.items {
        service.mark_resolved(item.handle);
    }
    while let Ok(notice) = releases.try_recv() {
        info!(handle = %notice.handle, path = %notice.frame.path.display(), "Frame released");
    }

    service.shutdown().await;
    Ok(())
}
