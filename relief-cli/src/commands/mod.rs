use anyhow::{bail, Context, Result};
use relief::{ElevationService, ElevationServiceBuilder};
use std::path::PathBuf;

pub mod fill;
pub mod list;
pub mod query;
pub mod tiles;

/// Service configuration shared by every subcommand.
pub struct ServiceArgs {
    pub tile_dir: Option<PathBuf>,
    pub index: Option<PathBuf>,
    pub datum_dir: Option<PathBuf>,
    pub cache_ttl_ms: i64,
}

/// Build the service and block until its startup scan finishes.
pub fn build_service(args: ServiceArgs) -> Result<ElevationService> {
    let Some(tile_dir) = args.tile_dir else {
        bail!("RELIEF_TILE_DIR environment variable not set. Use --tile-dir or set RELIEF_TILE_DIR");
    };

    let mut builder = ElevationServiceBuilder::new()
        .tile_dir(tile_dir)
        .cache_ttl_ms(args.cache_ttl_ms);
    if let Some(index) = args.index {
        builder = builder.index_path(index);
    }
    if let Some(datum_dir) = args.datum_dir {
        builder = builder.datum_dir(datum_dir);
    }

    let service = builder.build().context("Failed to create elevation service")?;
    service
        .wait_until_ready()
        .context("Elevation service failed to start")?;
    Ok(service)
}
