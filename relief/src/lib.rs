//! Elevation lookups over a directory of raster elevation tiles.
//!
//! `relief` maintains a catalog of GeoTIFF tiles (optionally wrapped in zip,
//! tar or tar.gz archives), answers point elevation queries against them and
//! fills elevations into batches of track points. Tile geometry is derived
//! from each raster's own georeferencing on first open and persisted in a
//! JSON index, so restarts only decode rasters that are new to the
//! directory. Decoded datasets are cached per tile and closed again after a
//! configurable idle TTL.
//!
//! ```no_run
//! use relief::ElevationService;
//!
//! let service = ElevationService::builder()
//!     .tile_dir("/var/lib/relief/tiles")
//!     .build()?;
//!
//! if let Some(elevation) = service.get_elevation(-0.5, 50.5)? {
//!     println!("{elevation:.1} m");
//! }
//! # Ok::<(), relief::ElevationError>(())
//! ```

pub mod error;
pub mod fill;
pub mod index;
pub mod record;
mod scan;
pub mod service;
pub mod tile;
pub mod transform;

#[cfg(test)]
mod testutil;

pub use error::{ElevationError, Result};
pub use fill::{BatchFiller, ElevationPoint};
pub use index::TileIndex;
pub use record::TileRecord;
pub use service::{ElevationService, ElevationServiceBuilder, ServiceConfig};
pub use tile::{Tile, TileFormat};
pub use transform::{set_datum_search_path, CoordTransform};
