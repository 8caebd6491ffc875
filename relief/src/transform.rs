//! WGS84 to tile-native coordinate transforms.
//!
//! Reprojection math is an external capability rather than something this
//! crate reimplements. This module recognises a raster's spatial reference
//! from its GeoTIFF geokey directory and hands back a transform for it;
//! geographic (latitude/longitude) reference systems map WGS84 coordinates
//! straight through. Rasters without a spatial reference, or in a reference
//! system the capability does not cover, are rejected at open time.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::debug;

/// GTModelTypeGeoKey: the kind of coordinate model the raster uses.
const KEY_MODEL_TYPE: u32 = 1024;
/// GeographicTypeGeoKey: the EPSG code of a geographic reference system.
const KEY_GEOGRAPHIC_TYPE: u32 = 2048;

const MODEL_TYPE_PROJECTED: u32 = 1;
const MODEL_TYPE_GEOGRAPHIC: u32 = 2;

/// Optional search path for datum-shift support files. Set once from service
/// configuration.
static DATUM_SEARCH_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Record the datum-grid search path. Later calls are no-ops once a path has
/// been set.
pub fn set_datum_search_path(path: &Path) {
    if DATUM_SEARCH_PATH.set(path.to_path_buf()).is_ok() {
        debug!(path = %path.display(), "datum search path set");
    }
}

/// A transform from WGS84 decimal degrees into a tile's native coordinates.
#[derive(Debug, Clone)]
pub struct CoordTransform {
    /// EPSG code of the tile's geographic reference system.
    epsg: u32,
}

impl CoordTransform {
    /// Build a transform from a raster's geokey directory (GeoTIFF tag 34735).
    ///
    /// The directory is a flat array of shorts: a four-value header followed
    /// by one `{key id, tag location, count, value}` quadruple per key.
    pub fn from_geokeys(keys: &[u32]) -> Result<Self, String> {
        if keys.len() < 4 {
            return Err("raster has no spatial reference".to_string());
        }

        let mut model_type = None;
        let mut geographic_type = None;
        for entry in keys[4..].chunks_exact(4) {
            match entry[0] {
                KEY_MODEL_TYPE => model_type = Some(entry[3]),
                KEY_GEOGRAPHIC_TYPE => geographic_type = Some(entry[3]),
                _ => {}
            }
        }

        match model_type {
            Some(MODEL_TYPE_GEOGRAPHIC) => Ok(Self {
                epsg: geographic_type.unwrap_or(4326),
            }),
            Some(MODEL_TYPE_PROJECTED) => Err(
                "projected reference systems require an external reprojection capability"
                    .to_string(),
            ),
            Some(other) => Err(format!("unsupported coordinate model type {other}")),
            None => Err("raster has no spatial reference".to_string()),
        }
    }

    /// Transform a WGS84 point into the tile's native coordinates.
    pub fn transform(&self, longitude: f64, latitude: f64) -> Result<(f64, f64), String> {
        if !longitude.is_finite() || !latitude.is_finite() {
            return Err(format!(
                "cannot transform non-finite point ({longitude}, {latitude})"
            ));
        }
        // Geographic reference systems carry WGS84 coordinates through as-is.
        Ok((longitude, latitude))
    }

    /// EPSG code of the tile's reference system.
    pub fn epsg(&self) -> u32 {
        self.epsg
    }
}
