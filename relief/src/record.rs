//! Catalog entry describing one tile's geometry.

use serde::{Deserialize, Serialize};

/// Geometry metadata for a single elevation tile, derived from the raster's
/// own affine georeferencing on first open and persisted in the tile index.
///
/// The bounding box is stored as the four edges in decimal degrees (or the
/// raster's native units for projected tiles), matching the affine transform
/// they were computed from:
///
/// ```text
/// right  = left + raster_width  * pixel_width
/// bottom = top  + raster_height * pixel_height   (pixel_height is negative)
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    /// Tile filename within the tile directory; unique key.
    pub filename: String,
    /// Western edge (x origin of the affine transform).
    pub left: f64,
    /// Northern edge (y origin of the affine transform).
    pub top: f64,
    /// Eastern edge.
    pub right: f64,
    /// Southern edge.
    pub bottom: f64,
    /// Pixel width in map units.
    pub pixel_width: f64,
    /// Pixel height in map units; negative for north-up rasters.
    pub pixel_height: f64,
    /// Row rotation term of the affine transform; zero for north-up rasters.
    pub x_skew: f64,
    /// Column rotation term of the affine transform.
    pub y_skew: f64,
}

impl TileRecord {
    /// Whether the bounding box contains the point. All four edges compare
    /// inclusively, so a point on a shared boundary matches whichever of two
    /// adjacent tiles comes first in catalog order.
    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        longitude >= self.left
            && longitude <= self.right
            && latitude >= self.bottom
            && latitude <= self.top
    }
}
