//! GeoTIFF fixtures for tests.

use std::fs::File;
use std::path::Path;

use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

/// Geometry of a square-pixel, north-up test tile.
pub struct TileSpec {
    pub left: f64,
    pub top: f64,
    pub pixel: f64,
    pub width: u32,
    pub height: u32,
}

impl TileSpec {
    pub fn new(left: f64, top: f64, pixel: f64, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            pixel,
            width,
            height,
        }
    }
}

/// Write a single-band f32 GeoTIFF with WGS84 geokeys, filling each pixel
/// from `value(row, col)`.
pub fn write_geotiff(path: &Path, spec: &TileSpec, value: impl Fn(u32, u32) -> f32) {
    let mut data = Vec::with_capacity((spec.width * spec.height) as usize);
    for row in 0..spec.height {
        for col in 0..spec.width {
            data.push(value(row, col));
        }
    }

    let file = File::create(path).unwrap();
    let mut encoder = TiffEncoder::new(file).unwrap();
    let mut image = encoder
        .new_image::<colortype::Gray32Float>(spec.width, spec.height)
        .unwrap();

    image
        .encoder()
        .write_tag(Tag::ModelPixelScaleTag, &[spec.pixel, spec.pixel, 0.0][..])
        .unwrap();
    image
        .encoder()
        .write_tag(
            Tag::ModelTiepointTag,
            &[0.0, 0.0, 0.0, spec.left, spec.top, 0.0][..],
        )
        .unwrap();
    // Geographic WGS84.
    image
        .encoder()
        .write_tag(
            Tag::GeoKeyDirectoryTag,
            &[1u16, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4326][..],
        )
        .unwrap();

    image.write_data(&data).unwrap();
}

/// Write a TIFF with no georeferencing tags at all.
pub fn write_bare_tiff(path: &Path, width: u32, height: u32) {
    let data = vec![0.0f32; (width * height) as usize];
    let file = File::create(path).unwrap();
    let mut encoder = TiffEncoder::new(file).unwrap();
    encoder
        .write_image::<colortype::Gray32Float>(width, height, &data)
        .unwrap();
}
