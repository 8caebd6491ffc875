//! Single elevation tile: format resolution, lazy open, point sampling.

use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

use crate::error::{ElevationError, Result};
use crate::record::TileRecord;
use crate::transform::CoordTransform;

/// Sentinel used when a raster does not declare its own no-data value.
pub const NO_DATA: f32 = -32768.0;

/// Serializes open/close/read against every tile's decoded dataset. Raster
/// decode and handle teardown must not interleave across tiles; the lock is
/// held for the duration of a single open/close/read call, never across a
/// whole request.
static DATASET_LOCK: Mutex<()> = Mutex::new(());

fn dataset_guard() -> MutexGuard<'static, ()> {
    DATASET_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Recognised tile file formats, selected by filename extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileFormat {
    /// Plain GeoTIFF raster.
    GeoTiff,
    /// Zip archive containing a same-stem `.tif`.
    Zip,
    /// Tar archive containing a same-stem `.tif`.
    Tar,
    /// Gzip-compressed tar archive containing a same-stem `.tif`.
    TarGz,
}

impl TileFormat {
    /// Classify a filename, or `None` for extensions that are not elevation
    /// tiles.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".tif") {
            Some(TileFormat::GeoTiff)
        } else if lower.ends_with(".zip") {
            Some(TileFormat::Zip)
        } else if lower.ends_with(".tar") {
            Some(TileFormat::Tar)
        } else if lower.ends_with(".tgz") || lower.ends_with(".tar.gz") {
            Some(TileFormat::TarGz)
        } else {
            None
        }
    }

    /// Name of the raster expected inside an archive: the archive's stem with
    /// a `.tif` extension.
    fn inner_raster_name(self, filename: &str) -> String {
        let lower = filename.to_ascii_lowercase();
        let stem_len = if lower.ends_with(".tar.gz") {
            filename.len() - ".tar.gz".len()
        } else {
            filename.len() - 4
        };
        format!("{}.tif", &filename[..stem_len])
    }
}

/// Transient per-tile open state; never persisted.
#[derive(Debug)]
struct OpenDataset {
    /// Decoded single-band raster, row-major, north to south.
    data: Vec<f32>,
    width: u32,
    height: u32,
    no_data: f32,
    transform: CoordTransform,
    last_access: Instant,
}

/// One elevation tile: durable geometry plus lazily-opened dataset state.
///
/// The tile receives the directory path per call and holds no reference back
/// to the owning service.
#[derive(Debug)]
pub struct Tile {
    record: TileRecord,
    state: Mutex<Option<OpenDataset>>,
}

impl Tile {
    /// Rebuild a tile from a persisted catalog entry without opening the
    /// raster.
    pub fn from_record(record: TileRecord) -> Self {
        Self {
            record,
            state: Mutex::new(None),
        }
    }

    /// Open a tile file, deriving its geometry from the raster's own affine
    /// georeferencing. The dataset handle is left open; call [`Tile::close`]
    /// to release it.
    pub fn open(directory: &Path, filename: &str) -> Result<Self> {
        let _guard = dataset_guard();
        let (record, dataset) = decode_dataset(directory, filename)?;
        Ok(Self {
            record,
            state: Mutex::new(Some(dataset)),
        })
    }

    /// The tile's catalog entry.
    pub fn record(&self) -> &TileRecord {
        &self.record
    }

    /// Whether the dataset handle is currently open.
    pub fn is_open(&self) -> bool {
        self.lock_state().is_some()
    }

    /// Sample the elevation at a WGS84 point, opening the dataset first if
    /// necessary.
    ///
    /// Returns `None` when the pixel holds the tile's no-data sentinel.
    /// Fails with [`ElevationError::Dataset`] if the raster cannot be opened
    /// or the transform or pixel read fails.
    pub fn sample(&self, directory: &Path, longitude: f64, latitude: f64) -> Result<Option<f64>> {
        let mut state = self.lock_state();
        let _guard = dataset_guard();

        let dataset = match &mut *state {
            Some(dataset) => dataset,
            slot @ None => {
                let (_, dataset) = decode_dataset(directory, &self.record.filename)?;
                slot.insert(dataset)
            }
        };

        let (x, y) = dataset
            .transform
            .transform(longitude, latitude)
            .map_err(|m| ElevationError::dataset(&self.record.filename, m))?;

        // Inverse affine: map native coordinates onto pixel offsets.
        let x_offset = (x - self.record.left - y * self.record.x_skew) / self.record.pixel_width;
        let y_offset = (y - self.record.top - x * self.record.y_skew) / self.record.pixel_height;

        let col = (x_offset.floor() as i64).clamp(0, i64::from(dataset.width) - 1) as usize;
        let row = (y_offset.floor() as i64).clamp(0, i64::from(dataset.height) - 1) as usize;

        let value = dataset.data[row * dataset.width as usize + col];
        dataset.last_access = Instant::now();

        if value == dataset.no_data {
            Ok(None)
        } else {
            Ok(Some(f64::from(value)))
        }
    }

    /// Release the dataset handle. A no-op when the tile is already closed or
    /// was never opened.
    pub fn close(&self) {
        let mut state = self.lock_state();
        if state.is_some() {
            let _guard = dataset_guard();
            *state = None;
        }
    }

    /// Close the dataset handle if it has been idle for at least
    /// `cache_ttl_ms`. A TTL of zero or less closes any open handle.
    /// Returns whether a handle was closed.
    pub(crate) fn close_if_idle(&self, cache_ttl_ms: i64) -> bool {
        let mut state = self.lock_state();
        let expired = match state.as_ref() {
            Some(dataset) => {
                cache_ttl_ms <= 0
                    || dataset.last_access.elapsed() >= Duration::from_millis(cache_ttl_ms as u64)
            }
            None => false,
        };
        if expired {
            let _guard = dataset_guard();
            *state = None;
        }
        expired
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<OpenDataset>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolve the format-specific access path and decode the raster.
fn decode_dataset(directory: &Path, filename: &str) -> Result<(TileRecord, OpenDataset)> {
    let format =
        TileFormat::from_filename(filename).ok_or_else(|| ElevationError::UnknownExtension {
            filename: filename.to_string(),
        })?;
    let path = directory.join(filename);

    match format {
        TileFormat::GeoTiff => {
            let file =
                File::open(&path).map_err(|e| ElevationError::dataset(filename, e))?;
            decode(file, filename)
        }
        TileFormat::Zip => {
            let inner = format.inner_raster_name(filename);
            let bytes = read_zip_entry(&path, filename, &inner)?;
            decode(Cursor::new(bytes), filename)
        }
        TileFormat::Tar => {
            let inner = format.inner_raster_name(filename);
            let file =
                File::open(&path).map_err(|e| ElevationError::dataset(filename, e))?;
            let bytes = read_tar_entry(file, filename, &inner)?;
            decode(Cursor::new(bytes), filename)
        }
        TileFormat::TarGz => {
            let inner = format.inner_raster_name(filename);
            let file =
                File::open(&path).map_err(|e| ElevationError::dataset(filename, e))?;
            let bytes = read_tar_entry(flate2::read::GzDecoder::new(file), filename, &inner)?;
            decode(Cursor::new(bytes), filename)
        }
    }
}

/// Extract the inner raster from a zip archive into memory.
fn read_zip_entry(path: &Path, filename: &str, inner: &str) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| ElevationError::dataset(filename, e))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| ElevationError::dataset(filename, e))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ElevationError::dataset(filename, e))?;
        if entry.is_file() && entry.name().rsplit('/').next() == Some(inner) {
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| ElevationError::dataset(filename, e))?;
            return Ok(bytes);
        }
    }

    Err(ElevationError::dataset(
        filename,
        format!("archive does not contain {inner}"),
    ))
}

/// Extract the inner raster from a (possibly decompressed) tar stream.
fn read_tar_entry<R: Read>(reader: R, filename: &str, inner: &str) -> Result<Vec<u8>> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| ElevationError::dataset(filename, e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| ElevationError::dataset(filename, e))?;
        let matches = entry
            .path()
            .ok()
            .and_then(|p| p.file_name().map(|n| n == std::ffi::OsStr::new(inner)))
            .unwrap_or(false);
        if matches {
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| ElevationError::dataset(filename, e))?;
            return Ok(bytes);
        }
    }

    Err(ElevationError::dataset(
        filename,
        format!("archive does not contain {inner}"),
    ))
}

/// Decode a GeoTIFF: georeferencing, spatial reference, no-data sentinel and
/// the single elevation band.
fn decode<R: Read + Seek>(reader: R, filename: &str) -> Result<(TileRecord, OpenDataset)> {
    let mut decoder = Decoder::new(reader).map_err(|e| ElevationError::dataset(filename, e))?;

    // Allow large single-band tiles; 1-arc-second tiles decode to hundreds of
    // megabytes of f32.
    let mut limits = Limits::default();
    limits.decoding_buffer_size = 512 * 1024 * 1024;
    limits.intermediate_buffer_size = 512 * 1024 * 1024;
    limits.ifd_value_size = 512 * 1024 * 1024;
    decoder = decoder.with_limits(limits);

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| ElevationError::dataset(filename, e))?;

    let geotransform = read_geotransform(&mut decoder, filename)?;
    let [left, pixel_width, x_skew, top, y_skew, pixel_height] = geotransform;
    let right = left + f64::from(width) * pixel_width;
    let bottom = top + f64::from(height) * pixel_height;

    let keys = decoder
        .get_tag_u32_vec(Tag::GeoKeyDirectoryTag)
        .map_err(|_| ElevationError::dataset(filename, "raster has no spatial reference"))?;
    let transform =
        CoordTransform::from_geokeys(&keys).map_err(|m| ElevationError::dataset(filename, m))?;

    let no_data = read_no_data(&mut decoder);
    let data = read_band(&mut decoder, filename)?;

    let record = TileRecord {
        filename: filename.to_string(),
        left,
        top,
        right,
        bottom,
        pixel_width,
        pixel_height,
        x_skew,
        y_skew,
    };
    let dataset = OpenDataset {
        data,
        width,
        height,
        no_data,
        transform,
        last_access: Instant::now(),
    };
    Ok((record, dataset))
}

/// Read the affine georeferencing as `[left, pixel_width, x_skew, top,
/// y_skew, pixel_height]`, from either the tiepoint/pixel-scale tag pair or a
/// full model transformation matrix.
fn read_geotransform<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    filename: &str,
) -> Result<[f64; 6]> {
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag);
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag);

    if let (Ok(tie), Ok(scale)) = (tiepoint, scale) {
        if tie.len() >= 6 && scale.len() >= 2 {
            // Tiepoint is [i, j, k, x, y, z]; shift back to pixel (0, 0).
            let left = tie[3] - tie[0] * scale[0];
            let top = tie[4] + tie[1] * scale[1];
            return Ok([left, scale[0], 0.0, top, 0.0, -scale[1]]);
        }
    }

    if let Ok(matrix) = decoder.get_tag_f64_vec(Tag::ModelTransformationTag) {
        if matrix.len() >= 16 {
            // Row-major 4x4: x = m0*col + m1*row + m3, y = m4*col + m5*row + m7.
            return Ok([matrix[3], matrix[0], matrix[1], matrix[7], matrix[4], matrix[5]]);
        }
    }

    Err(ElevationError::dataset(
        filename,
        "raster has no affine georeferencing",
    ))
}

/// The raster's declared no-data value, or [`NO_DATA`] when absent.
fn read_no_data<R: Read + Seek>(decoder: &mut Decoder<R>) -> f32 {
    decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim_end_matches('\0').trim().parse().ok())
        .unwrap_or(NO_DATA)
}

/// Decode the elevation band into f32 samples.
fn read_band<R: Read + Seek>(decoder: &mut Decoder<R>, filename: &str) -> Result<Vec<f32>> {
    let image = decoder
        .read_image()
        .map_err(|e| ElevationError::dataset(filename, e))?;

    let data = match image {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::I16(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
    };
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{write_geotiff, TileSpec};
    use std::io::Write;
    use tempfile::TempDir;

    fn spec() -> TileSpec {
        TileSpec::new(-1.0, 51.0, 0.1, 10, 10)
    }

    #[test]
    fn test_format_from_filename() {
        assert_eq!(TileFormat::from_filename("a.tif"), Some(TileFormat::GeoTiff));
        assert_eq!(TileFormat::from_filename("A.TIF"), Some(TileFormat::GeoTiff));
        assert_eq!(TileFormat::from_filename("a.zip"), Some(TileFormat::Zip));
        assert_eq!(TileFormat::from_filename("a.tar"), Some(TileFormat::Tar));
        assert_eq!(TileFormat::from_filename("a.tgz"), Some(TileFormat::TarGz));
        assert_eq!(TileFormat::from_filename("a.tar.gz"), Some(TileFormat::TarGz));
        assert_eq!(TileFormat::from_filename("a.txt"), None);
        assert_eq!(TileFormat::from_filename("tif"), None);
    }

    #[test]
    fn test_inner_raster_name() {
        assert_eq!(TileFormat::Zip.inner_raster_name("n50w001.zip"), "n50w001.tif");
        assert_eq!(TileFormat::Tar.inner_raster_name("n50w001.tar"), "n50w001.tif");
        assert_eq!(TileFormat::TarGz.inner_raster_name("n50w001.tgz"), "n50w001.tif");
        assert_eq!(
            TileFormat::TarGz.inner_raster_name("n50w001.tar.gz"),
            "n50w001.tif"
        );
    }

    #[test]
    fn test_open_derives_geometry() {
        let tmp = TempDir::new().unwrap();
        write_geotiff(&tmp.path().join("n50w001.tif"), &spec(), |_, _| 100.0);

        let tile = Tile::open(tmp.path(), "n50w001.tif").unwrap();
        let record = tile.record();
        assert_eq!(record.left, -1.0);
        assert_eq!(record.top, 51.0);
        assert!((record.right - 0.0).abs() < 1e-9);
        assert!((record.bottom - 50.0).abs() < 1e-9);
        assert_eq!(record.pixel_width, 0.1);
        assert_eq!(record.pixel_height, -0.1);
        assert!(tile.is_open());
    }

    #[test]
    fn test_sample_value_and_no_data() {
        let tmp = TempDir::new().unwrap();
        // No-data along the top row, a gradient below it.
        write_geotiff(&tmp.path().join("n50w001.tif"), &spec(), |row, col| {
            if row == 0 {
                NO_DATA
            } else {
                (row * 10 + col) as f32
            }
        });

        let tile = Tile::open(tmp.path(), "n50w001.tif").unwrap();
        // Centre of pixel (row 5, col 5).
        let v = tile.sample(tmp.path(), -0.45, 50.45).unwrap();
        assert_eq!(v, Some(55.0));
        // Top row is the no-data sentinel.
        let v = tile.sample(tmp.path(), -0.45, 50.95).unwrap();
        assert_eq!(v, None);
    }

    #[test]
    fn test_sample_reopens_after_close() {
        let tmp = TempDir::new().unwrap();
        write_geotiff(&tmp.path().join("n50w001.tif"), &spec(), |_, _| 321.0);

        let tile = Tile::open(tmp.path(), "n50w001.tif").unwrap();
        let before = tile.sample(tmp.path(), -0.5, 50.5).unwrap();
        tile.close();
        assert!(!tile.is_open());
        let after = tile.sample(tmp.path(), -0.5, 50.5).unwrap();
        assert_eq!(before, after);
        assert!(tile.is_open());
    }

    #[test]
    fn test_close_is_idempotent() {
        let record = TileRecord {
            filename: "n50w001.tif".to_string(),
            left: -1.0,
            top: 51.0,
            right: 0.0,
            bottom: 50.0,
            pixel_width: 0.1,
            pixel_height: -0.1,
            x_skew: 0.0,
            y_skew: 0.0,
        };
        let tile = Tile::from_record(record);
        // Never opened.
        tile.close();
        tile.close();
        assert!(!tile.is_open());
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"not a raster").unwrap();

        let err = Tile::open(tmp.path(), "notes.txt").unwrap_err();
        assert!(matches!(err, ElevationError::UnknownExtension { .. }));
    }

    #[test]
    fn test_missing_georeferencing_rejected() {
        let tmp = TempDir::new().unwrap();
        crate::testutil::write_bare_tiff(&tmp.path().join("plain.tif"), 4, 4);

        let err = Tile::open(tmp.path(), "plain.tif").unwrap_err();
        assert!(matches!(err, ElevationError::Dataset { .. }));
    }

    #[test]
    fn test_open_zip_wrapped_tile() {
        let tmp = TempDir::new().unwrap();
        let raster = tmp.path().join("inner.tif");
        write_geotiff(&raster, &spec(), |_, _| 42.0);
        let bytes = std::fs::read(&raster).unwrap();
        std::fs::remove_file(&raster).unwrap();

        let file = std::fs::File::create(tmp.path().join("n50w001.zip")).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        writer.start_file("n50w001.tif", options).unwrap();
        writer.write_all(&bytes).unwrap();
        writer.finish().unwrap();

        let tile = Tile::open(tmp.path(), "n50w001.zip").unwrap();
        assert_eq!(tile.record().filename, "n50w001.zip");
        assert_eq!(tile.sample(tmp.path(), -0.5, 50.5).unwrap(), Some(42.0));
    }

    #[test]
    fn test_open_zip_without_inner_raster_fails() {
        let tmp = TempDir::new().unwrap();
        let file = std::fs::File::create(tmp.path().join("n50w001.zip")).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        writer.start_file("readme.txt", options).unwrap();
        writer.write_all(b"no raster here").unwrap();
        writer.finish().unwrap();

        let err = Tile::open(tmp.path(), "n50w001.zip").unwrap_err();
        assert!(matches!(err, ElevationError::Dataset { .. }));
    }

    #[test]
    fn test_open_tar_wrapped_tile() {
        let tmp = TempDir::new().unwrap();
        let raster = tmp.path().join("inner.tif");
        write_geotiff(&raster, &spec(), |_, _| 7.0);
        let bytes = std::fs::read(&raster).unwrap();
        std::fs::remove_file(&raster).unwrap();

        let file = std::fs::File::create(tmp.path().join("n50w001.tar")).unwrap();
        let mut builder = tar::Builder::new(file);
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "n50w001.tif", bytes.as_slice())
            .unwrap();
        builder.finish().unwrap();

        let tile = Tile::open(tmp.path(), "n50w001.tar").unwrap();
        assert_eq!(tile.sample(tmp.path(), -0.5, 50.5).unwrap(), Some(7.0));
    }

    #[test]
    fn test_open_tgz_wrapped_tile() {
        let tmp = TempDir::new().unwrap();
        let raster = tmp.path().join("inner.tif");
        write_geotiff(&raster, &spec(), |_, _| 9.0);
        let bytes = std::fs::read(&raster).unwrap();
        std::fs::remove_file(&raster).unwrap();

        let file = std::fs::File::create(tmp.path().join("n50w001.tgz")).unwrap();
        let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(gz);
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "n50w001.tif", bytes.as_slice())
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let tile = Tile::open(tmp.path(), "n50w001.tgz").unwrap();
        assert_eq!(tile.sample(tmp.path(), -0.5, 50.5).unwrap(), Some(9.0));
    }

    #[test]
    fn test_close_if_idle_respects_ttl() {
        let tmp = TempDir::new().unwrap();
        write_geotiff(&tmp.path().join("n50w001.tif"), &spec(), |_, _| 1.0);

        let tile = Tile::open(tmp.path(), "n50w001.tif").unwrap();
        tile.sample(tmp.path(), -0.5, 50.5).unwrap();

        // Generous TTL keeps the handle open.
        assert!(!tile.close_if_idle(60_000));
        assert!(tile.is_open());

        // Non-positive TTL disables caching outright.
        assert!(tile.close_if_idle(0));
        assert!(!tile.is_open());
        assert!(!tile.close_if_idle(0));
    }
}
