//! Persisted tile index.
//!
//! The index is a JSON document with one entry per known tile, holding just
//! enough geometry to answer bounding-box containment and rebuild the catalog
//! on restart without reopening every raster. The whole document is rewritten
//! on every save; a missing or corrupt file degrades to an empty index.

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::error::{ElevationError, Result};
use crate::record::TileRecord;

/// Ordered collection of [`TileRecord`], keyed by filename.
///
/// Insertion order is preserved: lookups scan the catalog front to back and
/// take the first tile whose bounding box contains the point, so the order
/// entries were added in is part of the observable behaviour.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileIndex {
    records: Vec<TileRecord>,
}

impl TileIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the index from `path`.
    ///
    /// A missing file means no tiles are known yet and a malformed file is
    /// treated the same way after a warning; neither is an error.
    pub fn load(path: &Path) -> Self {
        match Self::read_strict(path) {
            Ok(index) => index,
            Err(ElevationError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Self::new(),
            Err(e) => {
                warn!(index = %path.display(), error = %e, "discarding unreadable tile index");
                Self::new()
            }
        }
    }

    /// Parse the index, surfacing corruption instead of degrading.
    fn read_strict(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let records: Vec<TileRecord> =
            serde_json::from_slice(&bytes).map_err(|e| ElevationError::IndexCorrupt {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Ok(Self { records })
    }

    /// Serialize the full set of entries to `path`, replacing any prior
    /// content.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.records)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Look up an entry by filename.
    pub fn get(&self, filename: &str) -> Option<&TileRecord> {
        self.records.iter().find(|r| r.filename == filename)
    }

    /// Insert an entry. An existing entry with the same filename is replaced
    /// in place, keeping its position in the catalog order; otherwise the
    /// entry is appended.
    pub fn insert(&mut self, record: TileRecord) {
        match self.records.iter_mut().find(|r| r.filename == record.filename) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    /// Remove the entry for `filename`. Returns whether an entry existed.
    pub fn remove(&mut self, filename: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.filename != filename);
        self.records.len() != before
    }

    /// Iterate entries in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &TileRecord> {
        self.records.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<TileRecord> for TileIndex {
    fn from_iter<I: IntoIterator<Item = TileRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}
