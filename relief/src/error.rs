//! Error types for the relief library.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when working with elevation tiles.
#[derive(Error, Debug)]
pub enum ElevationError {
    /// IO error when reading files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file extension is not a recognised tile format.
    #[error("not a recognised elevation tile: {filename}")]
    UnknownExtension { filename: String },

    /// The raster could not be opened, lacks georeferencing or a spatial
    /// reference, or a transform/read against it failed.
    #[error("dataset error in {filename}: {message}")]
    Dataset { filename: String, message: String },

    /// The persisted tile index could not be parsed. Always downgraded to an
    /// empty index by the loading path; never fatal.
    #[error("tile index {path} is corrupt: {message}")]
    IndexCorrupt { path: PathBuf, message: String },

    /// The startup scan failed. Captured once and re-raised to every
    /// subsequent lookup.
    #[error("elevation service failed to initialise: {0}")]
    Initialization(String),
}

impl ElevationError {
    /// Build a [`ElevationError::Dataset`] for the given tile file.
    pub(crate) fn dataset(filename: impl Into<String>, message: impl ToString) -> Self {
        ElevationError::Dataset {
            filename: filename.into(),
            message: message.to_string(),
        }
    }
}

/// Result type alias using [`ElevationError`].
pub type Result<T> = std::result::Result<T, ElevationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ElevationError::UnknownExtension {
            filename: "notes.txt".to_string(),
        };
        assert!(err.to_string().contains("notes.txt"));

        let err = ElevationError::dataset("n50w001.tif", "no georeferencing");
        assert!(err.to_string().contains("n50w001.tif"));
        assert!(err.to_string().contains("no georeferencing"));

        let err = ElevationError::Initialization("scan failed".to_string());
        assert!(err.to_string().contains("scan failed"));
    }
}
