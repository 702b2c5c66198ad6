//! Unified error handling for surface extraction.
//!
//! One error enum covers the whole pipeline. Only argument validation is
//! treated as fatal by callers; transfer and malformed-shard errors are
//! logged per shard and the run continues.

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for surface extraction operations.
#[derive(Debug, Error)]
pub enum SurfaceError {
    /// Invalid shard selector on the command line (out of range, reversed
    /// range, or too many selectors). Always raised before any I/O.
    #[error("invalid shard selector: {0}")]
    InvalidShard(String),

    /// GeoPackage catalog has no feature table entry.
    #[error("no feature table found in {}", path.display())]
    MissingFeatureTable { path: PathBuf },

    /// Feature table exists but has no registered geometry column, so the
    /// rtree index name cannot be derived.
    #[error("no geometry column registered for table '{table}' in {}", path.display())]
    MissingGeometryColumn { table: String, path: PathBuf },

    /// Transport-level download failure.
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status.
    #[error("HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// SQLite error from either a shard file or the output store.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for surface extraction operations.
pub type Result<T> = std::result::Result<T, SurfaceError>;
