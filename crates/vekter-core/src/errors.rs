//! Error types for vekter-core.

use std::path::PathBuf;

use thiserror::Error;
use vekter_ann::AnnError;
use vekter_db::DbError;

/// Result type alias for vekter-core operations.
pub type VekterResult<T> = Result<T, VekterError>;

/// Domain-specific errors for VekterDB operations.
#[derive(Debug, Error)]
pub enum VekterError {
    // =========================================================================
    // Configuration errors
    // =========================================================================
    /// An ANN index is already assigned to this instance.
    #[error("An ANN index is already assigned; create or load only one per instance")]
    IndexAlreadyAssigned,

    /// The requested index file already exists on disk.
    #[error("Index file already exists at `{path}`")]
    IndexFileExists {
        /// The colliding path.
        path: PathBuf,
    },

    /// The config snapshot names an index file that does not exist.
    #[error("Config references missing index file `{path}`")]
    IndexFileMissing {
        /// The missing path.
        path: PathBuf,
    },

    /// An operation that needs an ANN index was called without one.
    #[error("No ANN index is assigned; call create_index or load first")]
    NoIndex,

    /// The vector dimension has not been established yet.
    #[error("Vector dimension is unknown; insert vectors first")]
    DimensionUnknown,

    /// The loaded index disagrees with the table on vector count.
    #[error("Loaded index holds {ntotal} vectors but the table has only {rows} rows")]
    IndexAheadOfTable {
        /// Vectors in the loaded index.
        ntotal: i64,
        /// Rows in the table.
        rows: i64,
    },

    /// Failed to read or write a config snapshot.
    #[error("Config I/O error at `{path}`: {message}")]
    ConfigIo {
        /// Path to the config file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// Failed to parse a config snapshot.
    #[error("Config parse error at `{path}`: {message}")]
    ConfigParse {
        /// Path to the config file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    // =========================================================================
    // Data errors
    // =========================================================================
    /// A vector's length does not match the table dimension.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The established dimension `d`.
        expected: usize,
        /// The offending vector's length.
        actual: usize,
    },

    /// Rows in a matrix have inconsistent lengths.
    #[error("Matrix rows have inconsistent lengths: expected {expected}, got {actual}")]
    RaggedMatrix {
        /// Length of the first row.
        expected: usize,
        /// Length of the offending row.
        actual: usize,
    },

    /// An insert supplied an idx that breaks contiguity.
    #[error("Non-contiguous insert: expected idx {expected}, got {got}")]
    NonContiguousInsert {
        /// The next free idx.
        expected: i64,
        /// The idx supplied by the caller.
        got: i64,
    },

    /// The table has a hole in its idx sequence.
    #[error("Contiguous-id violation: idx {missing} is missing in range [{start}, {stop})")]
    ContiguityGap {
        /// The first missing idx.
        missing: i64,
        /// Start of the checked range (inclusive).
        start: i64,
        /// End of the checked range (exclusive).
        stop: i64,
    },

    // =========================================================================
    // Layer errors
    // =========================================================================
    /// Row store or codec failure.
    #[error(transparent)]
    Db(#[from] DbError),

    /// ANN index failure.
    #[error(transparent)]
    Ann(#[from] AnnError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
