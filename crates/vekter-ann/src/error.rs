//! Error types for vekter-ann.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for vekter-ann operations.
pub type AnnResult<T> = Result<T, AnnError>;

/// Errors that can occur in vekter-ann operations.
#[derive(Debug, Error)]
pub enum AnnError {
    // ========================================================================
    // Construction errors
    // ========================================================================
    /// The factory descriptor could not be parsed.
    #[error("Invalid factory descriptor '{descriptor}': {message}")]
    Factory { descriptor: String, message: String },

    /// The index dimension is invalid for the requested composition.
    #[error("Invalid dimension {dim}: {message}")]
    Dimension { dim: usize, message: String },

    // ========================================================================
    // State errors
    // ========================================================================
    /// Vectors were added before the index was trained.
    #[error("Index is not trained; train it before adding vectors")]
    NotTrained,

    /// The training sample was empty.
    #[error("Training sample is empty")]
    EmptyTraining,

    /// A matrix argument did not match the index dimension.
    #[error("Matrix of {len} floats is not a whole number of {dim}-dimensional rows")]
    BadShape { len: usize, dim: usize },

    // ========================================================================
    // Runtime parameter errors
    // ========================================================================
    /// An unknown runtime parameter key was supplied.
    #[error("Unknown runtime parameter '{key}' for index '{descriptor}'")]
    UnknownParameter { key: String, descriptor: String },

    /// A runtime parameter value could not be parsed.
    #[error("Invalid value '{value}' for runtime parameter '{key}': {message}")]
    InvalidParameterValue {
        key: String,
        value: String,
        message: String,
    },

    // ========================================================================
    // Persistence errors
    // ========================================================================
    /// Index file I/O failed.
    #[error("Index I/O error at {path}: {message}")]
    IndexIo { path: PathBuf, message: String },

    /// Index file decoding failed or the format version is unsupported.
    #[error("Index decode error at {path}: {message}")]
    IndexDecode { path: PathBuf, message: String },

    /// IO error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnnError {
    /// Create a factory parse error.
    pub fn factory(descriptor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Factory {
            descriptor: descriptor.into(),
            message: message.into(),
        }
    }

    /// Create an index I/O error.
    pub fn index_io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::IndexIo {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an index decode error.
    pub fn index_decode(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::IndexDecode {
            path: path.into(),
            message: message.into(),
        }
    }
}
