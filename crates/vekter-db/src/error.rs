//! Error types for vekter-db.

use thiserror::Error;

/// Result type alias for vekter-db operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in vekter-db operations.
#[derive(Debug, Error)]
pub enum DbError {
    // ========================================================================
    // Schema errors
    // ========================================================================
    /// The table exists but is missing a required column.
    #[error("Table '{table}' is missing required column '{column}'")]
    MissingColumn { table: String, column: String },

    /// A column name was requested that the table does not have.
    #[error("Table '{table}' has no column '{column}'")]
    UnknownColumn { table: String, column: String },

    /// Table reflection failed.
    #[error("Failed to reflect table '{table}': {message}")]
    Reflection { table: String, message: String },

    /// A declared column specification is invalid.
    #[error("Invalid column spec '{column}': {message}")]
    InvalidColumnSpec { column: String, message: String },

    /// An insert row omitted a value for a required column.
    #[error("Insert row is missing a value for required column '{column}'")]
    MissingValue { column: String },

    // ========================================================================
    // Codec errors
    // ========================================================================
    /// Vector serialization/deserialization failed.
    #[error("Vector codec error: {message}")]
    Codec { message: String },

    // ========================================================================
    // Backend errors
    // ========================================================================
    /// SQLite error wrapper.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// IO error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Create a missing-column error.
    pub fn missing_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::MissingColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Create an unknown-column error.
    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Create a reflection error.
    pub fn reflection(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Reflection {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }
}
