//! Schema and cell-value types for the row store.
//!
//! Rows cross the crate boundary as plain `HashMap<String, Value>` maps; no
//! driver types leak to callers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

/// Default name for the integer primary-key column.
pub const DEFAULT_IDX_COLUMN: &str = "idx";

/// Default name for the vector blob column.
pub const DEFAULT_VECTOR_COLUMN: &str = "vector";

/// A row as returned to callers: column name to dynamic value.
pub type Row = HashMap<String, Value>;

// ============================================================================
// ColumnType
// ============================================================================

/// Scalar column types supported for user-declared columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Real,
    /// UTF-8 text.
    Text,
    /// Raw bytes.
    Blob,
}

impl ColumnType {
    /// The SQLite declared type for this column type.
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
        }
    }

    /// Map a declared SQLite type back to a column type.
    ///
    /// SQLite type affinity is loose; anything unrecognized maps to `Blob`.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_uppercase();
        if upper.contains("INT") {
            Self::Integer
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Self::Real
        } else if upper.contains("CHAR") || upper.contains("TEXT") || upper.contains("CLOB") {
            Self::Text
        } else {
            Self::Blob
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_type())
    }
}

impl FromStr for ColumnType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_declared(s))
    }
}

// ============================================================================
// ColumnSpec
// ============================================================================

/// Declaration of a user column on the record table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,

    /// Scalar type.
    pub ty: ColumnType,

    /// Whether a UNIQUE index is created for this column.
    pub unique: bool,

    /// Whether a (non-unique) secondary index is created for this column.
    pub indexed: bool,

    /// Whether NULL values are allowed. Defaults to true.
    pub nullable: bool,
}

impl ColumnSpec {
    /// Create a nullable, unindexed column spec.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            unique: false,
            indexed: false,
            nullable: true,
        }
    }

    /// Mark the column UNIQUE (implies indexed).
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Request a secondary index on the column.
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

// ============================================================================
// Value
// ============================================================================

/// A dynamic cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl Value {
    /// The integer payload, if this value is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// The blob payload, if this value is a blob.
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(v) => Some(v),
            _ => None,
        }
    }

    /// The text payload, if this value is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// The float payload, if this value is a real.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Self::Integer(v) => ToSqlOutput::Borrowed(ValueRef::Integer(*v)),
            Self::Real(v) => ToSqlOutput::Borrowed(ValueRef::Real(*v)),
            Self::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Self::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(r) => Self::Real(r),
            ValueRef::Text(t) => Self::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Self::Blob(b.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_round_trip() {
        assert_eq!(ColumnType::from_declared("INTEGER"), ColumnType::Integer);
        assert_eq!(ColumnType::from_declared("BIGINT"), ColumnType::Integer);
        assert_eq!(ColumnType::from_declared("VARCHAR(20)"), ColumnType::Text);
        assert_eq!(ColumnType::from_declared("DOUBLE"), ColumnType::Real);
        assert_eq!(ColumnType::from_declared("BLOB"), ColumnType::Blob);
        assert_eq!(ColumnType::from_declared("mystery"), ColumnType::Blob);
    }

    #[test]
    fn test_column_spec_builders() {
        let spec = ColumnSpec::new("url", ColumnType::Text).unique().not_null();
        assert!(spec.unique);
        assert!(!spec.nullable);
        assert!(!spec.indexed);
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Integer(7).as_integer(), Some(7));
        assert_eq!(Value::Text("x".into()).as_integer(), None);
        assert_eq!(Value::Blob(vec![1, 2]).as_blob(), Some(&[1u8, 2][..]));
        assert_eq!(Value::from("hi").as_text(), Some("hi"));
    }
}
