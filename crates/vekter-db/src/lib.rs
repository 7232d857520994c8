//! # vekter-db
//!
//! Infrastructure layer for VekterDB - relational row store and vector codec.
//!
//! This crate provides the storage implementations that are isolated from the
//! domain logic in `vekter-core`:
//!
//! - `store`: the SQLite row store adapter owning the schema contract
//!   (integer primary-key column, non-null vector blob column, user columns)
//! - `codec`: zstd compression of little-endian f32 vector bytes
//! - `types`: dynamic cell values and column declarations
//!
//! ## Architecture
//!
//! ```text
//! vekter-core → (domain logic, search pipeline)
//!        ↑
//!   vekter-db (row store, codec)
//!   vekter-ann (trainable ANN index engine)
//! ```
//!
//! Rows cross the boundary as plain `HashMap<String, Value>` maps; no driver
//! types leak upward.

pub mod codec;
pub mod error;
pub mod store;
pub mod types;

pub use error::{DbError, DbResult};
pub use store::{RowStore, TableConfig};
pub use types::{
    ColumnSpec, ColumnType, Row, Value, DEFAULT_IDX_COLUMN, DEFAULT_VECTOR_COLUMN,
};
