//! # vekter-core
//!
//! **VekterDB** – turn a relational table into a vector database.
//!
//! A [`VekterDb`] pairs durable row storage (SQLite via `vekter-db`) with an
//! in-memory trainable ANN index (`vekter-ann`), tied together by one
//! integer column: each row's `idx` is simultaneously its primary key and
//! its position in the index. Ingestion keeps the two aligned, a catch-up
//! pass restores alignment after a crash, and queries recall candidates
//! from the index, hydrate their rows, and re-rank by exact similarity.
//!
//! ## Main Types
//!
//! - [`VekterDb`] – the main entry point for all operations
//! - [`Record`] / [`Matrix`] – ingest and query inputs
//! - [`SearchResult`] / [`QueryNeighbors`] – query outputs
//! - [`VekterError`] – domain-specific error type
//!
//! ## Example
//!
//! ```ignore
//! use vekter_core::{InsertOptions, Record, SearchOptions, VekterDb};
//! use vekter_db::{ColumnSpec, ColumnType, TableConfig};
//! use vekter_ann::Metric;
//!
//! let config = TableConfig::new("records")
//!     .with_columns(vec![ColumnSpec::new("name", ColumnType::Text).unique()]);
//! let mut db = VekterDb::open_path("records.db", config)?;
//!
//! db.insert(&records, &InsertOptions::default())?;
//! db.create_index("records.ann", "IVF64,Flat", Metric::InnerProduct)?;
//! db.train_index_from_sample(10_000, 1_000)?;
//! db.sync_index_to_db(10_000, None)?;
//!
//! let opts = SearchOptions::default().with_columns(["idx", "name"]);
//! let results = db.search_one(&query, 10, &opts)?;
//! db.save("records.json".as_ref())?;
//! ```

// Modules
pub mod config;
pub mod db;
pub mod errors;
pub mod search;
pub mod sync;
pub mod types;

// Re-exports for convenience
pub use config::{load_config, save_config, ConfigSnapshot};
pub use db::VekterDb;
pub use errors::{VekterError, VekterResult};
pub use types::{
    InsertOptions, Matrix, Neighbor, QueryNeighbors, Record, SearchOptions, SearchResult,
    VectorPayload, DEFAULT_BATCH_SIZE, DEFAULT_COMPRESSION_LEVEL,
};

// Infrastructure re-exports so embedders rarely need the lower crates
// directly.
pub use vekter_ann::{AnnError, AnnIndex, Metric};
pub use vekter_db::{
    ColumnSpec, ColumnType, DbError, Row, TableConfig, Value, DEFAULT_IDX_COLUMN,
    DEFAULT_VECTOR_COLUMN,
};
