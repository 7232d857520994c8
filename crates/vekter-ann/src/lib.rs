//! # vekter-ann
//!
//! Compute layer for VekterDB - a trainable approximate-nearest-neighbor
//! index addressed by integer positions.
//!
//! The index is composed from a short factory descriptor (`Flat`,
//! `IVF<nlist>,Flat`, `PQ<m>`, `IVF<nlist>,PQ<m>`), trained once from a
//! sample, grown monotonically with `add`, searched in row-major pages, and
//! persisted as a single opaque binary file. Runtime behavior is tuned
//! through a comma-separated `key=value` parameter string validated against
//! the composed index.
//!
//! The handle owns no row data; mapping positions back to records is the
//! caller's concern.
//!
//! ## Usage
//!
//! ```ignore
//! use vekter_ann::{AnnIndex, Metric};
//!
//! let mut index = AnnIndex::build("IVF64,Flat", 128, Metric::InnerProduct)?;
//! index.train(&sample)?;
//! index.add(&vectors)?;
//! let page = index.search(&queries, 10, Some("nprobe=8"))?;
//! ```

pub mod error;
pub mod factory;
pub mod index;
pub mod kmeans;
pub mod metric;
pub mod params;
pub mod pq;

pub use error::{AnnError, AnnResult};
pub use factory::{IndexSpec, StorageKind};
pub use index::{AnnIndex, ParamGuard, SearchPage, PAD_ID};
pub use metric::Metric;
pub use params::RuntimeParams;
pub use pq::ProductQuantizer;
