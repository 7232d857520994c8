//! Common types: ingest records, query matrices, options, and result shapes.

use serde::Serialize;
use vekter_db::{Row, Value};

use crate::errors::{VekterError, VekterResult};

/// Default batch size for ingestion and hydration.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Default zstd compression level for stored vectors.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

// ============================================================================
// Matrix
// ============================================================================

/// A row-major `(rows, dim)` f32 matrix.
///
/// The backing buffer is contiguous so it can be handed to the ANN index
/// without a copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    data: Vec<f32>,
    rows: usize,
    dim: usize,
}

impl Matrix {
    /// The `(0, 0)` matrix.
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            rows: 0,
            dim: 0,
        }
    }

    /// Build from a single query vector, shaped `(1, d)`.
    pub fn from_row(row: &[f32]) -> Self {
        Self {
            data: row.to_vec(),
            rows: 1,
            dim: row.len(),
        }
    }

    /// Build from equal-length rows.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> VekterResult<Self> {
        let Some(first) = rows.first() else {
            return Ok(Self::empty());
        };
        let dim = first.len();
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in &rows {
            if row.len() != dim {
                return Err(VekterError::RaggedMatrix {
                    expected: dim,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            data,
            rows: rows.len(),
            dim,
        })
    }

    /// Build from a flat row-major buffer.
    pub fn from_flat(data: Vec<f32>, dim: usize) -> VekterResult<Self> {
        if dim == 0 || data.len() % dim != 0 {
            return Err(VekterError::RaggedMatrix {
                expected: dim,
                actual: data.len(),
            });
        }
        let rows = data.len() / dim;
        Ok(Self { data, rows, dim })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Row length.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Whether the matrix has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// The contiguous row-major buffer.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Row `i` as a slice.
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub(crate) fn push_row(&mut self, row: &[f32]) -> VekterResult<()> {
        if self.rows == 0 && self.dim == 0 {
            self.dim = row.len();
        }
        if row.len() != self.dim {
            return Err(VekterError::RaggedMatrix {
                expected: self.dim,
                actual: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        self.rows += 1;
        Ok(())
    }
}

// ============================================================================
// Record
// ============================================================================

/// The vector side of an ingest record.
#[derive(Debug, Clone)]
pub enum VectorPayload {
    /// A plain f32 vector; serialized and compressed on insert.
    Floats(Vec<f32>),
    /// An already serialized+compressed blob, stored as-is.
    Serialized(Vec<u8>),
}

/// A record handed to `insert`.
///
/// `idx` may be left unset to have the next free value assigned; when set it
/// must equal the next free value (inserts fail fast on gaps).
#[derive(Debug, Clone)]
pub struct Record {
    /// Caller-assigned idx, or `None` for auto-assignment.
    pub idx: Option<i64>,

    /// The vector.
    pub vector: VectorPayload,

    /// User column values by name.
    pub columns: Row,
}

impl Record {
    /// Create a record from a plain vector with auto-assigned idx.
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            idx: None,
            vector: VectorPayload::Floats(vector),
            columns: Row::new(),
        }
    }

    /// Create a record from an already serialized vector blob.
    pub fn from_serialized(blob: Vec<u8>) -> Self {
        Self {
            idx: None,
            vector: VectorPayload::Serialized(blob),
            columns: Row::new(),
        }
    }

    /// Set an explicit idx.
    pub fn with_idx(mut self, idx: i64) -> Self {
        self.idx = Some(idx);
        self
    }

    /// Set a user column value.
    pub fn with_column(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(name.into(), value.into());
        self
    }
}

// ============================================================================
// Options
// ============================================================================

/// Options for `insert`.
#[derive(Debug, Clone)]
pub struct InsertOptions {
    /// Records per transaction/index-add batch.
    pub batch_size: usize,

    /// zstd level for vector serialization (1..=22).
    pub compression_level: i32,

    /// Runtime parameter override applied for the duration of the call.
    pub runtime_params: Option<String>,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            runtime_params: None,
        }
    }
}

/// Options for `search` and `nearest_neighbors`.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Columns to return on each neighbor. The idx and vector columns are
    /// only included when named here.
    pub columns: Vec<String>,

    /// Extra ANN candidates fetched beyond `k`; widening the pool improves
    /// recall@k on quantized indexes once exact re-ranking is applied.
    pub k_extra: usize,

    /// Re-rank candidates by exact similarity. When false, ANN order is
    /// preserved.
    pub rerank: bool,

    /// Exact-similarity cutoff: keep `sim >= t` for inner product,
    /// `sim <= t` for L2.
    pub threshold: Option<f32>,

    /// Runtime parameter override for this call only.
    pub runtime_params: Option<String>,

    /// Rows hydrated per database round trip.
    pub fetch_batch_size: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            k_extra: 0,
            rerank: true,
            threshold: None,
            runtime_params: None,
            fetch_batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl SearchOptions {
    /// Request columns by name.
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the extra candidate count.
    pub fn with_k_extra(mut self, k_extra: usize) -> Self {
        self.k_extra = k_extra;
        self
    }

    /// Disable exact re-ranking.
    pub fn without_rerank(mut self) -> Self {
        self.rerank = false;
        self
    }

    /// Set the exact-similarity threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Set a per-call runtime parameter override.
    pub fn with_runtime_params(mut self, params: impl Into<String>) -> Self {
        self.runtime_params = Some(params.into());
        self
    }
}

// ============================================================================
// Result shapes
// ============================================================================

/// One returned neighbor: the requested columns plus the exact similarity.
///
/// ANN scores never appear here; `metric` is always recomputed from the
/// stored vector, which keeps results correct under aggressive quantization.
#[derive(Debug, Clone, Serialize)]
pub struct Neighbor {
    /// The neighbor's idx, when the idx column was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idx: Option<i64>,

    /// Exact similarity under the index metric.
    pub metric: f32,

    /// The decoded vector, when the vector column was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,

    /// Requested user columns by name.
    pub columns: Row,
}

/// Neighbors of one search query.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// Neighbors, best first.
    pub neighbors: Vec<Neighbor>,
}

/// One query record from `nearest_neighbors`, with its neighbors attached.
#[derive(Debug, Clone, Serialize)]
pub struct QueryNeighbors {
    /// The query record's idx, when the idx column was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idx: Option<i64>,

    /// The query record's decoded vector, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,

    /// Requested user columns of the query record.
    pub columns: Row,

    /// Neighbors, best first; never contains the query record itself.
    pub neighbors: Vec<Neighbor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_from_rows() {
        let m = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.dim(), 2);
        assert_eq!(m.row(1), &[3.0, 4.0]);
    }

    #[test]
    fn test_matrix_rejects_ragged_rows() {
        let err = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, VekterError::RaggedMatrix { .. }));
    }

    #[test]
    fn test_matrix_from_row_reshapes() {
        let m = Matrix::from_row(&[1.0, 2.0, 3.0]);
        assert_eq!(m.rows(), 1);
        assert_eq!(m.dim(), 3);
    }

    #[test]
    fn test_matrix_from_flat() {
        let m = Matrix::from_flat(vec![1.0, 2.0, 3.0, 4.0], 2).unwrap();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.row(0), &[1.0, 2.0]);
        assert!(Matrix::from_flat(vec![1.0, 2.0, 3.0], 2).is_err());
    }

    #[test]
    fn test_matrix_empty() {
        let m = Matrix::from_rows(vec![]).unwrap();
        assert!(m.is_empty());
        assert_eq!(m.dim(), 0);
    }

    #[test]
    fn test_record_builders() {
        let record = Record::new(vec![1.0, 0.0])
            .with_idx(7)
            .with_column("name", "seven");
        assert_eq!(record.idx, Some(7));
        assert_eq!(record.columns["name"].as_text(), Some("seven"));
    }

    #[test]
    fn test_search_options_defaults() {
        let opts = SearchOptions::default();
        assert!(opts.rerank);
        assert_eq!(opts.k_extra, 0);
        assert!(opts.threshold.is_none());
        assert_eq!(opts.fetch_batch_size, DEFAULT_BATCH_SIZE);
    }
}
