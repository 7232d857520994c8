//! The `VekterDb` engine.
//!
//! A `VekterDb` owns one row store and at most one in-memory ANN index, and
//! keeps the two aligned: row `idx` values are simultaneously ANN positions.
//! Instances are single-threaded; callers serialize operations.
//!
//! Ingestion and catch-up live in [`crate::sync`]; the query pipeline lives
//! in [`crate::search`]. This module owns construction, the index
//! lifecycle, sampling, and config save/load.

use std::path::{Path, PathBuf};

use rand::thread_rng;
use tracing::{debug, info, warn};

use vekter_ann::{AnnIndex, Metric};
use vekter_db::{codec, Row, RowStore, TableConfig};

use crate::config::{load_config, save_config, ConfigSnapshot};
use crate::errors::{VekterError, VekterResult};
use crate::types::Matrix;

/// A relational table with an attached ANN index over its vectors.
pub struct VekterDb {
    pub(crate) store: RowStore,
    pub(crate) index: Option<AnnIndex>,
    pub(crate) index_path: Option<PathBuf>,
    pub(crate) dim: Option<usize>,
}

impl VekterDb {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Wrap an opened row store.
    ///
    /// On a reopened table the vector dimension is rediscovered from any
    /// stored vector; a pre-existing but empty table leaves the dimension
    /// unset until the first insert.
    pub fn new(store: RowStore) -> VekterResult<Self> {
        let dim = match store.sample_one_vector()? {
            Some(blob) => {
                let vector = codec::deserialize(&blob)?;
                debug!(
                    "Rediscovered dimension {} from table '{}'",
                    vector.len(),
                    store.table_name()
                );
                Some(vector.len())
            }
            None => {
                if store.reflected() {
                    warn!(
                        "Table '{}' exists but is empty; dimension unknown until first insert",
                        store.table_name()
                    );
                }
                None
            }
        };

        Ok(Self {
            store,
            index: None,
            index_path: None,
            dim,
        })
    }

    /// Open against a SQLite database file.
    pub fn open_path(db_path: impl AsRef<Path>, config: TableConfig) -> VekterResult<Self> {
        Self::new(RowStore::open_path(db_path, config)?)
    }

    /// Open against an in-memory SQLite database.
    pub fn open_in_memory(config: TableConfig) -> VekterResult<Self> {
        Self::new(RowStore::open_in_memory(config)?)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The underlying row store.
    pub fn store(&self) -> &RowStore {
        &self.store
    }

    /// The established vector dimension, once known.
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    /// The attached ANN index, if any.
    pub fn index(&self) -> Option<&AnnIndex> {
        self.index.as_ref()
    }

    /// Path the ANN index persists to.
    pub fn index_path(&self) -> Option<&Path> {
        self.index_path.as_deref()
    }

    /// Number of rows in the table (`max_idx + 1` under the contiguity
    /// invariant).
    pub fn count(&self) -> VekterResult<i64> {
        Ok(self.store.max_idx()?.map_or(0, |m| m + 1))
    }

    /// Vectors in the ANN index; 0 when no index is attached.
    pub fn ntotal(&self) -> i64 {
        self.index.as_ref().map_or(0, |i| i.ntotal())
    }

    // ========================================================================
    // Index lifecycle
    // ========================================================================

    /// Create an empty ANN index persisting to `path`.
    ///
    /// Fails if an index is already attached, if `path` exists, or if the
    /// vector dimension is not yet known.
    pub fn create_index(
        &mut self,
        path: impl Into<PathBuf>,
        factory: &str,
        metric: Metric,
    ) -> VekterResult<()> {
        if self.index.is_some() {
            return Err(VekterError::IndexAlreadyAssigned);
        }
        let path = path.into();
        if path.exists() {
            return Err(VekterError::IndexFileExists { path });
        }
        let dim = self.dim.ok_or(VekterError::DimensionUnknown)?;

        let index = AnnIndex::build(factory, dim, metric)?;
        info!(
            "Created index '{}' (metric={}, d={}) persisting to {}",
            factory,
            metric,
            dim,
            path.display()
        );
        self.index = Some(index);
        self.index_path = Some(path);
        Ok(())
    }

    /// Train the attached index from a sample matrix.
    ///
    /// An empty sample warns and leaves the index untrained.
    pub fn train_index(&mut self, sample: &Matrix) -> VekterResult<()> {
        let dim = self.dim.ok_or(VekterError::DimensionUnknown)?;
        let index = self.index.as_mut().ok_or(VekterError::NoIndex)?;
        if sample.is_empty() {
            warn!("Training sample is empty; index remains untrained");
            return Ok(());
        }
        if sample.dim() != dim {
            return Err(VekterError::DimensionMismatch {
                expected: dim,
                actual: sample.dim(),
            });
        }
        index.train(sample.data())?;
        Ok(())
    }

    /// Sample stored vectors and train the attached index on them.
    pub fn train_index_from_sample(
        &mut self,
        sample_size: usize,
        batch_size: usize,
    ) -> VekterResult<()> {
        let sample = self.sample_vectors(sample_size, batch_size)?;
        self.train_index(&sample)
    }

    /// Validate and apply a runtime parameter string on the attached index.
    ///
    /// The string is cached on the handle and round-trips through
    /// save/load.
    pub fn set_index_runtime_parameters(&mut self, raw: &str) -> VekterResult<()> {
        let index = self.index.as_mut().ok_or(VekterError::NoIndex)?;
        index.set_runtime_parameters(raw)?;
        Ok(())
    }

    /// Persist the attached index to its configured path.
    pub(crate) fn persist_index(&self) -> VekterResult<()> {
        if let (Some(index), Some(path)) = (&self.index, &self.index_path) {
            index.write(path)?;
        }
        Ok(())
    }

    // ========================================================================
    // Sampling
    // ========================================================================

    /// Uniformly sample `n` distinct stored vectors (all of them when
    /// `n == 0`) into an `(n, d)` matrix, hydrating in `batch_size`-sized
    /// point lookups.
    pub fn sample_vectors(&self, n: usize, batch_size: usize) -> VekterResult<Matrix> {
        let total = self.count()? as usize;
        if total == 0 {
            warn!("Table '{}' is empty; nothing to sample", self.store.table_name());
            return Ok(Matrix::empty());
        }

        let amount = if n == 0 { total } else { n.min(total) };
        let mut ids: Vec<i64> = if amount == total {
            (0..total as i64).collect()
        } else {
            rand::seq::index::sample(&mut thread_rng(), total, amount)
                .into_iter()
                .map(|i| i as i64)
                .collect()
        };
        ids.sort_unstable();

        let mut matrix = Matrix::empty();
        let idx_name = self.store.idx_name().to_string();
        let vector_name = self.store.vector_name().to_string();
        for chunk in ids.chunks(batch_size.max(1)) {
            let clause = in_clause(&idx_name, chunk);
            let rows = self
                .store
                .select_where(Some(&clause), &[&vector_name])?;
            for row in rows {
                let blob = row
                    .get(&vector_name)
                    .and_then(|v| v.as_blob())
                    .ok_or_else(|| {
                        VekterError::Db(vekter_db::DbError::codec("vector column is not a blob"))
                    })?;
                let vector = self.decode_vector(blob)?;
                matrix.push_row(&vector)?;
            }
        }

        debug!("Sampled {} of {} vectors", matrix.rows(), total);
        Ok(matrix)
    }

    // ========================================================================
    // Select
    // ========================================================================

    /// Generic predicate-based row retrieval.
    ///
    /// `where_clause` is raw SQL without the `WHERE` keyword; `None`
    /// selects everything.
    pub fn select(&self, where_clause: Option<&str>, columns: &[&str]) -> VekterResult<Vec<Row>> {
        Ok(self.store.select_where(where_clause, columns)?)
    }

    // ========================================================================
    // Save / load
    // ========================================================================

    /// Persist the ANN index (when attached) and write a JSON config
    /// snapshot to `config_path`.
    pub fn save(&self, config_path: impl AsRef<Path>) -> VekterResult<()> {
        self.persist_index()?;
        let snapshot = ConfigSnapshot {
            table_name: self.store.table_name().to_string(),
            idx_name: self.store.idx_name().to_string(),
            vector_name: self.store.vector_name().to_string(),
            faiss_index: self.index_path.clone(),
            faiss_runtime_parameters: self
                .index
                .as_ref()
                .and_then(|i| i.runtime_parameters())
                .map(str::to_string),
        };
        save_config(config_path.as_ref(), &snapshot)
    }

    /// Restore an instance from a config snapshot and a database file.
    ///
    /// The table is reflected, the ANN file (when named) is read back, the
    /// cached runtime parameters are re-applied, and the dimension and
    /// vector counts are sanity-checked against each other.
    pub fn load(config_path: impl AsRef<Path>, db_path: impl AsRef<Path>) -> VekterResult<Self> {
        let snapshot = load_config(config_path.as_ref())?;
        let table_config = TableConfig::new(&snapshot.table_name)
            .with_idx_name(&snapshot.idx_name)
            .with_vector_name(&snapshot.vector_name);
        let store = RowStore::open_path(db_path, table_config)?;
        let mut db = Self::new(store)?;

        if let Some(ann_path) = snapshot.faiss_index {
            if !ann_path.exists() {
                return Err(VekterError::IndexFileMissing { path: ann_path });
            }
            let mut index = AnnIndex::read(&ann_path)?;

            match db.dim {
                Some(dim) if dim != index.dim() => {
                    return Err(VekterError::DimensionMismatch {
                        expected: dim,
                        actual: index.dim(),
                    });
                }
                Some(_) => {}
                None => db.dim = Some(index.dim()),
            }
            let rows = db.count()?;
            if index.ntotal() > rows {
                return Err(VekterError::IndexAheadOfTable {
                    ntotal: index.ntotal(),
                    rows,
                });
            }
            if let Some(params) = &snapshot.faiss_runtime_parameters {
                index.set_runtime_parameters(params)?;
            }

            info!(
                "Loaded index '{}' with {} vectors from {}",
                index.descriptor(),
                index.ntotal(),
                ann_path.display()
            );
            db.index = Some(index);
            db.index_path = Some(ann_path);
        }

        Ok(db)
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    /// Decode a stored vector blob, enforcing the table dimension when it
    /// is known.
    pub(crate) fn decode_vector(&self, blob: &[u8]) -> VekterResult<Vec<f32>> {
        let vector = codec::deserialize(blob)?;
        if let Some(dim) = self.dim {
            if vector.len() != dim {
                return Err(VekterError::DimensionMismatch {
                    expected: dim,
                    actual: vector.len(),
                });
            }
        }
        Ok(vector)
    }
}

/// Build an `IN (...)` predicate over idx values.
pub(crate) fn in_clause(idx_name: &str, ids: &[i64]) -> String {
    let list = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} IN ({})", idx_name, list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InsertOptions, Record};

    fn fresh_db() -> VekterDb {
        VekterDb::open_in_memory(TableConfig::new("records")).unwrap()
    }

    fn insert_unit_vectors(db: &mut VekterDb, n: usize, dim: usize) {
        let records: Vec<Record> = (0..n)
            .map(|i| {
                let mut v = vec![0.0f32; dim];
                v[i % dim] = 1.0 + (i / dim) as f32;
                Record::new(v)
            })
            .collect();
        db.insert(&records, &InsertOptions::default()).unwrap();
    }

    #[test]
    fn test_empty_table_has_no_dimension() {
        let db = fresh_db();
        assert_eq!(db.dim(), None);
        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn test_create_index_requires_dimension() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut db = fresh_db();
        let err = db
            .create_index(temp.path().join("a.ann"), "Flat", Metric::L2)
            .unwrap_err();
        assert!(matches!(err, VekterError::DimensionUnknown));
    }

    #[test]
    fn test_create_index_twice_rejected() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut db = fresh_db();
        insert_unit_vectors(&mut db, 4, 4);
        db.create_index(temp.path().join("a.ann"), "Flat", Metric::L2)
            .unwrap();
        let err = db
            .create_index(temp.path().join("b.ann"), "Flat", Metric::L2)
            .unwrap_err();
        assert!(matches!(err, VekterError::IndexAlreadyAssigned));
    }

    #[test]
    fn test_create_index_path_collision_rejected() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("a.ann");
        std::fs::write(&path, b"occupied").unwrap();

        let mut db = fresh_db();
        insert_unit_vectors(&mut db, 4, 4);
        let err = db.create_index(&path, "Flat", Metric::L2).unwrap_err();
        assert!(matches!(err, VekterError::IndexFileExists { .. }));
    }

    #[test]
    fn test_sample_vectors_counts() {
        let mut db = fresh_db();
        insert_unit_vectors(&mut db, 10, 4);

        let all = db.sample_vectors(0, 3).unwrap();
        assert_eq!(all.rows(), 10);
        assert_eq!(all.dim(), 4);

        let some = db.sample_vectors(4, 3).unwrap();
        assert_eq!(some.rows(), 4);

        let clamped = db.sample_vectors(100, 3).unwrap();
        assert_eq!(clamped.rows(), 10);
    }

    #[test]
    fn test_sample_vectors_empty_table() {
        let db = fresh_db();
        let matrix = db.sample_vectors(0, 10).unwrap();
        assert!(matrix.is_empty());
        assert_eq!(matrix.dim(), 0);
    }

    #[test]
    fn test_empty_training_sample_warns_not_errors() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut db = fresh_db();
        insert_unit_vectors(&mut db, 4, 4);
        db.create_index(temp.path().join("a.ann"), "IVF2,Flat", Metric::L2)
            .unwrap();
        db.train_index(&Matrix::empty()).unwrap();
        assert!(!db.index().unwrap().is_trained());
    }

    #[test]
    fn test_in_clause() {
        assert_eq!(in_clause("idx", &[1, 2, 3]), "idx IN (1, 2, 3)");
    }
}
