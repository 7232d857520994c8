//! Keeping the ANN index aligned with the row store.
//!
//! Two entry points:
//!
//! - [`VekterDb::insert`] — the ingest path. Rows are written in
//!   transactional batches; when the index is trained the same vectors are
//!   added in the same order, so positions equal idx values.
//! - [`VekterDb::sync_index_to_db`] — the catch-up path. Appends every row
//!   the index is missing, verifying the contiguous-id invariant first.
//!
//! The index file on disk only moves forward at the end of a successful
//! call. Row-store failures abort and propagate; in-memory index additions
//! from completed batches are not rolled back, and the next catch-up run
//! reconciles them.

use tracing::{debug, info, warn};

use vekter_ann::{AnnIndex, ParamGuard};
use vekter_db::{codec, Row, Value};

use crate::db::VekterDb;
use crate::errors::{VekterError, VekterResult};
use crate::types::{InsertOptions, Record, VectorPayload};

impl VekterDb {
    /// Bulk-ingest records, keeping the ANN index synchronized.
    ///
    /// The first record establishes the dimension when it is not yet known.
    /// Explicit `idx` values must be exactly the next free integers; records
    /// without one are auto-assigned. Returns the number of records
    /// inserted.
    pub fn insert(&mut self, records: &[Record], opts: &InsertOptions) -> VekterResult<usize> {
        if records.is_empty() {
            debug!("insert called with no records; nothing to do");
            return Ok(0);
        }

        let first_len = match &records[0].vector {
            VectorPayload::Floats(v) => v.len(),
            VectorPayload::Serialized(blob) => codec::deserialize(blob)?.len(),
        };
        let dim = match self.dim {
            Some(dim) => {
                if first_len != dim {
                    return Err(VekterError::DimensionMismatch {
                        expected: dim,
                        actual: first_len,
                    });
                }
                dim
            }
            None => {
                debug!("Establishing dimension {} from first insert", first_len);
                self.dim = Some(first_len);
                first_len
            }
        };

        let mut next = self.count()?;
        let idx_name = self.store.idx_name().to_string();
        let vector_name = self.store.vector_name().to_string();

        let mut handle = IndexHandle::new(&mut self.index, opts.runtime_params.as_deref())?;
        let trained = handle.get().map_or(false, |i| i.is_trained());
        if handle.get().is_some() && !trained {
            warn!("ANN index is not trained; inserting rows without index updates");
        }

        let mut added_any = false;
        for chunk in records.chunks(opts.batch_size.max(1)) {
            let mut rows: Vec<Row> = Vec::with_capacity(chunk.len());
            let mut floats: Vec<f32> = Vec::with_capacity(if trained {
                chunk.len() * dim
            } else {
                0
            });

            for record in chunk {
                let idx = match record.idx {
                    Some(i) if i == next => i,
                    Some(i) => {
                        return Err(VekterError::NonContiguousInsert {
                            expected: next,
                            got: i,
                        })
                    }
                    None => next,
                };
                next += 1;

                let blob = match &record.vector {
                    VectorPayload::Floats(v) => {
                        if v.len() != dim {
                            return Err(VekterError::DimensionMismatch {
                                expected: dim,
                                actual: v.len(),
                            });
                        }
                        if trained {
                            floats.extend_from_slice(v);
                        }
                        codec::serialize(v, opts.compression_level)?
                    }
                    VectorPayload::Serialized(blob) => {
                        if trained {
                            let v = codec::deserialize(blob)?;
                            if v.len() != dim {
                                return Err(VekterError::DimensionMismatch {
                                    expected: dim,
                                    actual: v.len(),
                                });
                            }
                            floats.extend_from_slice(&v);
                        }
                        blob.clone()
                    }
                };

                let mut row = record.columns.clone();
                row.insert(idx_name.clone(), Value::Integer(idx));
                row.insert(vector_name.clone(), Value::Blob(blob));
                rows.push(row);
            }

            self.store.insert_many(&rows)?;
            if trained {
                if let Some(index) = handle.get_mut() {
                    index.add(&floats)?;
                    added_any = true;
                }
            }
        }

        drop(handle);
        if added_any {
            self.persist_index()?;
        }

        info!(
            "Inserted {} records into '{}' (rows={}, ntotal={})",
            records.len(),
            self.store.table_name(),
            next,
            self.ntotal()
        );
        Ok(records.len())
    }

    /// Append to the ANN index every vector present in the row store but
    /// missing from the index, then persist it.
    ///
    /// Fails with [`VekterError::ContiguityGap`] when the idx sequence has a
    /// hole. Running it twice in a row is a no-op the second time. Returns
    /// the resulting `ntotal`.
    pub fn sync_index_to_db(
        &mut self,
        batch_size: usize,
        runtime_params: Option<&str>,
    ) -> VekterResult<i64> {
        let stop = self.count()?;
        let start = self.index.as_ref().ok_or(VekterError::NoIndex)?.ntotal();
        if start >= stop {
            debug!("Index already in sync (ntotal={})", start);
            return Ok(start);
        }

        let found = self.store.count_in_range(start, stop)?;
        if found != stop - start {
            let missing = self.store.first_gap_in_range(start, stop)?.unwrap_or(start);
            return Err(VekterError::ContiguityGap {
                missing,
                start,
                stop,
            });
        }

        let dim = self.dim.ok_or(VekterError::DimensionUnknown)?;
        let mut handle = IndexHandle::new(&mut self.index, runtime_params)?;

        let step = batch_size.max(1) as i64;
        let mut lo = start;
        while lo < stop {
            let hi = (lo + step).min(stop);
            let blobs = self.store.select_vectors_by_id_range(lo, hi)?;
            let mut floats = Vec::with_capacity(blobs.len() * dim);
            for blob in &blobs {
                let vector = codec::deserialize(blob)?;
                if vector.len() != dim {
                    return Err(VekterError::DimensionMismatch {
                        expected: dim,
                        actual: vector.len(),
                    });
                }
                floats.extend_from_slice(&vector);
            }
            match handle.get_mut() {
                Some(index) => index.add(&floats)?,
                None => return Err(VekterError::NoIndex),
            };
            lo = hi;
        }

        drop(handle);
        self.persist_index()?;

        let ntotal = self.ntotal();
        info!(
            "Synchronized index with '{}': added [{}, {}), ntotal={}",
            self.store.table_name(),
            start,
            stop,
            ntotal
        );
        Ok(ntotal)
    }
}

// ============================================================================
// IndexHandle
// ============================================================================

/// Borrow of the optional index with an optional scoped parameter override.
///
/// Dropping the handle restores the previous runtime parameters, on every
/// exit path.
enum IndexHandle<'a> {
    Absent,
    Plain(&'a mut AnnIndex),
    Guarded(ParamGuard<'a>),
}

impl<'a> IndexHandle<'a> {
    fn new(index: &'a mut Option<AnnIndex>, params: Option<&str>) -> VekterResult<Self> {
        Ok(match (index.as_mut(), params) {
            (None, _) => Self::Absent,
            (Some(index), None) => Self::Plain(index),
            (Some(index), Some(raw)) => Self::Guarded(index.override_params(raw)?),
        })
    }

    fn get(&self) -> Option<&AnnIndex> {
        match self {
            Self::Absent => None,
            Self::Plain(index) => Some(index),
            Self::Guarded(guard) => Some(&**guard),
        }
    }

    fn get_mut(&mut self) -> Option<&mut AnnIndex> {
        match self {
            Self::Absent => None,
            Self::Plain(index) => Some(index),
            Self::Guarded(guard) => Some(&mut **guard),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
