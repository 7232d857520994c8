//! The search pipeline.
//!
//! ANN recall over-fetches `k + k_extra` candidate positions, the rows
//! behind the deduplicated candidates are hydrated in bounded `IN (...)`
//! batches, and exact similarities are recomputed from the stored vectors.
//! Only exact scores reach the caller; ANN scores are discarded, which
//! keeps results correct even under aggressive quantization. Re-ranking
//! orders by exact similarity with idx as the tie-breaker, so the output
//! order is fully determined by `(metric, idx)`.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use vekter_ann::{Metric, SearchPage, PAD_ID};
use vekter_db::{Row, Value};

use crate::db::{in_clause, VekterDb};
use crate::errors::{VekterError, VekterResult};
use crate::types::{Matrix, Neighbor, QueryNeighbors, SearchOptions, SearchResult};

/// A hydrated candidate row: decoded vector plus the selected columns.
struct Candidate {
    vector: Vec<f32>,
    row: Row,
}

impl VekterDb {
    // ========================================================================
    // Public queries
    // ========================================================================

    /// k-nearest-neighbor search for one or more query vectors.
    ///
    /// Returns one [`SearchResult`] per query row. Neighbors carry the
    /// columns named in `opts.columns` plus the exact similarity; the idx
    /// and vector columns are included only when requested. Thresholding
    /// may return fewer than `k` neighbors.
    pub fn search(
        &self,
        queries: &Matrix,
        k: usize,
        opts: &SearchOptions,
    ) -> VekterResult<Vec<SearchResult>> {
        let index = self.index.as_ref().ok_or(VekterError::NoIndex)?;
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        if queries.dim() != index.dim() {
            return Err(VekterError::DimensionMismatch {
                expected: index.dim(),
                actual: queries.dim(),
            });
        }

        let fetch_k = k + opts.k_extra;
        let page = index.search(queries.data(), fetch_k, opts.runtime_params.as_deref())?;
        let hydrated = self.hydrate_candidates(&page, opts)?;

        let mut results = Vec::with_capacity(queries.rows());
        for qi in 0..queries.rows() {
            let neighbors = self.shape_neighbors(
                index.metric(),
                queries.row(qi),
                page.row_ids(qi),
                &hydrated,
                k,
                opts,
                None,
            );
            results.push(SearchResult { neighbors });
        }
        Ok(results)
    }

    /// Convenience wrapper for a single query vector.
    pub fn search_one(
        &self,
        query: &[f32],
        k: usize,
        opts: &SearchOptions,
    ) -> VekterResult<SearchResult> {
        let mut results = self.search(&Matrix::from_row(query), k, opts)?;
        // One query row in, one result out.
        match results.pop() {
            Some(result) => Ok(result),
            None => Ok(SearchResult {
                neighbors: Vec::new(),
            }),
        }
    }

    /// Nearest neighbors of the records matching `where_clause`, reusing
    /// their stored vectors as queries.
    ///
    /// Each query record is returned with its `neighbors` attached; a
    /// record never appears among its own neighbors. `k + k_extra + 1`
    /// candidates are fetched internally to leave room for the self-match.
    pub fn nearest_neighbors(
        &self,
        where_clause: &str,
        k: usize,
        opts: &SearchOptions,
    ) -> VekterResult<Vec<QueryNeighbors>> {
        let index = self.index.as_ref().ok_or(VekterError::NoIndex)?;

        let idx_name = self.store.idx_name().to_string();
        let vector_name = self.store.vector_name().to_string();
        let needed = self.needed_columns(opts);
        let needed_refs: Vec<&str> = needed.iter().map(String::as_str).collect();

        let query_rows = self.store.select_where(Some(where_clause), &needed_refs)?;
        if query_rows.is_empty() {
            debug!("nearest_neighbors matched no query rows");
            return Ok(Vec::new());
        }

        let mut queries = Matrix::empty();
        let mut query_meta: Vec<(i64, Row)> = Vec::with_capacity(query_rows.len());
        for row in query_rows {
            let idx = row
                .get(&idx_name)
                .and_then(Value::as_integer)
                .ok_or_else(|| {
                    VekterError::Db(vekter_db::DbError::codec("idx column is not an integer"))
                })?;
            let blob = row
                .get(&vector_name)
                .and_then(Value::as_blob)
                .ok_or_else(|| {
                    VekterError::Db(vekter_db::DbError::codec("vector column is not a blob"))
                })?;
            let vector = self.decode_vector(blob)?;
            queries.push_row(&vector)?;
            query_meta.push((idx, row));
        }
        if queries.dim() != index.dim() {
            return Err(VekterError::DimensionMismatch {
                expected: index.dim(),
                actual: queries.dim(),
            });
        }

        // One extra slot leaves room for the self-match that gets filtered.
        let fetch_k = k + opts.k_extra + 1;
        let page = index.search(queries.data(), fetch_k, opts.runtime_params.as_deref())?;
        let hydrated = self.hydrate_candidates(&page, opts)?;

        let want_idx = opts.columns.iter().any(|c| *c == idx_name);
        let want_vector = opts.columns.iter().any(|c| *c == vector_name);

        let mut results = Vec::with_capacity(query_meta.len());
        for (qi, (own_idx, row)) in query_meta.iter().enumerate() {
            let neighbors = self.shape_neighbors(
                index.metric(),
                queries.row(qi),
                page.row_ids(qi),
                &hydrated,
                k,
                opts,
                Some(*own_idx),
            );
            results.push(QueryNeighbors {
                idx: want_idx.then_some(*own_idx),
                vector: if want_vector {
                    Some(queries.row(qi).to_vec())
                } else {
                    None
                },
                columns: self.user_columns_of(row, opts),
                neighbors,
            });
        }
        Ok(results)
    }

    // ========================================================================
    // Pipeline stages
    // ========================================================================

    /// Columns to hydrate: the requested set plus idx and vector.
    fn needed_columns(&self, opts: &SearchOptions) -> Vec<String> {
        let mut needed: Vec<String> = opts.columns.clone();
        for contract in [self.store.idx_name(), self.store.vector_name()] {
            if !needed.iter().any(|c| c == contract) {
                needed.push(contract.to_string());
            }
        }
        needed
    }

    /// Hydrate the deduplicated candidate set in bounded batches.
    fn hydrate_candidates(
        &self,
        page: &SearchPage,
        opts: &SearchOptions,
    ) -> VekterResult<HashMap<i64, Candidate>> {
        let ids: BTreeSet<i64> = page.ids.iter().copied().filter(|&id| id != PAD_ID).collect();
        let ids: Vec<i64> = ids.into_iter().collect();

        let idx_name = self.store.idx_name().to_string();
        let vector_name = self.store.vector_name().to_string();
        let needed = self.needed_columns(opts);
        let needed_refs: Vec<&str> = needed.iter().map(String::as_str).collect();

        let mut hydrated = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(opts.fetch_batch_size.max(1)) {
            let clause = in_clause(&idx_name, chunk);
            for row in self.store.select_where(Some(&clause), &needed_refs)? {
                let idx = row
                    .get(&idx_name)
                    .and_then(Value::as_integer)
                    .ok_or_else(|| {
                        VekterError::Db(vekter_db::DbError::codec(
                            "idx column is not an integer",
                        ))
                    })?;
                let blob = row
                    .get(&vector_name)
                    .and_then(Value::as_blob)
                    .ok_or_else(|| {
                        VekterError::Db(vekter_db::DbError::codec(
                            "vector column is not a blob",
                        ))
                    })?;
                let vector = self.decode_vector(blob)?;
                hydrated.insert(idx, Candidate { vector, row });
            }
        }

        debug!("Hydrated {} candidate rows", hydrated.len());
        Ok(hydrated)
    }

    /// Exact-similarity scoring, threshold filter, optional re-rank, and
    /// top-k shaping for one query.
    #[allow(clippy::too_many_arguments)]
    fn shape_neighbors(
        &self,
        metric: Metric,
        query: &[f32],
        candidate_ids: &[i64],
        hydrated: &HashMap<i64, Candidate>,
        k: usize,
        opts: &SearchOptions,
        exclude_idx: Option<i64>,
    ) -> Vec<Neighbor> {
        let idx_name = self.store.idx_name();
        let vector_name = self.store.vector_name();
        let want_idx = opts.columns.iter().any(|c| c == idx_name);
        let want_vector = opts.columns.iter().any(|c| c == vector_name);

        let mut kept: Vec<(f32, i64)> = Vec::with_capacity(candidate_ids.len());
        for &id in candidate_ids {
            if id == PAD_ID || exclude_idx == Some(id) {
                continue;
            }
            let Some(candidate) = hydrated.get(&id) else {
                continue;
            };
            let sim = metric.exact(query, &candidate.vector);
            let keep = match (metric, opts.threshold) {
                (_, None) => true,
                (Metric::InnerProduct, Some(t)) => sim >= t,
                (Metric::L2, Some(t)) => sim <= t,
            };
            if keep {
                kept.push((sim, id));
            }
        }

        if opts.rerank {
            kept.sort_by(|a, b| {
                let order = b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal);
                let order = if metric == Metric::L2 {
                    order.reverse()
                } else {
                    order
                };
                order.then_with(|| a.1.cmp(&b.1))
            });
        }
        kept.truncate(k);

        kept.into_iter()
            .filter_map(|(sim, id)| {
                let candidate = hydrated.get(&id)?;
                let mut columns = Row::new();
                for name in &opts.columns {
                    if name == idx_name || name == vector_name {
                        continue;
                    }
                    columns.insert(
                        name.clone(),
                        candidate.row.get(name).cloned().unwrap_or(Value::Null),
                    );
                }
                Some(Neighbor {
                    idx: want_idx.then_some(id),
                    metric: sim,
                    vector: want_vector.then(|| candidate.vector.clone()),
                    columns,
                })
            })
            .collect()
    }

    /// Project the requested user columns out of a hydrated row.
    fn user_columns_of(&self, row: &Row, opts: &SearchOptions) -> Row {
        let idx_name = self.store.idx_name();
        let vector_name = self.store.vector_name();
        let mut columns = Row::new();
        for name in &opts.columns {
            if name == idx_name || name == vector_name {
                continue;
            }
            columns.insert(name.clone(), row.get(name).cloned().unwrap_or(Value::Null));
        }
        columns
    }
}

// ============================================================================
// Tests
// ============================================================================
