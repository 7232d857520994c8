//! The trainable ANN index handle.
//!
//! An index is composed from a factory descriptor (see [`crate::factory`])
//! and addressed purely by integer positions `[0, ntotal)`; it owns no row
//! data. Vectors only enter after training (flat indexes are trained on
//! construction), positions are assigned consecutively, and nothing is ever
//! deleted.
//!
//! Persistence is a single opaque binary file: a format-version word
//! followed by the bincode encoding of the full index state, so the metric,
//! dimension, training state, and cached runtime parameters are all
//! recoverable from the file alone.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::ops::{Deref, DerefMut};
use std::path::Path;

use bincode::{config, Decode, Encode};
use tracing::{debug, info};

use crate::error::{AnnError, AnnResult};
use crate::factory::{self, IndexSpec, StorageKind};
use crate::kmeans;
use crate::metric::Metric;
use crate::params::RuntimeParams;
use crate::pq::ProductQuantizer;

/// On-disk format version.
const FORMAT_VERSION: u32 = 1;

/// Id used to pad result rows with fewer than `k` candidates.
pub const PAD_ID: i64 = -1;

// ============================================================================
// SearchPage
// ============================================================================

/// Row-major `(nq, k)` search result page.
///
/// `ids[i * k + j]` is the position of the j-th candidate for query i;
/// missing candidates are padded with [`PAD_ID`] and the metric's worst
/// score.
#[derive(Debug, Clone)]
pub struct SearchPage {
    /// Candidate scores, `nq * k`.
    pub scores: Vec<f32>,
    /// Candidate positions, `nq * k`.
    pub ids: Vec<i64>,
    /// Number of queries.
    pub nq: usize,
    /// Candidates requested per query.
    pub k: usize,
}

impl SearchPage {
    /// Candidate positions for query `i`.
    pub fn row_ids(&self, i: usize) -> &[i64] {
        &self.ids[i * self.k..(i + 1) * self.k]
    }

    /// Candidate scores for query `i`.
    pub fn row_scores(&self, i: usize) -> &[f32] {
        &self.scores[i * self.k..(i + 1) * self.k]
    }
}

// ============================================================================
// Internal storage
// ============================================================================

/// Encoded vector storage, indexed by position.
#[derive(Debug, Clone, Encode, Decode)]
enum Storage {
    /// Full-precision rows, `ntotal * dim`.
    Flat { data: Vec<f32> },
    /// PQ codes, `ntotal * m`. The quantizer exists once trained.
    Pq {
        m: usize,
        quantizer: Option<ProductQuantizer>,
        codes: Vec<u8>,
    },
}

/// IVF coarse quantizer: centroids plus per-list position postings.
#[derive(Debug, Clone, Encode, Decode)]
struct IvfCoarse {
    centroids: Vec<f32>,
    lists: Vec<Vec<i64>>,
}

// ============================================================================
// AnnIndex
// ============================================================================

/// A trainable approximate-nearest-neighbor index.
#[derive(Debug, Encode, Decode)]
pub struct AnnIndex {
    spec: IndexSpec,
    metric: Metric,
    dim: usize,
    trained: bool,
    ntotal: i64,
    params: RuntimeParams,
    params_string: Option<String>,
    coarse: Option<IvfCoarse>,
    storage: Storage,
}

impl AnnIndex {
    /// Construct an empty index from a factory descriptor.
    pub fn build(descriptor: &str, dim: usize, metric: Metric) -> AnnResult<Self> {
        let spec = factory::parse(descriptor)?;
        if dim == 0 {
            return Err(AnnError::Dimension {
                dim,
                message: "dimension must be > 0".to_string(),
            });
        }
        if let StorageKind::Pq { m } = spec.storage {
            if dim % m != 0 {
                return Err(AnnError::Dimension {
                    dim,
                    message: format!("dimension must be a multiple of PQ m={}", m),
                });
            }
        }

        let storage = match spec.storage {
            StorageKind::Flat => Storage::Flat { data: Vec::new() },
            StorageKind::Pq { m } => Storage::Pq {
                m,
                quantizer: None,
                codes: Vec::new(),
            },
        };
        let trained = !spec.requires_training();

        debug!(
            "Built index '{}' d={} metric={} trained={}",
            descriptor, dim, metric, trained
        );
        Ok(Self {
            spec,
            metric,
            dim,
            trained,
            ntotal: 0,
            params: RuntimeParams::default(),
            params_string: None,
            coarse: None,
            storage,
        })
    }

    /// Factory descriptor this index was built from.
    pub fn descriptor(&self) -> &str {
        &self.spec.descriptor
    }

    /// Similarity metric.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Vector dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Whether vectors may be added.
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Number of vectors added so far.
    pub fn ntotal(&self) -> i64 {
        self.ntotal
    }

    /// The last applied runtime parameter string, if any.
    pub fn runtime_parameters(&self) -> Option<&str> {
        self.params_string.as_deref()
    }

    // ========================================================================
    // Train / add
    // ========================================================================

    /// Train learned components from a row-major `(n, dim)` sample.
    ///
    /// A no-op on an index that is already trained.
    pub fn train(&mut self, data: &[f32]) -> AnnResult<()> {
        if self.trained {
            debug!("Index '{}' already trained; skipping", self.spec.descriptor);
            return Ok(());
        }
        self.check_shape(data)?;
        if data.is_empty() {
            return Err(AnnError::EmptyTraining);
        }
        let n = data.len() / self.dim;

        if let Some(nlist) = self.spec.nlist {
            info!(
                "Training IVF coarse quantizer: {} centroids over {} vectors",
                nlist, n
            );
            let centroids = kmeans::run(data, self.dim, nlist, kmeans::DEFAULT_ITERATIONS);
            self.coarse = Some(IvfCoarse {
                centroids,
                lists: vec![Vec::new(); nlist],
            });
        }

        if let Storage::Pq { m, quantizer, .. } = &mut self.storage {
            info!("Training PQ codebooks: m={} over {} vectors", m, n);
            *quantizer =
                Some(ProductQuantizer::train(self.dim, *m, data, kmeans::DEFAULT_ITERATIONS)?);
        }

        self.trained = true;
        Ok(())
    }

    /// Append row-major `(n, dim)` vectors at consecutive positions.
    pub fn add(&mut self, data: &[f32]) -> AnnResult<usize> {
        if !self.trained {
            return Err(AnnError::NotTrained);
        }
        self.check_shape(data)?;
        let n = data.len() / self.dim;

        if let Some(coarse) = &mut self.coarse {
            for i in 0..n {
                let vector = &data[i * self.dim..(i + 1) * self.dim];
                let list = kmeans::nearest(&coarse.centroids, self.dim, vector);
                coarse.lists[list].push(self.ntotal + i as i64);
            }
        }

        match &mut self.storage {
            Storage::Flat { data: stored } => stored.extend_from_slice(data),
            Storage::Pq {
                quantizer, codes, ..
            } => {
                // Trained is checked above; PQ storage always has a
                // quantizer once trained.
                let quantizer = quantizer.as_ref().ok_or(AnnError::NotTrained)?;
                for i in 0..n {
                    quantizer.encode_into(&data[i * self.dim..(i + 1) * self.dim], codes);
                }
            }
        }

        self.ntotal += n as i64;
        debug!(
            "Added {} vectors to '{}' (ntotal={})",
            n, self.spec.descriptor, self.ntotal
        );
        Ok(n)
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Search `(nq, dim)` queries for the `k` best candidates each.
    ///
    /// `params` optionally overrides the cached runtime parameters for this
    /// call only.
    pub fn search(
        &self,
        queries: &[f32],
        k: usize,
        params: Option<&str>,
    ) -> AnnResult<SearchPage> {
        if !self.trained {
            return Err(AnnError::NotTrained);
        }
        self.check_shape(queries)?;
        let nq = queries.len() / self.dim;

        let effective = match params {
            Some(raw) => RuntimeParams::resolve(&self.spec, raw)?,
            None => self.params.clone(),
        };

        let mut page = SearchPage {
            scores: Vec::with_capacity(nq * k),
            ids: Vec::with_capacity(nq * k),
            nq,
            k,
        };

        for qi in 0..nq {
            let query = &queries[qi * self.dim..(qi + 1) * self.dim];
            let mut scored = self.score_candidates(query, &effective)?;
            scored.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .map(|o| if self.metric == Metric::L2 { o.reverse() } else { o })
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.1.cmp(&b.1))
            });
            scored.truncate(k);
            while scored.len() < k {
                scored.push((self.metric.worst(), PAD_ID));
            }
            for (score, id) in scored {
                page.scores.push(score);
                page.ids.push(id);
            }
        }

        Ok(page)
    }

    /// Score every candidate position visible to the query.
    fn score_candidates(
        &self,
        query: &[f32],
        params: &RuntimeParams,
    ) -> AnnResult<Vec<(f32, i64)>> {
        enum Scorer<'a> {
            Flat {
                data: &'a [f32],
                dim: usize,
            },
            Pq {
                pq: &'a ProductQuantizer,
                codes: &'a [u8],
                m: usize,
                table: Vec<f32>,
            },
        }

        let scorer = match &self.storage {
            Storage::Flat { data } => Scorer::Flat {
                data,
                dim: self.dim,
            },
            Storage::Pq {
                quantizer,
                codes,
                m,
            } => {
                let pq = quantizer.as_ref().ok_or(AnnError::NotTrained)?;
                Scorer::Pq {
                    pq,
                    codes,
                    m: *m,
                    table: pq.build_table(query, self.metric),
                }
            }
        };

        let score_one = |position: i64| -> f32 {
            match &scorer {
                Scorer::Flat { data, dim } => {
                    let start = position as usize * dim;
                    self.metric.exact(query, &data[start..start + dim])
                }
                Scorer::Pq {
                    pq,
                    codes,
                    m,
                    table,
                } => {
                    let start = position as usize * m;
                    pq.score_with_table(table, &codes[start..start + m], self.metric)
                }
            }
        };

        Ok(match &self.coarse {
            Some(coarse) => {
                let probes = kmeans::nearest_n(
                    &coarse.centroids,
                    self.dim,
                    query,
                    params.effective_nprobe(),
                );
                let mut scored = Vec::new();
                for list in probes {
                    for &position in &coarse.lists[list] {
                        scored.push((score_one(position), position));
                    }
                }
                scored
            }
            None => (0..self.ntotal)
                .map(|position| (score_one(position), position))
                .collect(),
        })
    }

    // ========================================================================
    // Runtime parameters
    // ========================================================================

    /// Validate, apply, and cache a runtime parameter string.
    pub fn set_runtime_parameters(&mut self, raw: &str) -> AnnResult<()> {
        let params = RuntimeParams::resolve(&self.spec, raw)?;
        self.params = params;
        self.params_string = Some(raw.to_string());
        debug!("Applied runtime parameters '{}'", raw);
        Ok(())
    }

    /// Apply a parameter string for the lifetime of the returned guard.
    ///
    /// The previous parameters are restored when the guard drops, on every
    /// exit path.
    pub fn override_params(&mut self, raw: &str) -> AnnResult<ParamGuard<'_>> {
        let params = RuntimeParams::resolve(&self.spec, raw)?;
        let prev = (self.params.clone(), self.params_string.clone());
        self.params = params;
        self.params_string = Some(raw.to_string());
        Ok(ParamGuard {
            index: self,
            prev: Some(prev),
        })
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Persist the full index state to `path`.
    pub fn write(&self, path: &Path) -> AnnResult<()> {
        let file = File::create(path)
            .map_err(|e| AnnError::index_io(path, format!("failed to create file: {}", e)))?;
        let mut writer = BufWriter::new(file);
        bincode::encode_into_std_write(FORMAT_VERSION, &mut writer, config::standard())
            .map_err(|e| AnnError::index_io(path, format!("failed to write header: {}", e)))?;
        bincode::encode_into_std_write(self, &mut writer, config::standard())
            .map_err(|e| AnnError::index_io(path, format!("failed to serialize index: {}", e)))?;
        debug!(
            "Persisted index '{}' (ntotal={}) to {}",
            self.spec.descriptor,
            self.ntotal,
            path.display()
        );
        Ok(())
    }

    /// Load an index previously written with [`AnnIndex::write`].
    pub fn read(path: &Path) -> AnnResult<Self> {
        let file = File::open(path)
            .map_err(|e| AnnError::index_io(path, format!("failed to open file: {}", e)))?;
        let mut reader = BufReader::new(file);
        let version: u32 = bincode::decode_from_std_read(&mut reader, config::standard())
            .map_err(|e| AnnError::index_decode(path, format!("failed to read header: {}", e)))?;
        if version != FORMAT_VERSION {
            return Err(AnnError::index_decode(
                path,
                format!("unsupported format version {}", version),
            ));
        }
        let index: Self = bincode::decode_from_std_read(&mut reader, config::standard())
            .map_err(|e| AnnError::index_decode(path, format!("failed to deserialize: {}", e)))?;
        debug!(
            "Loaded index '{}' (ntotal={}) from {}",
            index.spec.descriptor,
            index.ntotal,
            path.display()
        );
        Ok(index)
    }

    fn check_shape(&self, data: &[f32]) -> AnnResult<()> {
        if data.len() % self.dim != 0 {
            return Err(AnnError::BadShape {
                len: data.len(),
                dim: self.dim,
            });
        }
        Ok(())
    }
}

// ============================================================================
// ParamGuard
// ============================================================================

/// Scoped runtime-parameter override; restores the previous parameters on
/// drop.
pub struct ParamGuard<'a> {
    index: &'a mut AnnIndex,
    prev: Option<(RuntimeParams, Option<String>)>,
}

impl Drop for ParamGuard<'_> {
    fn drop(&mut self) {
        if let Some((params, string)) = self.prev.take() {
            self.index.params = params;
            self.index.params_string = string;
        }
    }
}

impl Deref for ParamGuard<'_> {
    type Target = AnnIndex;

    fn deref(&self) -> &AnnIndex {
        self.index
    }
}

impl DerefMut for ParamGuard<'_> {
    fn deref_mut(&mut self) -> &mut AnnIndex {
        self.index
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use tempfile::TempDir;

    fn basis_vectors() -> Vec<f32> {
        vec![
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ]
    }

    fn random_matrix(n: usize, dim: usize) -> Vec<f32> {
        let mut rng = rand::thread_rng();
        (0..n * dim).map(|_| rng.gen::<f32>()).collect()
    }

    #[test]
    fn test_flat_trained_on_construction() {
        let index = AnnIndex::build("Flat", 4, Metric::InnerProduct).unwrap();
        assert!(index.is_trained());
        assert_eq!(index.ntotal(), 0);
    }

    #[test]
    fn test_add_before_train_rejected() {
        let mut index = AnnIndex::build("IVF4,Flat", 4, Metric::L2).unwrap();
        assert!(!index.is_trained());
        assert!(matches!(
            index.add(&basis_vectors()),
            Err(AnnError::NotTrained)
        ));
    }

    #[test]
    fn test_train_is_noop_when_trained() {
        let mut index = AnnIndex::build("Flat", 4, Metric::L2).unwrap();
        index.train(&basis_vectors()).unwrap();
        index.add(&basis_vectors()).unwrap();
        assert_eq!(index.ntotal(), 4);
    }

    #[test]
    fn test_flat_inner_product_search() {
        let mut index = AnnIndex::build("Flat", 4, Metric::InnerProduct).unwrap();
        index.add(&basis_vectors()).unwrap();

        let page = index.search(&[1.0, 0.0, 0.0, 0.0], 2, None).unwrap();
        assert_eq!(page.row_ids(0)[0], 0);
        assert!((page.row_scores(0)[0] - 1.0).abs() < 1e-6);
        assert!((page.row_scores(0)[1] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_flat_l2_search() {
        let mut index = AnnIndex::build("Flat", 2, Metric::L2).unwrap();
        index.add(&[0.0, 0.0, 3.0, 4.0, 6.0, 8.0]).unwrap();

        let page = index.search(&[0.0, 0.0], 3, None).unwrap();
        assert_eq!(page.row_ids(0), &[0, 1, 2]);
        assert!((page.row_scores(0)[1] - 5.0).abs() < 1e-5);
        assert!((page.row_scores(0)[2] - 10.0).abs() < 1e-5);
    }

    #[test]
    fn test_padding_when_k_exceeds_ntotal() {
        let mut index = AnnIndex::build("Flat", 4, Metric::InnerProduct).unwrap();
        index.add(&basis_vectors()[..8]).unwrap();

        let page = index.search(&[1.0, 0.0, 0.0, 0.0], 5, None).unwrap();
        assert_eq!(page.row_ids(0).len(), 5);
        assert_eq!(page.row_ids(0)[2], PAD_ID);
        assert_eq!(page.row_scores(0)[2], f32::NEG_INFINITY);
    }

    #[test]
    fn test_empty_index_search_all_padding() {
        let index = AnnIndex::build("Flat", 4, Metric::L2).unwrap();
        let page = index.search(&[0.0; 4], 3, None).unwrap();
        assert!(page.row_ids(0).iter().all(|&id| id == PAD_ID));
    }

    #[test]
    fn test_ivf_full_probe_matches_flat() {
        let dim = 8;
        let data = random_matrix(200, dim);

        let mut flat = AnnIndex::build("Flat", dim, Metric::L2).unwrap();
        flat.add(&data).unwrap();

        let mut ivf = AnnIndex::build("IVF4,Flat", dim, Metric::L2).unwrap();
        ivf.train(&data).unwrap();
        ivf.add(&data).unwrap();

        let query = &data[..dim];
        let reference = flat.search(query, 5, None).unwrap();
        let probed = ivf.search(query, 5, Some("nprobe=4")).unwrap();
        assert_eq!(reference.row_ids(0), probed.row_ids(0));
    }

    #[test]
    fn test_pq_search_finds_near_duplicate() {
        let dim = 16;
        let data = random_matrix(600, dim);

        let mut index = AnnIndex::build("PQ4", dim, Metric::L2).unwrap();
        index.train(&data).unwrap();
        index.add(&data).unwrap();

        // The query vector itself is in the index; quantization noise may
        // demote it but it should stay near the top.
        let page = index.search(&data[..dim], 10, None).unwrap();
        assert!(page.row_ids(0).contains(&0));
    }

    #[test]
    fn test_runtime_parameter_caching_and_override() {
        let data = random_matrix(100, 4);
        let mut index = AnnIndex::build("IVF4,Flat", 4, Metric::L2).unwrap();
        index.train(&data).unwrap();
        index.add(&data).unwrap();

        index.set_runtime_parameters("nprobe=2").unwrap();
        assert_eq!(index.runtime_parameters(), Some("nprobe=2"));

        {
            let guard = index.override_params("nprobe=4").unwrap();
            assert_eq!(guard.runtime_parameters(), Some("nprobe=4"));
        }
        assert_eq!(index.runtime_parameters(), Some("nprobe=2"));

        assert!(index.set_runtime_parameters("bogus=1").is_err());
        // Failed set leaves the previous string in place
        assert_eq!(index.runtime_parameters(), Some("nprobe=2"));
    }

    #[test]
    fn test_persistence_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.ann");

        let data = random_matrix(50, 4);
        let mut index = AnnIndex::build("IVF2,Flat", 4, Metric::InnerProduct).unwrap();
        index.train(&data).unwrap();
        index.add(&data).unwrap();
        index.set_runtime_parameters("nprobe=2").unwrap();
        index.write(&path).unwrap();

        let loaded = AnnIndex::read(&path).unwrap();
        assert_eq!(loaded.dim(), 4);
        assert_eq!(loaded.metric(), Metric::InnerProduct);
        assert!(loaded.is_trained());
        assert_eq!(loaded.ntotal(), 50);
        assert_eq!(loaded.runtime_parameters(), Some("nprobe=2"));

        let query = &data[..4];
        let a = index.search(query, 5, None).unwrap();
        let b = loaded.search(query, 5, None).unwrap();
        assert_eq!(a.row_ids(0), b.row_ids(0));
    }

    #[test]
    fn test_read_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = AnnIndex::read(&temp.path().join("absent.ann")).unwrap_err();
        assert!(matches!(err, AnnError::IndexIo { .. }));
    }

    #[test]
    fn test_bad_shape_rejected() {
        let mut index = AnnIndex::build("Flat", 4, Metric::L2).unwrap();
        assert!(matches!(
            index.add(&[1.0, 2.0, 3.0]),
            Err(AnnError::BadShape { .. })
        ));
    }

    #[test]
    fn test_pq_dimension_mismatch_rejected() {
        assert!(matches!(
            AnnIndex::build("PQ3", 8, Metric::L2),
            Err(AnnError::Dimension { .. })
        ));
    }
}
