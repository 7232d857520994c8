//! Product quantization.
//!
//! Vectors are split into `m` contiguous subvectors; each subvector is
//! replaced by the index of its nearest codebook centroid (256 centroids per
//! subspace, one byte per subvector). Search against codes uses asymmetric
//! distance computation: the query stays full precision and a per-query
//! lookup table turns scoring into `m` table reads per candidate.

use bincode::{Decode, Encode};
use tracing::debug;

use crate::error::{AnnError, AnnResult};
use crate::kmeans;
use crate::metric::{dot, squared_euclidean, Metric};

/// Centroids per subspace; codes are one byte.
pub const KSUB: usize = 256;

/// A trained product quantizer.
#[derive(Debug, Clone, Encode, Decode)]
pub struct ProductQuantizer {
    /// Full vector dimension.
    dim: usize,

    /// Number of sub-quantizers.
    m: usize,

    /// Dimension of each subvector (`dim / m`).
    dsub: usize,

    /// Codebooks, row-major `m * KSUB * dsub`.
    centroids: Vec<f32>,
}

impl ProductQuantizer {
    /// Train codebooks on `n` row-major training vectors.
    pub fn train(dim: usize, m: usize, data: &[f32], iterations: usize) -> AnnResult<Self> {
        if dim == 0 || m == 0 || dim % m != 0 {
            return Err(AnnError::Dimension {
                dim,
                message: format!("dimension must be a positive multiple of PQ m={}", m),
            });
        }
        if data.is_empty() {
            return Err(AnnError::EmptyTraining);
        }
        if data.len() % dim != 0 {
            return Err(AnnError::BadShape {
                len: data.len(),
                dim,
            });
        }

        let n = data.len() / dim;
        let dsub = dim / m;
        debug!("Training PQ: {} vectors, m={}, dsub={}", n, m, dsub);

        let mut centroids = Vec::with_capacity(m * KSUB * dsub);
        let mut subspace = vec![0.0f32; n * dsub];
        for sub in 0..m {
            let offset = sub * dsub;
            for row in 0..n {
                subspace[row * dsub..(row + 1) * dsub]
                    .copy_from_slice(&data[row * dim + offset..row * dim + offset + dsub]);
            }
            centroids.extend(kmeans::run(&subspace, dsub, KSUB, iterations));
        }

        Ok(Self {
            dim,
            m,
            dsub,
            centroids,
        })
    }

    /// Bytes per encoded vector.
    pub fn code_size(&self) -> usize {
        self.m
    }

    /// Full vector dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    fn codebook(&self, sub: usize, code: usize) -> &[f32] {
        let start = (sub * KSUB + code) * self.dsub;
        &self.centroids[start..start + self.dsub]
    }

    /// Append the codes for one vector to `out`.
    pub fn encode_into(&self, vector: &[f32], out: &mut Vec<u8>) {
        for sub in 0..self.m {
            let subvector = &vector[sub * self.dsub..(sub + 1) * self.dsub];
            let mut best = 0usize;
            let mut best_dist = f32::MAX;
            for code in 0..KSUB {
                let dist = squared_euclidean(subvector, self.codebook(sub, code));
                if dist < best_dist {
                    best_dist = dist;
                    best = code;
                }
            }
            out.push(best as u8);
        }
    }

    /// Reconstruct the approximate vector for one code row.
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.dim);
        for (sub, &code) in codes.iter().enumerate() {
            vector.extend_from_slice(self.codebook(sub, code as usize));
        }
        vector
    }

    /// Build the per-query lookup table, `m * KSUB` entries.
    ///
    /// For inner product the entries are subvector dot products (scores sum
    /// to the approximate similarity); for L2 they are squared subvector
    /// distances (sums are squared distances).
    pub fn build_table(&self, query: &[f32], metric: Metric) -> Vec<f32> {
        let mut table = Vec::with_capacity(self.m * KSUB);
        for sub in 0..self.m {
            let subquery = &query[sub * self.dsub..(sub + 1) * self.dsub];
            for code in 0..KSUB {
                let centroid = self.codebook(sub, code);
                table.push(match metric {
                    Metric::InnerProduct => dot(subquery, centroid),
                    Metric::L2 => squared_euclidean(subquery, centroid),
                });
            }
        }
        table
    }

    /// Score one code row against a query table.
    #[inline]
    pub fn score_with_table(&self, table: &[f32], codes: &[u8], metric: Metric) -> f32 {
        let mut total = 0.0f32;
        for (sub, &code) in codes.iter().enumerate() {
            total += table[sub * KSUB + code as usize];
        }
        match metric {
            Metric::InnerProduct => total,
            Metric::L2 => total.sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn random_matrix(n: usize, dim: usize) -> Vec<f32> {
        let mut rng = rand::thread_rng();
        (0..n * dim).map(|_| rng.gen::<f32>()).collect()
    }

    #[test]
    fn test_encode_decode_close() {
        let dim = 16;
        let data = random_matrix(500, dim);
        let pq = ProductQuantizer::train(dim, 4, &data, 15).unwrap();

        let original = &data[..dim];
        let mut codes = Vec::new();
        pq.encode_into(original, &mut codes);
        assert_eq!(codes.len(), 4);

        let decoded = pq.decode(&codes);
        assert_eq!(decoded.len(), dim);
        let mse: f32 = original
            .iter()
            .zip(decoded.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            / dim as f32;
        assert!(mse < 0.1, "MSE too high: {}", mse);
    }

    #[test]
    fn test_table_matches_direct_scoring() {
        let dim = 8;
        let data = random_matrix(300, dim);
        let pq = ProductQuantizer::train(dim, 2, &data, 10).unwrap();

        let query = &data[..dim];
        let mut codes = Vec::new();
        pq.encode_into(&data[dim..2 * dim], &mut codes);

        let table = pq.build_table(query, Metric::L2);
        let via_table = pq.score_with_table(&table, &codes, Metric::L2);
        let direct = crate::metric::euclidean(query, &pq.decode(&codes));
        assert!((via_table - direct).abs() < 1e-4);

        let table = pq.build_table(query, Metric::InnerProduct);
        let via_table = pq.score_with_table(&table, &codes, Metric::InnerProduct);
        let direct = dot(query, &pq.decode(&codes));
        assert!((via_table - direct).abs() < 1e-4);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(matches!(
            ProductQuantizer::train(10, 3, &[0.0; 20], 5),
            Err(AnnError::Dimension { .. })
        ));
        assert!(matches!(
            ProductQuantizer::train(8, 2, &[], 5),
            Err(AnnError::EmptyTraining)
        ));
        assert!(matches!(
            ProductQuantizer::train(8, 2, &[0.0; 12], 5),
            Err(AnnError::BadShape { .. })
        ));
    }
}
