//! Lloyd's k-means over row-major f32 matrices.
//!
//! Used to learn the IVF coarse centroids and the per-subspace PQ codebooks.
//! Initialization samples distinct training rows; empty clusters keep their
//! previous centroid.

use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::metric::squared_euclidean;

/// Default iteration count; matches the usual quick-convergence regime for
/// coarse quantizers.
pub const DEFAULT_ITERATIONS: usize = 20;

/// Cluster `n` rows of dimension `dim` into `k` centroids.
///
/// Returns the centroids as a row-major `k * dim` matrix. When `n < k` the
/// surplus centroids repeat training rows; callers are expected to hand in
/// samples comfortably larger than `k`.
pub fn run(data: &[f32], dim: usize, k: usize, iterations: usize) -> Vec<f32> {
    let n = data.len() / dim;
    debug_assert_eq!(data.len(), n * dim);
    debug_assert!(k > 0);

    let mut rng = thread_rng();
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut rng);

    let mut centroids = Vec::with_capacity(k * dim);
    for i in 0..k {
        let row = order[i % n];
        centroids.extend_from_slice(&data[row * dim..(row + 1) * dim]);
    }

    let mut assignments = vec![0usize; n];
    for _ in 0..iterations {
        // Assignment step
        for (row, assignment) in assignments.iter_mut().enumerate() {
            let vector = &data[row * dim..(row + 1) * dim];
            let mut best = 0usize;
            let mut best_dist = f32::MAX;
            for c in 0..k {
                let centroid = &centroids[c * dim..(c + 1) * dim];
                let dist = squared_euclidean(vector, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best = c;
                }
            }
            *assignment = best;
        }

        // Update step
        let mut sums = vec![0.0f32; k * dim];
        let mut counts = vec![0usize; k];
        for (row, &assignment) in assignments.iter().enumerate() {
            counts[assignment] += 1;
            let vector = &data[row * dim..(row + 1) * dim];
            let sum = &mut sums[assignment * dim..(assignment + 1) * dim];
            for (s, v) in sum.iter_mut().zip(vector.iter()) {
                *s += v;
            }
        }
        for c in 0..k {
            if counts[c] == 0 {
                // Keep the previous centroid
                continue;
            }
            let inv = 1.0 / counts[c] as f32;
            for j in 0..dim {
                centroids[c * dim + j] = sums[c * dim + j] * inv;
            }
        }
    }

    centroids
}

/// Index of the centroid nearest to `vector` (squared L2).
pub fn nearest(centroids: &[f32], dim: usize, vector: &[f32]) -> usize {
    let k = centroids.len() / dim;
    let mut best = 0usize;
    let mut best_dist = f32::MAX;
    for c in 0..k {
        let centroid = &centroids[c * dim..(c + 1) * dim];
        let dist = squared_euclidean(vector, centroid);
        if dist < best_dist {
            best_dist = dist;
            best = c;
        }
    }
    best
}

/// Indices of the `nprobe` centroids nearest to `vector`, best first.
pub fn nearest_n(centroids: &[f32], dim: usize, vector: &[f32], nprobe: usize) -> Vec<usize> {
    let k = centroids.len() / dim;
    let mut scored: Vec<(f32, usize)> = (0..k)
        .map(|c| {
            let centroid = &centroids[c * dim..(c + 1) * dim];
            (squared_euclidean(vector, centroid), c)
        })
        .collect();
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(nprobe).map(|(_, c)| c).collect()
}
