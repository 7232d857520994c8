//! Similarity metrics.

use std::fmt;
use std::str::FromStr;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Scoring function for vector similarity.
///
/// Inner product is a similarity (higher is better); L2 is a distance
/// (lower is better). Every ranking and threshold decision in the engine
/// branches on this orientation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Dot product; maximize.
    InnerProduct,
    /// Euclidean distance; minimize.
    L2,
}

impl Metric {
    /// Whether `a` scores strictly better than `b` under this metric.
    #[inline]
    pub fn better(&self, a: f32, b: f32) -> bool {
        match self {
            Self::InnerProduct => a > b,
            Self::L2 => a < b,
        }
    }

    /// The worst possible score under this metric, used for padding.
    #[inline]
    pub fn worst(&self) -> f32 {
        match self {
            Self::InnerProduct => f32::NEG_INFINITY,
            Self::L2 => f32::INFINITY,
        }
    }

    /// Exact similarity between two vectors of equal length.
    #[inline]
    pub fn exact(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::InnerProduct => dot(a, b),
            Self::L2 => euclidean(a, b),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InnerProduct => write!(f, "inner_product"),
            Self::L2 => write!(f, "l2"),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inner_product" | "ip" | "dot" => Ok(Self::InnerProduct),
            "l2" | "euclidean" => Ok(Self::L2),
            other => Err(format!("unknown metric '{}'", other)),
        }
    }
}

/// Dot product of two equal-length vectors.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Euclidean (L2) distance between two equal-length vectors.
#[inline]
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    squared_euclidean(a, b).sqrt()
}

/// Squared L2 distance; cheaper when only ordering matters.
#[inline]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}
