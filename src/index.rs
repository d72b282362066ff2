//! In-memory inner-product similarity index.

use std::cmp::Ordering;
use std::fmt;

/// Errors surfaced while building or querying the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// Ids and vectors differ in length or rows differ in dimension.
    Shape(String),
    /// The query vector does not match the index dimension.
    DimensionMismatch {
        /// Dimension shared by the indexed vectors.
        expected: usize,
        /// Dimension of the offending query.
        actual: usize,
    },
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shape(message) => write!(f, "malformed index input: {message}"),
            Self::DimensionMismatch { expected, actual } => write!(
                f,
                "query dimension {actual} does not match index dimension {expected}"
            ),
        }
    }
}

impl std::error::Error for IndexError {}

/// Flat index scoring queries by raw inner product against every stored row.
///
/// Scores are unnormalized: models that do not emit unit-norm vectors bias
/// results toward higher-magnitude rows. That matches the behavior the rest
/// of the pipeline was tuned against and is intentional.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    dimension: usize,
}

impl SimilarityIndex {
    /// Builds an index from a loaded snapshot.
    pub fn from_snapshot(ids: Vec<String>, vectors: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        if ids.len() != vectors.len() {
            return Err(IndexError::Shape(format!(
                "{} ids paired with {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        let dimension = vectors.first().map(Vec::len).unwrap_or(0);
        for (row, vector) in vectors.iter().enumerate() {
            if vector.len() != dimension {
                return Err(IndexError::Shape(format!(
                    "row {row} has dimension {} but row 0 has {dimension}",
                    vector.len()
                )));
            }
        }
        Ok(Self {
            ids,
            vectors,
            dimension,
        })
    }

    /// Number of indexed records.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when no records are indexed.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Vector dimension shared by every indexed row.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns the `k` highest-scoring ids with their inner-product scores,
    /// sorted descending. `k` is clamped to the record count; ties keep
    /// insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>, IndexError> {
        if !self.is_empty() && query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .map(|row| dot(query, row))
            .enumerate()
            .collect();
        // stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(k.min(self.ids.len()));

        Ok(scored
            .into_iter()
            .map(|(row, score)| (self.ids[row].clone(), score))
            .collect())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
