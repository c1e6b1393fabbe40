//! Flat vector index with exact L2 nearest-neighbour search.
//!
//! Brute force is O(n) per query, which is fine for one user's knowledge base and
//! keeps results exact and deterministic.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable key of a stored chunk: its insertion position. Shared by the vector
/// index and the document store so a search hit always names the same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub u64);

impl ChunkId {
    pub fn position(self) -> usize {
        self.0 as usize
    }
}

/// One search result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub id: ChunkId,
    /// Euclidean distance to the query.
    pub distance: f32,
}

/// Append-only sequence of fixed-dimension vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Append vectors in order. Either all are added or, on a dimension mismatch, none.
    pub fn add(&mut self, vectors: Vec<Vec<f32>>) -> Result<(), IndexError> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        self.vectors.extend(vectors);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.vectors.iter().map(Vec::as_slice)
    }

    /// Drop everything from `len` on. Used to undo an append.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.vectors.truncate(len);
    }

    /// Up to `k` nearest vectors, ascending by distance; equal distances keep insertion order.
    /// An empty index returns no hits for any query.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if self.vectors.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, squared_l2(query, v)))
            .collect();
        scored.sort_by(|a, b| match a.1.total_cmp(&b.1) {
            Ordering::Equal => a.0.cmp(&b.0),
            other => other,
        });
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(i, d)| SearchHit {
                id: ChunkId(i as u64),
                distance: d.sqrt(),
            })
            .collect())
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("vector has dimension {actual}, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("{texts} texts were paired with {vectors} vectors")]
    LengthMismatch { texts: usize, vectors: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(vectors: &[[f32; 2]]) -> VectorIndex {
        let mut index = VectorIndex::new(2);
        index.add(vectors.iter().map(|v| v.to_vec()).collect()).unwrap();
        index
    }

    fn ids(hits: &[SearchHit]) -> Vec<u64> {
        hits.iter().map(|h| h.id.0).collect()
    }

    #[test]
    fn empty_index_returns_no_hits() {
        let index = VectorIndex::new(384);
        assert!(index.search(&[0.0; 3], 5).unwrap().is_empty());
    }

    #[test]
    fn hits_ascend_by_distance() {
        let index = index_with(&[[10.0, 0.0], [1.0, 0.0], [3.0, 4.0], [0.0, 0.5]]);
        let hits = index.search(&[0.0, 0.0], 3).unwrap();
        assert_eq!(ids(&hits), vec![3, 1, 2]);
        assert_eq!(hits[0].distance, 0.5);
        assert_eq!(hits[2].distance, 5.0);
    }

    #[test]
    fn fewer_hits_than_k_when_index_is_small() {
        let index = index_with(&[[1.0, 1.0], [2.0, 2.0]]);
        assert_eq!(index.search(&[0.0, 0.0], 10).unwrap().len(), 2);
        assert!(index.search(&[0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn ties_keep_insertion_order() {
        let index = index_with(&[[0.0, 1.0], [1.0, 0.0], [0.0, -1.0], [-1.0, 0.0]]);
        let hits = index.search(&[0.0, 0.0], 4).unwrap();
        assert_eq!(ids(&hits), vec![0, 1, 2, 3]);
    }

    #[test]
    fn repeated_searches_agree() {
        let index = index_with(&[[0.3, 0.1], [0.2, 0.2], [0.9, 0.4], [0.1, 0.3]]);
        let first = index.search(&[0.2, 0.2], 3).unwrap();
        assert_eq!(first, index.search(&[0.2, 0.2], 3).unwrap());
    }

    #[test]
    fn add_rejects_wrong_dimension_without_partial_append() {
        let mut index = index_with(&[[1.0, 1.0]]);
        let err = index
            .add(vec![vec![0.0, 0.0], vec![0.0, 0.0, 0.0]])
            .unwrap_err();
        assert_eq!(err, IndexError::DimensionMismatch { expected: 2, actual: 3 });
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn search_rejects_wrong_query_dimension() {
        let index = index_with(&[[1.0, 1.0]]);
        assert!(matches!(
            index.search(&[1.0], 1),
            Err(IndexError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }
}
