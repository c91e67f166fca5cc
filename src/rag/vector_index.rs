// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! In-memory nearest-neighbor search over normalized embeddings
//!
//! Exhaustive cosine-similarity scan: the corpus is small enough that a
//! linear O(n·d) pass beats maintaining an approximate index. Vectors are
//! forced to unit L2 norm at insertion, so scoring is a plain inner
//! product. The index is built once at load and read-only while serving.

use std::cmp::Ordering;

use crate::embedding::l2_normalize;
use crate::rag::errors::CorpusError;

/// Flat vector index; chunk id is the insertion ordinal
#[derive(Debug)]
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

    /// Insert a vector, normalizing it to unit L2 norm
    ///
    /// Returns the assigned id (the ordinal position). Rejects vectors of
    /// the wrong dimension, non-finite components, and zero magnitude.
    pub fn insert(&mut self, mut vector: Vec<f32>) -> Result<usize, CorpusError> {
        let id = self.vectors.len();

        if vector.len() != self.dimension {
            return Err(CorpusError::DimensionMismatch {
                chunk_id: id,
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        if vector.iter().any(|v| !v.is_finite()) {
            return Err(CorpusError::InvalidVector {
                chunk_id: id,
                reason: "contains NaN or Infinity".to_string(),
            });
        }

        if l2_normalize(&mut vector) == 0.0 {
            return Err(CorpusError::InvalidVector {
                chunk_id: id,
                reason: "zero magnitude".to_string(),
            });
        }

        self.vectors.push(vector);
        Ok(id)
    }

    /// Top-k most similar stored vectors to `query`
    ///
    /// `query` must already be unit-normalized (enforced where embeddings
    /// are produced) and of the index dimension; a mismatched dimension is
    /// a programming error and fails fast. Results are ordered by
    /// descending cosine score, ties broken by lower id, length ≤ k.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        assert_eq!(
            query.len(),
            self.dimension,
            "query dimension {} does not match index dimension {}",
            query.len(),
            self.dimension
        );

        if self.vectors.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(id, v)| {
                let score = v.iter().zip(query.iter()).map(|(a, b)| a * b).sum::<f32>();
                (id, score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
