// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Chunk metadata and the loaded corpus
//!
//! A `Chunk` is the immutable unit of retrievable text produced by the
//! ingestion pipeline. The serving process loads the whole collection at
//! once, paired position-for-position with its embedding vectors; the
//! collection is replaced wholesale when the index is rebuilt, never
//! patched.

use serde::{Deserialize, Serialize};

use crate::rag::errors::CorpusError;
use crate::rag::vector_index::VectorIndex;

/// Sentinel section label for chunks without a detected heading
pub const GENERAL_SECTION: &str = "General Section";

fn default_section_hint() -> String {
    GENERAL_SECTION.to_string()
}

/// Immutable unit of retrievable text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Dense id assigned at ingestion, stable for the lifetime of the index
    pub id: usize,
    /// Source page, 1-indexed
    pub page_number: u32,
    pub text: String,
    /// Best-effort heading extracted at ingestion
    #[serde(default = "default_section_hint")]
    pub section_hint: String,
    pub word_count: usize,
}

/// The loaded corpus: chunks plus their vector index
///
/// Invariants enforced at construction: one vector per chunk, chunk ids
/// dense and matching their ordinal position, every vector of the
/// configured dimension and unit-normalized (the index normalizes on
/// insert). Immutable for the process lifetime once built.
#[derive(Debug)]
pub struct Corpus {
    chunks: Vec<Chunk>,
    index: VectorIndex,
}

impl Corpus {
    /// Build a corpus from ingestion output
    ///
    /// `vectors[i]` must be the embedding of `chunks[i]`.
    pub fn from_parts(
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
        dimension: usize,
    ) -> Result<Self, CorpusError> {
        if chunks.len() != vectors.len() {
            return Err(CorpusError::CountMismatch {
                chunks: chunks.len(),
                vectors: vectors.len(),
            });
        }

        for (position, chunk) in chunks.iter().enumerate() {
            if chunk.id != position {
                return Err(CorpusError::ChunkIdMismatch {
                    position,
                    id: chunk.id,
                });
            }
        }

        let mut index = VectorIndex::new(dimension);
        for vector in vectors {
            index.insert(vector)?;
        }

        Ok(Self { chunks, index })
    }

    /// Top-k chunks most similar to a unit-normalized query vector
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(&Chunk, f32)> {
        self.index
            .search(query, k)
            .into_iter()
            .map(|(id, score)| (&self.chunks[id], score))
            .collect()
    }

    pub fn chunk(&self, id: usize) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }
}
