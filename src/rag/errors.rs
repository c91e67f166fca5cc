// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Error types for corpus loading and the query path
//!
//! Two families: `CorpusError` covers construction-time invariant
//! violations (count/dimension mismatches — fail fast, never retried), and
//! `QueryError` covers the per-request path. Every `QueryError` variant
//! maps to a specific user-facing message so callers can tell a user to
//! wait, rephrase, or report, instead of a generic failure.

use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::generation::GeneratorError;
use crate::limits::{RateDenial, RateScope};
use crate::retry::RetryError;

/// Invariant violations while building a `Corpus`
#[derive(Debug, Error)]
pub enum CorpusError {
    /// Chunk and vector collections are not index-aligned
    #[error("Chunk/vector count mismatch: {chunks} chunks, {vectors} vectors")]
    CountMismatch { chunks: usize, vectors: usize },

    /// Chunk ids must be dense and equal to their ordinal position
    #[error("Chunk at position {position} has id {id}; ids must be dense")]
    ChunkIdMismatch { position: usize, id: usize },

    /// A vector does not match the configured embedding dimension
    #[error("Dimension mismatch for chunk {chunk_id}: expected {expected}D, got {actual}D")]
    DimensionMismatch {
        chunk_id: usize,
        expected: usize,
        actual: usize,
    },

    /// A vector cannot be normalized (NaN, Infinity, or zero magnitude)
    #[error("Invalid vector for chunk {chunk_id}: {reason}")]
    InvalidVector { chunk_id: usize, reason: String },
}

/// Failures on the question-answering path
#[derive(Debug, Error)]
pub enum QueryError {
    /// Input validation rejected the question
    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// An admission check denied the request; carries the exact wait
    #[error(transparent)]
    RateLimited(#[from] RateDenial),

    /// The embedding step failed; surfaced to the caller, not retried here
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// The generation call failed after all retries were spent
    #[error("Answer generation failed: {0}")]
    Downstream(#[from] RetryError<GeneratorError>),
}

impl QueryError {
    /// Specific, user-facing message for each failure. Rate-limit messages
    /// carry the exact wait so callers can say more than "try again".
    pub fn user_message(&self) -> String {
        match self {
            QueryError::InvalidQuery { reason } => reason.clone(),
            QueryError::RateLimited(denial) => match denial.scope {
                RateScope::GlobalQuery => format!(
                    "Rate limit exceeded. Please try again in {} seconds.",
                    denial.retry_after.as_secs() + 1
                ),
                RateScope::PerUser => format!(
                    "You've exceeded your hourly query limit. Please try again in {} minutes.",
                    denial.retry_after.as_secs() / 60 + 1
                ),
                RateScope::DownstreamApi => format!(
                    "The answer service is busy. Please wait {} seconds and try again.",
                    denial.retry_after.as_secs() + 1
                ),
            },
            QueryError::Embedding(_) => {
                "Could not process your question right now. Please try again shortly.".to_string()
            }
            QueryError::Downstream(_) => {
                "The answer service is temporarily unavailable. Please try again later."
                    .to_string()
            }
        }
    }

    /// Stable code for logging and metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            QueryError::InvalidQuery { .. } => "INVALID_QUERY",
            QueryError::RateLimited(_) => "RATE_LIMIT_EXCEEDED",
            QueryError::Embedding(_) => "EMBEDDING_FAILED",
            QueryError::Downstream(_) => "DOWNSTREAM_FAILED",
        }
    }

    /// Whether waiting and re-issuing the request can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueryError::RateLimited(_) | QueryError::Downstream(_)
        )
    }
}
