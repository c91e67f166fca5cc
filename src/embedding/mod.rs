// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Query embedding contract and HTTP client
//!
//! The engine treats embedding as an external collaborator behind the
//! `Embedder` trait: raw text in, unnormalized fixed-dimension vector out.
//! Normalization happens here at the boundary — every vector is forced to
//! unit L2 norm before it reaches the cache or the index, so inner product
//! stays equal to cosine similarity everywhere downstream.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors from the embedding step. Surfaced to the caller, never retried
/// by the retrieval core.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Transport-level failure talking to the embedding service
    #[error("Embedding request failed: {0}")]
    Request(String),

    /// Embedding service rejected the call
    #[error("Embedding API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Service returned a vector of the wrong dimension
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Service returned an all-zero vector, which cannot be normalized
    #[error("Embedding produced a zero-magnitude vector")]
    ZeroVector,
}

/// Collaborator that turns query text into an embedding vector
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `text` into a vector of `dimension()` components.
    /// The result is NOT assumed normalized; the caller normalizes.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Output dimension of this embedder's model
    fn dimension(&self) -> usize;
}

/// Scale `vector` to unit L2 norm in place
///
/// Returns the original norm. A zero norm leaves the vector untouched;
/// callers must treat that as unusable.
pub fn l2_normalize(vector: &mut [f32]) -> f32 {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
    norm
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    texts: Vec<&'a str>,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmbedResponse {
    embeddings: Vec<EmbeddingResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmbeddingResult {
    embedding: Vec<f32>,
}

/// HTTP embedding client for a `/v1/embed`-style endpoint
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    /// # Arguments
    /// * `endpoint` - Full URL of the embed endpoint
    /// * `model` - Model name sent with each request
    /// * `dimension` - Expected output dimension, validated on every call
    pub fn new(endpoint: String, model: String, dimension: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            endpoint,
            model,
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        debug!("Embedding query text ({} chars)", text.len());

        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                texts: vec![text],
                model: &self.model,
            })
            .send()
            .await
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let data: EmbedResponse = response.json().await.map_err(|e| EmbeddingError::Api {
            status: 0,
            message: format!("JSON parse error: {}", e),
        })?;

        let vector = data
            .embeddings
            .into_iter()
            .next()
            .map(|r| r.embedding)
            .ok_or(EmbeddingError::Api {
                status: 0,
                message: "Empty embeddings array".to_string(),
            })?;

        if vector.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
