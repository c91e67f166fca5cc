// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Query engine orchestration
//!
//! Coordinates the full question path: validation, admission control,
//! embedding (cache-fronted), vector retrieval, the similarity-threshold
//! gate, and the retry-wrapped downstream generation call. The engine and
//! every component it owns are explicitly constructed and injectable; there
//! are no process-wide singletons.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{CacheStats, EmbeddingCache};
use crate::config::Config;
use crate::embedding::{l2_normalize, Embedder, EmbeddingError};
use crate::generation::{format_context, AnswerGenerator, TokenUsage};
use crate::limits::{
    LimiterStatus, PerUserRateLimiter, RateDenial, RateGuard, RateLimiter, RateScope,
};
use crate::rag::chunk::{Chunk, Corpus};
use crate::rag::errors::QueryError;
use crate::retry::RetryPolicy;

/// Answer text returned when no chunk clears the similarity threshold
pub const NO_ANSWER_MESSAGE: &str = "I don't have that information in the indexed documents. \
Please make sure your question is about content covered by the collection.";

/// How confident the engine is in an answer, derived from the top
/// similarity score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    fn from_top_score(score: f32) -> Self {
        if score > 0.5 {
            Confidence::High
        } else {
            Confidence::Medium
        }
    }
}

/// Provenance for one cited page
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub page: u32,
    pub section: String,
    pub score: f32,
    pub snippet: String,
}

/// Result of one question
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub request_id: Uuid,
    pub question: String,
    pub answer: String,
    /// Cited pages, deduplicated, best match first
    pub sources: Vec<Source>,
    /// Raw similarity scores of the retrieved chunks, best first
    pub scores: Vec<f32>,
    pub confidence: Confidence,
    /// False when the similarity gate produced the no-answer outcome
    pub answered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl QueryResponse {
    fn no_answer(question: &str, scores: Vec<f32>, elapsed: Duration) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            question: question.to_string(),
            answer: NO_ANSWER_MESSAGE.to_string(),
            sources: Vec::new(),
            scores,
            confidence: Confidence::Low,
            answered: false,
            model: None,
            usage: None,
            elapsed_ms: elapsed.as_millis() as u64,
            created_at: Utc::now(),
        }
    }
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= 200 {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(200).collect();
        format!("{head}...")
    }
}

fn build_sources(ranked: &[(&Chunk, f32)]) -> Vec<Source> {
    let mut seen_pages = HashSet::new();
    let mut sources = Vec::new();
    for (chunk, score) in ranked {
        if seen_pages.insert(chunk.page_number) {
            sources.push(Source {
                page: chunk.page_number,
                section: chunk.section_hint.clone(),
                score: *score,
                snippet: snippet(&chunk.text),
            });
        }
    }
    sources
}

/// The retrieval-and-protection core
pub struct QueryEngine {
    corpus: Corpus,
    cache: EmbeddingCache,
    guard: RateGuard,
    api_limiter: RateLimiter,
    retry: RetryPolicy,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn AnswerGenerator>,
    config: Config,
}

impl QueryEngine {
    /// Create an engine with components built from configuration
    pub fn new(
        corpus: Corpus,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn AnswerGenerator>,
        config: Config,
    ) -> Self {
        let mut cache = EmbeddingCache::new(config.cache.ttl_secs, config.cache.max_size);
        if let Some(dir) = &config.cache.cache_dir {
            cache = cache.with_persistence(dir);
        }

        let guard = RateGuard::new(
            RateLimiter::new(
                "query_limiter",
                config.limits.query_max_requests,
                Duration::from_secs(config.limits.query_window_secs),
            ),
            PerUserRateLimiter::new(
                "user_query_limiter",
                config.limits.user_max_requests,
                Duration::from_secs(config.limits.user_window_secs),
            ),
        );
        let api_limiter = RateLimiter::new(
            "api_limiter",
            config.limits.api_max_requests,
            Duration::from_secs(config.limits.api_window_secs),
        );

        let retry = RetryPolicy {
            max_retries: config.retry.max_retries,
            initial_delay: Duration::from_millis(config.retry.initial_delay_ms),
            backoff_factor: config.retry.backoff_factor,
            max_delay: Duration::from_millis(config.retry.max_delay_ms),
            jitter: false,
        };

        Self::with_components(corpus, cache, guard, api_limiter, retry, embedder, generator, config)
    }

    /// Create an engine from fully constructed parts. Tests use this to
    /// inject manual clocks and tight limits.
    #[allow(clippy::too_many_arguments)]
    pub fn with_components(
        corpus: Corpus,
        cache: EmbeddingCache,
        guard: RateGuard,
        api_limiter: RateLimiter,
        retry: RetryPolicy,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn AnswerGenerator>,
        config: Config,
    ) -> Self {
        info!(
            "Query engine ready: {} chunks, dimension {}, top_k {}",
            corpus.len(),
            corpus.dimension(),
            config.top_k
        );
        Self {
            corpus,
            cache,
            guard,
            api_limiter,
            retry,
            embedder,
            generator,
            config,
        }
    }

    /// Answer one question for one user
    pub async fn ask(&self, question: &str, user_id: &str) -> Result<QueryResponse, QueryError> {
        let started = Instant::now();
        let question = self.validate(question)?;

        self.guard.check(user_id)?;

        let embedding = self.query_embedding(question).await?;
        let ranked = self.corpus.search(&embedding, self.config.top_k);
        let scores: Vec<f32> = ranked.iter().map(|(_, s)| *s).collect();
        let top_score = scores.first().copied();

        debug!(
            "Retrieved {} chunks for '{:.50}', top score {:?}",
            ranked.len(),
            question,
            top_score
        );

        if top_score.map_or(true, |s| s < self.config.similarity_threshold) {
            info!(
                "Top score {:?} below threshold {}; returning no-answer outcome",
                top_score, self.config.similarity_threshold
            );
            return Ok(QueryResponse::no_answer(question, scores, started.elapsed()));
        }

        let (allowed, retry_after) = self.api_limiter.is_allowed(user_id);
        if !allowed {
            return Err(RateDenial {
                scope: RateScope::DownstreamApi,
                retry_after: retry_after.unwrap_or_default(),
            }
            .into());
        }

        let context = format_context(&ranked);
        let generated = self
            .retry
            .run(|| {
                let generator = Arc::clone(&self.generator);
                let question = question.to_string();
                let context = context.clone();
                async move { generator.generate(&question, &context).await }
            })
            .await?;

        let sources = build_sources(&ranked);
        let confidence = Confidence::from_top_score(top_score.unwrap_or_default());

        info!(
            "Answered '{:.50}' with {} sources in {}ms",
            question,
            sources.len(),
            started.elapsed().as_millis()
        );

        Ok(QueryResponse {
            request_id: Uuid::new_v4(),
            question: question.to_string(),
            answer: generated.text,
            sources,
            scores,
            confidence,
            answered: true,
            model: Some(generated.model),
            usage: generated.usage,
            elapsed_ms: started.elapsed().as_millis() as u64,
            created_at: Utc::now(),
        })
    }

    /// Answer several questions concurrently for the same user
    pub async fn ask_many(
        &self,
        questions: &[String],
        user_id: &str,
    ) -> Vec<Result<QueryResponse, QueryError>> {
        let futures: Vec<_> = questions.iter().map(|q| self.ask(q, user_id)).collect();
        futures::future::join_all(futures).await
    }

    fn validate<'a>(&self, question: &'a str) -> Result<&'a str, QueryError> {
        let trimmed = question.trim();
        if trimmed.is_empty() {
            return Err(QueryError::InvalidQuery {
                reason: "Query cannot be empty".to_string(),
            });
        }
        if trimmed.chars().count() < self.config.min_query_len {
            return Err(QueryError::InvalidQuery {
                reason: format!(
                    "Query too short (minimum {} characters)",
                    self.config.min_query_len
                ),
            });
        }
        if trimmed.chars().count() > self.config.max_query_len {
            return Err(QueryError::InvalidQuery {
                reason: format!(
                    "Query too long (maximum {} characters)",
                    self.config.max_query_len
                ),
            });
        }
        Ok(trimmed)
    }

    /// Cache-fronted query embedding, normalized to unit L2 norm
    async fn query_embedding(&self, question: &str) -> Result<Vec<f32>, QueryError> {
        if let Some(cached) = self.cache.get(question) {
            return Ok(cached);
        }

        let mut vector = self.embedder.embed(question).await?;
        if l2_normalize(&mut vector) == 0.0 {
            return Err(EmbeddingError::ZeroVector.into());
        }

        // Cached vectors are stored already normalized
        self.cache.set(question, vector.clone());
        Ok(vector)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Idle-schedule housekeeping: sweep expired cache entries and drop
    /// rate-limiter state for long-inactive users
    pub fn run_housekeeping(&self, inactive_threshold: Duration) {
        self.cache.cleanup_expired();
        self.guard.cleanup_inactive_users(inactive_threshold);
    }

    pub fn global_limiter_status(&self) -> LimiterStatus {
        self.guard.global_status()
    }

    pub fn user_limiter_status(&self, user_id: &str) -> LimiterStatus {
        self.guard.user_status(user_id)
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }
}
