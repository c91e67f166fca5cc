// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod cache;
pub mod config;
pub mod embedding;
pub mod generation;
pub mod limits;
pub mod rag;
pub mod retry;
pub mod utils;

// Re-export main types
pub use cache::{CacheStats, EmbeddingCache};
pub use config::Config;
pub use embedding::{l2_normalize, Embedder, EmbeddingError, HttpEmbedder};
pub use generation::{
    format_context, AnswerGenerator, GeneratedAnswer, GeneratorError, HttpAnswerGenerator,
    TokenUsage,
};
pub use limits::{
    LimiterStatus, PerUserRateLimiter, RateDenial, RateGuard, RateLimiter, RateScope,
};
pub use rag::{
    Chunk, Confidence, Corpus, CorpusError, QueryEngine, QueryError, QueryResponse, Source,
    VectorIndex, GENERAL_SECTION, NO_ANSWER_MESSAGE,
};
pub use retry::{RetryError, RetryPolicy};
pub use utils::clock::{Clock, ManualClock, SystemClock};
