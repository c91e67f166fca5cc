// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// End-to-end tests for the question path: cache, retrieval, threshold
// gate, admission control, and retry-wrapped generation

use async_trait::async_trait;
use docqa_node::{
    AnswerGenerator, Chunk, Config, Confidence, Corpus, EmbeddingCache, Embedder, EmbeddingError,
    GeneratedAnswer, GeneratorError, ManualClock, PerUserRateLimiter, QueryEngine, QueryError,
    RateGuard, RateLimiter, RetryPolicy, GENERAL_SECTION, NO_ANSWER_MESSAGE,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DIMENSION: usize = 16;

fn basis(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIMENSION];
    v[axis] = 1.0;
    v
}

/// Embedder that answers from a fixed table and counts invocations
struct StaticEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl StaticEmbedder {
    fn new(entries: &[(&str, Vec<f32>)]) -> Arc<Self> {
        Arc::new(Self {
            vectors: entries
                .iter()
                .map(|(q, v)| (q.to_string(), v.clone()))
                .collect(),
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.vectors
            .get(text)
            .cloned()
            .ok_or(EmbeddingError::Api {
                status: 404,
                message: format!("no embedding registered for '{text}'"),
            })
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

/// Generator that fails its first `fail_first` calls, then succeeds
struct StubGenerator {
    fail_first: usize,
    calls: AtomicUsize,
}

impl StubGenerator {
    fn new(fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_first,
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnswerGenerator for StubGenerator {
    async fn generate(
        &self,
        question: &str,
        _context: &str,
    ) -> Result<GeneratedAnswer, GeneratorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(GeneratorError::Api {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        Ok(GeneratedAnswer {
            text: format!("Answer to: {question} (p. 4)"),
            model: "stub-model".to_string(),
            usage: None,
            latency_ms: 1,
        })
    }
}

fn ten_chunk_corpus() -> Corpus {
    let chunks: Vec<Chunk> = (0..10)
        .map(|i| Chunk {
            id: i,
            page_number: (i + 1) as u32,
            text: format!("Text of chunk {i} describing topic {i}."),
            section_hint: GENERAL_SECTION.to_string(),
            word_count: 7,
        })
        .collect();
    let vectors: Vec<Vec<f32>> = (0..10).map(basis).collect();
    Corpus::from_parts(chunks, vectors, DIMENSION).unwrap()
}

struct EngineSetup {
    engine: QueryEngine,
    embedder: Arc<StaticEmbedder>,
    generator: Arc<StubGenerator>,
}

fn build_engine(
    embedder: Arc<StaticEmbedder>,
    generator: Arc<StubGenerator>,
    global_limit: usize,
    user_limit: usize,
    api_limit: usize,
) -> EngineSetup {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut config = Config::default();
    config.embedding_dimension = DIMENSION;
    config.top_k = 5;
    config.similarity_threshold = 0.25;

    let clock = Arc::new(ManualClock::fixed());
    let cache = EmbeddingCache::with_clock(3600, 100, clock.clone());
    let guard = RateGuard::new(
        RateLimiter::with_clock(
            "query_limiter",
            global_limit,
            Duration::from_secs(60),
            clock.clone(),
        ),
        PerUserRateLimiter::with_clock(
            "user_query_limiter",
            user_limit,
            Duration::from_secs(3600),
            clock.clone(),
        ),
    );
    let api_limiter = RateLimiter::with_clock(
        "api_limiter",
        api_limit,
        Duration::from_secs(60),
        clock.clone(),
    );
    let retry = RetryPolicy {
        max_retries: 3,
        initial_delay: Duration::ZERO,
        backoff_factor: 2.0,
        max_delay: Duration::ZERO,
        jitter: false,
    };

    let engine = QueryEngine::with_components(
        ten_chunk_corpus(),
        cache,
        guard,
        api_limiter,
        retry,
        embedder.clone(),
        generator.clone(),
        config,
    );

    EngineSetup {
        engine,
        embedder,
        generator,
    }
}

#[tokio::test]
async fn test_query_matching_chunk_three_returns_it_first() {
    let embedder = StaticEmbedder::new(&[("tell me about topic three", basis(3))]);
    let generator = StubGenerator::new(0);
    let setup = build_engine(embedder, generator, 100, 100, 100);

    let response = setup
        .engine
        .ask("tell me about topic three", "alice")
        .await
        .unwrap();

    assert!(response.answered);
    // Chunk 3 lives on page 4
    assert_eq!(response.sources[0].page, 4);
    assert!((response.scores[0] - 1.0).abs() < 1e-5);
    assert_eq!(response.confidence, Confidence::High);
    assert!(response.answer.contains("topic three"));
}

#[tokio::test]
async fn test_orthogonal_query_yields_no_answer_outcome() {
    // Axis 12 is orthogonal to every stored chunk vector
    let embedder = StaticEmbedder::new(&[("completely unrelated question", basis(12))]);
    let generator = StubGenerator::new(0);
    let setup = build_engine(embedder, generator, 100, 100, 100);

    let response = setup
        .engine
        .ask("completely unrelated question", "alice")
        .await
        .unwrap();

    assert!(!response.answered);
    assert_eq!(response.answer, NO_ANSWER_MESSAGE);
    assert!(response.sources.is_empty());
    assert_eq!(response.confidence, Confidence::Low);
    // The generator is never consulted for a below-threshold query
    assert_eq!(setup.generator.call_count(), 0);
}

#[tokio::test]
async fn test_repeat_question_hits_embedding_cache() {
    let embedder = StaticEmbedder::new(&[("tell me about topic five", basis(5))]);
    let generator = StubGenerator::new(0);
    let setup = build_engine(embedder, generator, 100, 100, 100);

    setup
        .engine
        .ask("tell me about topic five", "alice")
        .await
        .unwrap();
    setup
        .engine
        .ask("tell me about topic five", "alice")
        .await
        .unwrap();

    assert_eq!(setup.embedder.call_count(), 1);
    assert_eq!(setup.engine.cache_stats().total_entries, 1);
}

#[tokio::test]
async fn test_global_rate_limit_denies_with_specific_message() {
    let embedder = StaticEmbedder::new(&[("tell me about topic one", basis(1))]);
    let generator = StubGenerator::new(0);
    let setup = build_engine(embedder, generator, 1, 100, 100);

    setup
        .engine
        .ask("tell me about topic one", "alice")
        .await
        .unwrap();

    let err = setup
        .engine
        .ask("tell me about topic one", "alice")
        .await
        .unwrap_err();

    match &err {
        QueryError::RateLimited(denial) => {
            assert!(denial.retry_after > Duration::ZERO);
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
    assert!(err.user_message().contains("Rate limit exceeded"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_downstream_api_limit_blocks_generation() {
    let embedder = StaticEmbedder::new(&[("tell me about topic two", basis(2))]);
    let generator = StubGenerator::new(0);
    let setup = build_engine(embedder, generator, 100, 100, 1);

    setup
        .engine
        .ask("tell me about topic two", "alice")
        .await
        .unwrap();

    let err = setup
        .engine
        .ask("tell me about topic two", "alice")
        .await
        .unwrap_err();

    assert!(err.user_message().contains("answer service is busy"));
    // Generation ran once; the second call was stopped at admission
    assert_eq!(setup.generator.call_count(), 1);
}

#[tokio::test]
async fn test_transient_generator_failures_are_retried_to_success() {
    let embedder = StaticEmbedder::new(&[("tell me about topic six", basis(6))]);
    let generator = StubGenerator::new(2);
    let setup = build_engine(embedder, generator, 100, 100, 100);

    let response = setup
        .engine
        .ask("tell me about topic six", "alice")
        .await
        .unwrap();

    assert!(response.answered);
    // 1 failure-free call after 2 failed attempts
    assert_eq!(setup.generator.call_count(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_surface_single_downstream_error() {
    let embedder = StaticEmbedder::new(&[("tell me about topic seven", basis(7))]);
    let generator = StubGenerator::new(usize::MAX);
    let setup = build_engine(embedder, generator, 100, 100, 100);

    let err = setup
        .engine
        .ask("tell me about topic seven", "alice")
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::Downstream(_)));
    assert_eq!(err.error_code(), "DOWNSTREAM_FAILED");
    // Initial attempt + max_retries retries, nothing more
    assert_eq!(setup.generator.call_count(), 4);
}

#[tokio::test]
async fn test_embedding_failure_is_surfaced_not_retried() {
    // No embedding registered for the question
    let embedder = StaticEmbedder::new(&[]);
    let generator = StubGenerator::new(0);
    let setup = build_engine(embedder, generator, 100, 100, 100);

    let err = setup
        .engine
        .ask("a question with no embedding", "alice")
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::Embedding(_)));
    assert_eq!(setup.embedder.call_count(), 1);
    assert_eq!(setup.generator.call_count(), 0);
}

#[tokio::test]
async fn test_invalid_queries_rejected_before_any_work() {
    let embedder = StaticEmbedder::new(&[]);
    let generator = StubGenerator::new(0);
    let setup = build_engine(embedder, generator, 100, 100, 100);

    let empty = setup.engine.ask("   ", "alice").await.unwrap_err();
    assert!(matches!(empty, QueryError::InvalidQuery { .. }));

    let too_short = setup.engine.ask("ab", "alice").await.unwrap_err();
    assert!(matches!(too_short, QueryError::InvalidQuery { .. }));

    let long = "x".repeat(600);
    let too_long = setup.engine.ask(&long, "alice").await.unwrap_err();
    assert!(matches!(too_long, QueryError::InvalidQuery { .. }));

    assert_eq!(setup.embedder.call_count(), 0);
}

#[tokio::test]
async fn test_ask_many_answers_each_question() {
    let embedder = StaticEmbedder::new(&[
        ("tell me about topic one", basis(1)),
        ("tell me about topic eight", basis(8)),
    ]);
    let generator = StubGenerator::new(0);
    let setup = build_engine(embedder, generator, 100, 100, 100);

    let questions = vec![
        "tell me about topic one".to_string(),
        "tell me about topic eight".to_string(),
    ];
    let results = setup.engine.ask_many(&questions, "alice").await;

    assert_eq!(results.len(), 2);
    let first = results[0].as_ref().unwrap();
    let second = results[1].as_ref().unwrap();
    assert_eq!(first.sources[0].page, 2);
    assert_eq!(second.sources[0].page, 9);
}
