// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Configuration for the retrieval-and-protection core
//!
//! All knobs are plain values loaded from the environment with defaults
//! matching production. Components receive their slice of this struct at
//! construction; nothing reads the environment after startup.

use std::env;
use std::path::PathBuf;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Embedding-cache settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry lifetime in seconds
    pub ttl_secs: u64,
    /// Entry-count cap
    pub max_size: usize,
    /// Optional directory for best-effort persistence
    pub cache_dir: Option<PathBuf>,
}

/// Rate-limit settings for the three limiter instances
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Process-wide query volume
    pub query_max_requests: usize,
    pub query_window_secs: u64,
    /// Per-user query volume
    pub user_max_requests: usize,
    pub user_window_secs: u64,
    /// Downstream generation API volume
    pub api_max_requests: usize,
    pub api_window_secs: u64,
}

/// Backoff settings for the downstream generation call
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

/// Downstream generation service settings
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Embedding service settings
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub endpoint: String,
    pub model: String,
}

/// Top-level configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Chunks returned per query
    pub top_k: usize,
    /// Minimum top score below which a query is unanswerable
    pub similarity_threshold: f32,
    /// Embedding model output dimension
    pub embedding_dimension: usize,
    /// Query length bounds in characters
    pub min_query_len: usize,
    pub max_query_len: usize,
    pub cache: CacheConfig,
    pub limits: LimitsConfig,
    pub retry: RetryConfig,
    pub generator: GeneratorConfig,
    pub embedder: EmbedderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.25,
            embedding_dimension: 384,
            min_query_len: 3,
            max_query_len: 500,
            cache: CacheConfig {
                ttl_secs: 86_400,
                max_size: 1000,
                cache_dir: None,
            },
            limits: LimitsConfig {
                query_max_requests: 10,
                query_window_secs: 60,
                user_max_requests: 20,
                user_window_secs: 3600,
                api_max_requests: 30,
                api_window_secs: 60,
            },
            retry: RetryConfig {
                max_retries: 3,
                initial_delay_ms: 1000,
                backoff_factor: 2.0,
                max_delay_ms: 30_000,
            },
            generator: GeneratorConfig {
                endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
                api_key: None,
                model: "llama-3.1-8b-instant".to_string(),
                max_tokens: 1024,
                temperature: 0.3,
            },
            embedder: EmbedderConfig {
                endpoint: "http://localhost:8080/v1/embed".to_string(),
                model: "all-MiniLM-L6-v2".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults. A `.env` file is loaded opportunistically if present.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        Self {
            top_k: env_parse("RAG_TOP_K", defaults.top_k),
            similarity_threshold: env_parse(
                "RAG_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            ),
            embedding_dimension: env_parse("EMBEDDING_DIMENSION", defaults.embedding_dimension),
            min_query_len: env_parse("QUERY_MIN_LEN", defaults.min_query_len),
            max_query_len: env_parse("QUERY_MAX_LEN", defaults.max_query_len),
            cache: CacheConfig {
                ttl_secs: env_parse("CACHE_TTL_SECS", defaults.cache.ttl_secs),
                max_size: env_parse("CACHE_MAX_SIZE", defaults.cache.max_size),
                cache_dir: env::var("CACHE_DIR").ok().map(PathBuf::from),
            },
            limits: LimitsConfig {
                query_max_requests: env_parse(
                    "QUERY_RATE_LIMIT",
                    defaults.limits.query_max_requests,
                ),
                query_window_secs: env_parse(
                    "QUERY_RATE_WINDOW_SECS",
                    defaults.limits.query_window_secs,
                ),
                user_max_requests: env_parse("USER_RATE_LIMIT", defaults.limits.user_max_requests),
                user_window_secs: env_parse(
                    "USER_RATE_WINDOW_SECS",
                    defaults.limits.user_window_secs,
                ),
                api_max_requests: env_parse("API_RATE_LIMIT", defaults.limits.api_max_requests),
                api_window_secs: env_parse(
                    "API_RATE_WINDOW_SECS",
                    defaults.limits.api_window_secs,
                ),
            },
            retry: RetryConfig {
                max_retries: env_parse("RETRY_MAX_RETRIES", defaults.retry.max_retries),
                initial_delay_ms: env_parse(
                    "RETRY_INITIAL_DELAY_MS",
                    defaults.retry.initial_delay_ms,
                ),
                backoff_factor: env_parse("RETRY_BACKOFF_FACTOR", defaults.retry.backoff_factor),
                max_delay_ms: env_parse("RETRY_MAX_DELAY_MS", defaults.retry.max_delay_ms),
            },
            generator: GeneratorConfig {
                endpoint: env::var("GENERATOR_ENDPOINT")
                    .unwrap_or(defaults.generator.endpoint),
                api_key: env::var("GENERATOR_API_KEY").ok().filter(|k| !k.is_empty()),
                model: env::var("GENERATOR_MODEL").unwrap_or(defaults.generator.model),
                max_tokens: env_parse("GENERATOR_MAX_TOKENS", defaults.generator.max_tokens),
                temperature: env_parse("GENERATOR_TEMPERATURE", defaults.generator.temperature),
            },
            embedder: EmbedderConfig {
                endpoint: env::var("EMBEDDER_ENDPOINT").unwrap_or(defaults.embedder.endpoint),
                model: env::var("EMBEDDER_MODEL").unwrap_or(defaults.embedder.model),
            },
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.top_k == 0 {
            return Err("top_k must be greater than 0".to_string());
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err("similarity_threshold must be within [-1, 1]".to_string());
        }
        if self.embedding_dimension == 0 {
            return Err("embedding_dimension must be greater than 0".to_string());
        }
        if self.cache.ttl_secs == 0 {
            return Err("Cache TTL must be greater than 0".to_string());
        }
        if self.cache.max_size == 0 {
            return Err("Cache max size must be greater than 0".to_string());
        }
        for (name, max, window) in [
            (
                "query",
                self.limits.query_max_requests,
                self.limits.query_window_secs,
            ),
            (
                "user",
                self.limits.user_max_requests,
                self.limits.user_window_secs,
            ),
            (
                "api",
                self.limits.api_max_requests,
                self.limits.api_window_secs,
            ),
        ] {
            if max == 0 {
                return Err(format!("{name} rate limit must be greater than 0"));
            }
            if window == 0 {
                return Err(format!("{name} rate window must be greater than 0"));
            }
        }
        if self.retry.backoff_factor < 1.0 {
            return Err("backoff_factor must be at least 1.0".to_string());
        }
        if self.min_query_len > self.max_query_len {
            return Err("min_query_len must not exceed max_query_len".to_string());
        }
        Ok(())
    }
}
