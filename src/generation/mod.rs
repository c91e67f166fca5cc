// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Answer generation contract, context formatting, and HTTP client
//!
//! The generator is an opaque downstream collaborator: it receives the
//! question plus formatted excerpts with page citations and returns answer
//! text or fails. The retrieval core only assumes the call is safely
//! retriable; retry and admission control live in the query engine.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use crate::rag::chunk::Chunk;

/// Instructions sent with every generation request. The contract with the
/// model: answer only from the provided context and cite page numbers.
pub const SYSTEM_PROMPT: &str = "You are an assistant answering questions about a document \
collection. Answer ONLY from the provided context. Cite page numbers like \"(p. X)\" after \
each key point, and cite every factual claim. If the answer is not in the context, say you \
don't have that information. Be concise but complete, and use bullet points where they help.";

const USER_PROMPT_TEMPLATE: &str = "Based on the document excerpts below, answer this question:

**Question:** {question}

**Context:**
{context}

**Your Answer (with page citations):**";

/// Errors from the downstream generation service
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Transport-level failure
    #[error("Generation request failed: {0}")]
    Request(String),

    /// Service rejected the call
    #[error("Generation API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Request timed out
    #[error("Generation timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Response parsed but carried no answer text
    #[error("Generation response contained no answer")]
    EmptyResponse,
}

/// Token accounting reported by the generation service
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A successful generation result
#[derive(Debug, Clone)]
pub struct GeneratedAnswer {
    pub text: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub latency_ms: u64,
}

/// Downstream answer generator. Implementations must be safe to retry;
/// the engine may invoke `generate` multiple times for one question.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        question: &str,
        context: &str,
    ) -> Result<GeneratedAnswer, GeneratorError>;
}

/// Format ranked chunks into the context block fed to the generator:
/// numbered excerpts, each headed by its page and section.
pub fn format_context(ranked: &[(&Chunk, f32)]) -> String {
    let mut parts = Vec::with_capacity(ranked.len());
    for (i, (chunk, _score)) in ranked.iter().enumerate() {
        parts.push(format!(
            "--- Excerpt {} (Page {} - {}) ---\n{}\n",
            i + 1,
            chunk.page_number,
            chunk.section_hint,
            chunk.text.trim()
        ));
    }
    parts.join("\n")
}

/// Fill the user prompt template with question and context
pub fn build_user_prompt(question: &str, context: &str) -> String {
    USER_PROMPT_TEMPLATE
        .replace("{question}", question)
        .replace("{context}", context)
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<TokenUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Chat-completions client for an OpenAI-compatible generation endpoint
pub struct HttpAnswerGenerator {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl HttpAnswerGenerator {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        model: String,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        let timeout = Duration::from_secs(30);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            endpoint,
            api_key,
            model,
            max_tokens,
            temperature,
            timeout,
        }
    }
}

#[async_trait]
impl AnswerGenerator for HttpAnswerGenerator {
    async fn generate(
        &self,
        question: &str,
        context: &str,
    ) -> Result<GeneratedAnswer, GeneratorError> {
        let user_prompt = build_user_prompt(question, context);
        debug!("Calling generation API with model: {}", self.model);

        let start = Instant::now();
        let mut request = self.client.post(&self.endpoint).json(&ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GeneratorError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            } else {
                GeneratorError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let data: ChatResponse = response.json().await.map_err(|e| GeneratorError::Api {
            status: 0,
            message: format!("JSON parse error: {}", e),
        })?;

        let text = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(GeneratorError::EmptyResponse)?;

        Ok(GeneratedAnswer {
            text,
            model: data.model.unwrap_or_else(|| self.model.clone()),
            usage: data.usage,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}
