// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Llm
//!
//! Inference boundary of the assistant.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Abstract text-completion providers behind an anti-corruption layer

// LLM Provider Domain Interface (Anti-Corruption Layer)
//
// `LLMProvider` is implemented once per vendor API in infrastructure/llm/.
// `InferenceEngine` is what the application layer talks to: it resolves a
// model alias to a provider and exposes blocking and streaming generation.
// Timeouts, retries and cancellation are applied by the caller.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Stream of generated text chunks, in order.
pub type TokenStream = BoxStream<'static, Result<String, LLMError>>;

/// Domain interface for LLM providers
/// Anti-Corruption Layer that isolates business logic from vendor APIs
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a completion from the LLM
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, LLMError>;

    /// Generate a completion as a stream of chunks.
    ///
    /// Providers without native streaming yield the whole completion as one chunk.
    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<TokenStream, LLMError> {
        let response = self.generate(prompt, options).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(response.text) })))
    }

    /// Check if provider is healthy and accessible
    async fn health_check(&self) -> Result<(), LLMError>;
}

/// Alias-addressed text completion, as seen by the application layer.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn generate(
        &self,
        model_alias: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, LLMError>;

    async fn generate_stream(
        &self,
        model_alias: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<TokenStream, LLMError>;
}

/// Options for LLM generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,

    /// Sampling temperature (0.0 = deterministic, 1.0 = creative)
    pub temperature: Option<f32>,

    /// Sequences that stop generation
    pub stop_sequences: Option<Vec<String>>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: Some(4096),
            temperature: Some(0.7),
            stop_sequences: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    /// Generated text
    pub text: String,

    /// Token usage stats
    pub usage: TokenUsage,

    /// Usage provider name (e.g., "openai", "ollama")
    pub provider: String,

    /// Model used (e.g., "qwen2.5-coder:7b")
    pub model: String,

    /// Why generation stopped
    pub finish_reason: FinishReason,
}

impl GenerationResponse {
    /// Response carrying only text; used by providers that report no usage.
    pub fn text_only(text: impl Into<String>, provider: &str, model: &str) -> Self {
        Self {
            text: text.into(),
            usage: TokenUsage::default(),
            provider: provider.to_string(),
            model: model.to_string(),
            finish_reason: FinishReason::Stop,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason why generation stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural completion (model decided to stop)
    Stop,

    /// Hit max_tokens limit
    Length,

    /// Blocked by content filter
    ContentFilter,
}

/// Errors that can occur during LLM operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum LLMError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("Inference cancelled")]
    Cancelled,

    #[error("Inference unavailable: {0}")]
    Unavailable(String),
}

impl LLMError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LLMError::Network(_)
            | LLMError::RateLimit
            | LLMError::Provider(_)
            | LLMError::Timeout(_)
            | LLMError::Unavailable(_) => true,
            LLMError::Authentication(_)
            | LLMError::ModelNotFound(_)
            | LLMError::InvalidInput(_)
            | LLMError::Cancelled => false,
        }
    }
}
