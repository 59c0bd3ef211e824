// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Ollama LLM Provider Adapter
//
// Anti-Corruption Layer for Ollama local models.
// Streaming uses /api/generate with `stream: true`, which answers with one
// JSON object per line (NDJSON) until an object with `done: true`.

use std::fmt::Display;

use crate::domain::llm::{
    FinishReason, GenerationOptions, GenerationResponse, LLMError, LLMProvider, TokenStream, TokenUsage,
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

pub struct OllamaAdapter {
    client: reqwest::Client,
    provider_name: String,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    eval_count: Option<u32>,
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaAdapter {
    pub fn new(provider_name: impl Into<String>, endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider_name: provider_name.into(),
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }

    async fn post_generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        stream: bool,
    ) -> Result<reqwest::Response, LLMError> {
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream,
            options: Some(OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens.map(|t| t as i32),
                stop: options.stop_sequences.clone(),
            }),
        };

        let url = format!("{}/api/generate", self.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            return Err(if status == 404 {
                LLMError::ModelNotFound(self.model.clone())
            } else if status == 503 {
                LLMError::Unavailable(error_text)
            } else {
                LLMError::Provider(format!("HTTP {}: {}", status, error_text))
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl LLMProvider for OllamaAdapter {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, LLMError> {
        let response = self.post_generate(prompt, options, false).await?;

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LLMError::Provider(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = ollama_response.error {
            return Err(LLMError::Provider(error));
        }

        let prompt_tokens = ollama_response.prompt_eval_count.unwrap_or(0);
        let completion_tokens = ollama_response.eval_count.unwrap_or(0);

        Ok(GenerationResponse {
            text: ollama_response.response,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            provider: self.provider_name.clone(),
            model: self.model.clone(),
            finish_reason: match ollama_response.done_reason.as_deref() {
                Some("length") => FinishReason::Length,
                _ if ollama_response.done => FinishReason::Stop,
                _ => FinishReason::Length,
            },
        })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<TokenStream, LLMError> {
        let response = self.post_generate(prompt, options, true).await?;
        Ok(ndjson_tokens(response.bytes_stream()))
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        // Check if Ollama server is running by listing models
        let url = format!("{}/api/tags", self.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LLMError::Network(format!("HTTP {}", response.status())))
        }
    }
}

struct NdjsonState<S> {
    body: S,
    buffer: Vec<u8>,
    finished: bool,
}

/// Decode an Ollama NDJSON body into text chunks. Lines may be split across
/// body chunks. Empty `response` fields are skipped; the stream ends at the
/// first `done: true` object or at end of body.
pub fn ndjson_tokens<S, B, E>(body: S) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = NdjsonState {
        body: Box::pin(body.fuse()),
        buffer: Vec::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            if let Some(end) = state.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = state.buffer.drain(..=end).collect();
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                let chunk: OllamaResponse = match serde_json::from_slice(&line) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(LLMError::Provider(format!("Malformed stream line: {e}"))), state));
                    }
                };
                if let Some(error) = chunk.error {
                    state.finished = true;
                    return Some((Err(LLMError::Provider(error)), state));
                }
                state.finished = chunk.done;
                if chunk.response.is_empty() {
                    continue;
                }
                return Some((Ok(chunk.response), state));
            }

            match state.body.next().await {
                Some(Ok(bytes)) => state.buffer.extend_from_slice(bytes.as_ref()),
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(LLMError::Network(e.to_string())), state));
                }
                None if state.buffer.iter().all(u8::is_ascii_whitespace) => return None,
                // Last line without a trailing newline
                None => state.buffer.push(b'\n'),
            }
        }
    }))
}
