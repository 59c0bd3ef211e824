// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Timeout, retry and cancellation around inference calls.
//!
//! Every call gets its own timeout. Retryable failures are retried with a
//! linear backoff until `max_attempts` is exhausted. Cancellation wins over
//! both the in-flight call and the backoff sleep.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::config::InferenceConfig;
use crate::domain::llm::{GenerationOptions, GenerationResponse, InferenceEngine, LLMError, TokenStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl CallPolicy {
    pub fn from_config(config: &InferenceConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff(),
        }
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::from_config(&InferenceConfig::default())
    }
}

/// A call that exhausted its attempts or could not be retried.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct CallFailure {
    pub error: LLMError,
    pub attempts: u32,
}

impl CallFailure {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, LLMError::Cancelled)
    }
}

#[derive(Clone)]
pub struct PolicyInference {
    engine: Arc<dyn InferenceEngine>,
    policy: CallPolicy,
}

impl PolicyInference {
    pub fn new(engine: Arc<dyn InferenceEngine>, policy: CallPolicy) -> Self {
        Self { engine, policy }
    }

    pub fn policy(&self) -> CallPolicy {
        self.policy
    }

    pub async fn generate(
        &self,
        model_alias: &str,
        prompt: &str,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> Result<GenerationResponse, CallFailure> {
        self.with_retries(model_alias, cancel, || self.engine.generate(model_alias, prompt, options))
            .await
    }

    /// Open a token stream. The policy covers opening the stream; the caller
    /// bounds each read with [`CallPolicy::timeout`].
    pub async fn generate_stream(
        &self,
        model_alias: &str,
        prompt: &str,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> Result<TokenStream, CallFailure> {
        self.with_retries(model_alias, cancel, || {
            self.engine.generate_stream(model_alias, prompt, options)
        })
        .await
    }

    async fn with_retries<T, F, Fut>(
        &self,
        model_alias: &str,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T, CallFailure>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, LLMError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(model = model_alias, attempt, "Inference call");

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(LLMError::Cancelled),
                outcome = tokio::time::timeout(self.policy.timeout, call()) => {
                    outcome.unwrap_or_else(|_| Err(LLMError::Timeout(self.policy.timeout)))
                }
            };

            let error = match result {
                Ok(value) => {
                    metrics::counter!("anvil_inference_calls_total", "outcome" => "ok").increment(1);
                    return Ok(value);
                }
                Err(error) => error,
            };

            metrics::counter!("anvil_inference_calls_total", "outcome" => "error").increment(1);
            if !error.is_retryable() || attempt >= self.policy.max_attempts {
                return Err(CallFailure {
                    error,
                    attempts: attempt,
                });
            }

            warn!(model = model_alias, attempt, error = %error, "Inference call failed, retrying");
            let backoff = self.policy.backoff * attempt;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(CallFailure {
                        error: LLMError::Cancelled,
                        attempts: attempt,
                    });
                }
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays scripted results; an exhausted script hangs forever.
    struct Scripted {
        script: Mutex<VecDeque<Result<String, LLMError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(script: Vec<Result<String, LLMError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl InferenceEngine for Scripted {
        async fn generate(
            &self,
            model_alias: &str,
            _prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<GenerationResponse, LLMError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front();
            match next {
                Some(result) => result.map(|text| GenerationResponse::text_only(text, "scripted", model_alias)),
                None => futures::future::pending().await,
            }
        }

        async fn generate_stream(
            &self,
            model_alias: &str,
            prompt: &str,
            options: &GenerationOptions,
        ) -> Result<TokenStream, LLMError> {
            let response = self.generate(model_alias, prompt, options).await?;
            Ok(Box::pin(futures::stream::iter(vec![Ok(response.text)])))
        }
    }

    fn policy(timeout_ms: u64, attempts: u32) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_millis(timeout_ms),
            max_attempts: attempts,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_once_then_succeeds() {
        let engine = Scripted::new(vec![Err(LLMError::Network("reset".into())), Ok("ok".into())]);
        let inference = PolicyInference::new(engine.clone(), policy(1_000, 2));

        let response = inference
            .generate("balanced", "p", &GenerationOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.text, "ok");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeouts_are_retried_then_reported() {
        let engine = Scripted::new(vec![]);
        let inference = PolicyInference::new(engine.clone(), policy(20, 2));

        let failure = inference
            .generate("balanced", "p", &GenerationOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(failure.error, LLMError::Timeout(_)));
        assert_eq!(failure.attempts, 2);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_errors_fail_fast() {
        let engine = Scripted::new(vec![Err(LLMError::ModelNotFound("huge".into())), Ok("unused".into())]);
        let inference = PolicyInference::new(engine.clone(), policy(1_000, 3));

        let failure = inference
            .generate("balanced", "p", &GenerationOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_call() {
        let engine = Scripted::new(vec![]);
        let inference = PolicyInference::new(engine, policy(60_000, 2));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let failure = inference
            .generate("balanced", "p", &GenerationOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(failure.is_cancelled());
        assert_eq!(failure.attempts, 1);
    }
}
