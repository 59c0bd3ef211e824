// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// LLM Provider Registry - Model Alias Resolution and Provider Management
//
// Resolves model aliases ("fast", "balanced") to a provider adapter and falls
// back to the configured fallback provider when the primary one fails.
// Timeouts and retries are applied by the caller, not here.

use crate::domain::config::{AssistantConfigSpec, LLMProviderConfig};
use crate::domain::llm::{GenerationOptions, GenerationResponse, InferenceEngine, LLMError, LLMProvider, TokenStream};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::ollama::OllamaAdapter;
use super::openai::OpenAIAdapter;

/// One model served by one provider.
#[derive(Clone)]
struct ModelRoute {
    provider: String,
    model: String,
    adapter: Arc<dyn LLMProvider>,
}

/// Registry for managing LLM providers and resolving model aliases
#[derive(Default)]
pub struct ProviderRegistry {
    /// alias -> routes, in configuration order
    aliases: HashMap<String, Vec<ModelRoute>>,
    /// provider -> its first model, used when the fallback lacks the alias
    provider_defaults: HashMap<String, ModelRoute>,
    fallback_provider: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create provider registry from the assistant configuration
    pub fn from_config(spec: &AssistantConfigSpec) -> anyhow::Result<Self> {
        let mut registry = Self::new();

        info!("Initializing LLM provider registry");

        for provider_config in &spec.llm_providers {
            if !provider_config.enabled {
                info!("Provider '{}' disabled, skipping", provider_config.name);
                continue;
            }

            for model_config in &provider_config.models {
                match Self::create_adapter(provider_config, &model_config.model) {
                    Ok(adapter) => {
                        info!(
                            "Mapping alias '{}' -> {} ({})",
                            model_config.alias, model_config.model, provider_config.name
                        );
                        registry.register(&provider_config.name, &model_config.alias, &model_config.model, adapter);
                    }
                    Err(e) => {
                        warn!("Failed to initialize provider '{}': {}", provider_config.name, e);
                        // Continue with other providers
                    }
                }
            }
        }

        if registry.aliases.is_empty() {
            warn!("No LLM providers configured - generation will fail until one is added");
        }

        registry.fallback_provider = spec.llm_selection.fallback_provider.clone();
        Ok(registry)
    }

    /// Serve `alias` from `provider` with `adapter`. The first registration of
    /// an alias is its primary route.
    pub fn register(&mut self, provider: &str, alias: &str, model: &str, adapter: Arc<dyn LLMProvider>) {
        let route = ModelRoute {
            provider: provider.to_string(),
            model: model.to_string(),
            adapter,
        };
        self.provider_defaults
            .entry(provider.to_string())
            .or_insert_with(|| route.clone());
        self.aliases.entry(alias.to_string()).or_default().push(route);
    }

    pub fn with_fallback(mut self, provider: impl Into<String>) -> Self {
        self.fallback_provider = Some(provider.into());
        self
    }

    /// Create a provider instance for one model
    fn create_adapter(config: &LLMProviderConfig, model: &str) -> anyhow::Result<Arc<dyn LLMProvider>> {
        let adapter: Arc<dyn LLMProvider> = match config.provider_type.as_str() {
            "ollama" => Arc::new(OllamaAdapter::new(&config.name, &config.endpoint, model)),
            // OpenAI-compatible APIs (LM Studio, vLLM, etc.) speak the same protocol
            "openai" | "openai-compatible" => {
                let api_key = resolve_api_key(config.api_key.as_deref())?;
                Arc::new(OpenAIAdapter::new(&config.name, &config.endpoint, api_key, model))
            }
            _ => anyhow::bail!("Unsupported provider type: {}", config.provider_type),
        };
        Ok(adapter)
    }

    fn primary(&self, alias: &str) -> Result<&ModelRoute, LLMError> {
        self.aliases
            .get(alias)
            .and_then(|routes| routes.first())
            .ok_or_else(|| LLMError::ModelNotFound(format!("Model alias '{}' not found", alias)))
    }

    /// Route on the fallback provider for `alias`, unless the primary already is it.
    fn fallback(&self, alias: &str, primary: &ModelRoute) -> Option<&ModelRoute> {
        let fallback = self.fallback_provider.as_deref()?;
        if fallback == primary.provider {
            return None;
        }
        self.aliases
            .get(alias)
            .and_then(|routes| routes.iter().find(|r| r.provider == fallback))
            .or_else(|| self.provider_defaults.get(fallback))
    }

    /// Check health of all providers
    pub async fn health_check_all(&self) -> HashMap<String, Result<(), LLMError>> {
        let mut results = HashMap::new();

        for (name, route) in &self.provider_defaults {
            info!("Health checking provider: {}", name);
            results.insert(name.clone(), route.adapter.health_check().await);
        }

        results
    }

    /// Get list of available model aliases, sorted
    pub fn available_aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.aliases.keys().cloned().collect();
        aliases.sort();
        aliases
    }

    /// Check if a model alias exists
    pub fn has_alias(&self, alias: &str) -> bool {
        self.aliases.contains_key(alias)
    }
}

/// Resolve API key from config (supports "env:VAR_NAME" syntax)
fn resolve_api_key(key: Option<&str>) -> anyhow::Result<String> {
    match key {
        Some(k) => match k.strip_prefix("env:") {
            Some(var_name) => std::env::var(var_name)
                .map_err(|_| anyhow::anyhow!("Environment variable not set: {}", var_name)),
            None => Ok(k.to_string()),
        },
        None => Ok(String::new()), // For local providers without auth
    }
}

fn should_fall_back(error: &LLMError) -> bool {
    !matches!(error, LLMError::Cancelled | LLMError::InvalidInput(_))
}

#[async_trait]
impl InferenceEngine for ProviderRegistry {
    async fn generate(
        &self,
        model_alias: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, LLMError> {
        let primary = self.primary(model_alias)?;
        match primary.adapter.generate(prompt, options).await {
            Ok(response) => Ok(response),
            Err(e) if should_fall_back(&e) => match self.fallback(model_alias, primary) {
                Some(fallback) => {
                    warn!(
                        alias = model_alias,
                        provider = %primary.provider,
                        fallback = %fallback.provider,
                        error = %e,
                        "Provider failed, trying fallback provider"
                    );
                    fallback.adapter.generate(prompt, options).await
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn generate_stream(
        &self,
        model_alias: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<TokenStream, LLMError> {
        let primary = self.primary(model_alias)?;
        match primary.adapter.generate_stream(prompt, options).await {
            Ok(stream) => Ok(stream),
            Err(e) if should_fall_back(&e) => match self.fallback(model_alias, primary) {
                Some(fallback) => {
                    warn!(
                        alias = model_alias,
                        model = %primary.model,
                        fallback = %fallback.provider,
                        error = %e,
                        "Provider failed to open stream, trying fallback provider"
                    );
                    fallback.adapter.generate_stream(prompt, options).await
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::AssistantConfigManifest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        fail: bool,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for Fixed {
        async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<GenerationResponse, LLMError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(LLMError::Network("connection refused".into()))
            } else {
                Ok(GenerationResponse::text_only(self.name, self.name, "model"))
            }
        }

        async fn health_check(&self) -> Result<(), LLMError> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_creation_from_default_config() {
        let manifest = AssistantConfigManifest::default();
        let registry = ProviderRegistry::from_config(&manifest.spec).unwrap();
        assert!(registry.has_alias("fast"));
        assert!(registry.has_alias("balanced"));
        assert_eq!(registry.available_aliases(), vec!["balanced", "fast"]);
    }

    #[tokio::test]
    async fn test_unknown_alias_is_model_not_found() {
        let registry = ProviderRegistry::new();
        let err = registry
            .generate("huge", "p", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn test_falls_back_to_fallback_provider() {
        let local = Fixed::new("local", true);
        let remote = Fixed::new("remote", false);
        let mut registry = ProviderRegistry::new();
        registry.register("local", "balanced", "qwen", local.clone());
        registry.register("remote", "large", "gpt", remote.clone());
        let registry = registry.with_fallback("remote");

        let response = registry
            .generate("balanced", "p", &GenerationOptions::default())
            .await
            .unwrap();

        assert_eq!(response.text, "remote");
        assert_eq!(local.calls.load(Ordering::SeqCst), 1);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_without_fallback_the_error_surfaces() {
        let mut registry = ProviderRegistry::new();
        registry.register("local", "fast", "qwen", Fixed::new("local", true));

        let err = registry
            .generate("fast", "p", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::Network(_)));
    }

    #[test]
    fn test_api_key_resolution() {
        assert_eq!(resolve_api_key(None).unwrap(), "");
        assert_eq!(resolve_api_key(Some("sk-inline")).unwrap(), "sk-inline");
        assert!(resolve_api_key(Some("env:ANVIL_TEST_KEY_THAT_IS_NOT_SET")).is_err());
    }
}
