// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Assistant Configuration Types
//
// Defines the configuration schema for an anvil assistant, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - LLM provider configuration and model aliases per tier
// - Inference timeout/retry/concurrency policy
// - Router keyword tables, retrieval limits and learning policy
// - Rule Store backend, registry override and default hardware
// - Logging settings

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anvil_cortex::domain::{ConfidencePolicy, DecayConfig};
use serde::{Deserialize, Serialize};

use super::llm::GenerationOptions;
use super::routing::RoutingConfig;

pub const API_VERSION: &str = "anvil/v1";
pub const KIND: &str = "AssistantConfig";

/// Top-level Kubernetes-style assistant configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfigManifest {
    /// API version (must be "anvil/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "AssistantConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: AssistantConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Assistant configuration specification (content under spec:)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfigSpec {
    #[serde(default = "default_providers")]
    pub llm_providers: Vec<LLMProviderConfig>,

    #[serde(default)]
    pub llm_selection: LLMSelection,

    #[serde(default)]
    pub inference: InferenceConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub learning: LearningConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Registry document overriding the embedded default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryConfig>,

    #[serde(default)]
    pub hardware: HardwareConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMProviderConfig {
    /// Unique provider name (e.g., "ollama-local", "openai")
    pub name: String,

    /// Provider type: "ollama", "openai" or "openai-compatible"
    #[serde(rename = "type")]
    pub provider_type: String,

    /// API endpoint URL
    pub endpoint: String,

    /// API key (supports "env:VAR_NAME" for environment variables)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Alias the assistant asks for (e.g., "fast", "balanced")
    pub alias: String,

    /// Actual model identifier for the provider API
    pub model: String,

    #[serde(default = "default_context_window")]
    pub context_window: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMSelection {
    /// Alias used for FAST turns
    #[serde(default = "default_fast_model")]
    pub fast_model: String,

    /// Alias used for BALANCED and MODULAR turns
    #[serde(default = "default_balanced_model")]
    pub balanced_model: String,

    /// Provider tried when the alias's own provider fails
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_provider: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Per-call timeout
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Attempts per call; 2 means one retry
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Module calls in flight at once during a MODULAR build
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_max_tokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            max_tokens: self.max_tokens,
            temperature: Some(self.temperature),
            stop_sequences: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Rules injected into a single-call prompt
    #[serde(default = "default_rule_limit")]
    pub rule_limit: usize,

    /// Rules injected into each module prompt of a MODULAR build
    #[serde(default = "default_module_rule_limit")]
    pub module_rule_limit: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Write and read rules in one namespace shared by every session
    #[serde(default)]
    pub shared_rule_namespace: bool,

    #[serde(default)]
    pub confidence: ConfidencePolicy,

    #[serde(default)]
    pub decay: DecayConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    InMemory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,

    /// SQLite database file; defaults to the user data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn sqlite_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| data_dir().join("rules.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Profile assumed when a request names no board
    #[serde(default = "default_hardware", skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Directory for the rule database and session snapshots.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("anvil"))
        .unwrap_or_else(|| PathBuf::from(".anvil"))
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_context_window() -> u32 {
    8192
}

fn default_fast_model() -> String {
    "fast".to_string()
}

fn default_balanced_model() -> String {
    "balanced".to_string()
}

fn default_timeout_seconds() -> u64 {
    90
}

fn default_max_attempts() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_concurrency() -> usize {
    3
}

fn default_max_tokens() -> Option<u32> {
    Some(4096)
}

fn default_rule_limit() -> usize {
    25
}

fn default_module_rule_limit() -> usize {
    10
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Sqlite
}

fn default_hardware() -> Option<String> {
    Some("esp32-c3".to_string())
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_providers() -> Vec<LLMProviderConfig> {
    vec![LLMProviderConfig {
        name: "ollama-local".to_string(),
        provider_type: "ollama".to_string(),
        endpoint: "http://localhost:11434".to_string(),
        api_key: None,
        enabled: true,
        models: vec![
            ModelConfig {
                alias: "fast".to_string(),
                model: "qwen2.5-coder:1.5b".to_string(),
                context_window: default_context_window(),
            },
            ModelConfig {
                alias: "balanced".to_string(),
                model: "qwen2.5-coder:3b".to_string(),
                context_window: default_context_window(),
            },
        ],
    }]
}

impl Default for LLMSelection {
    fn default() -> Self {
        Self {
            fast_model: default_fast_model(),
            balanced_model: default_balanced_model(),
            fallback_provider: None,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_concurrency: default_max_concurrency(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rule_limit: default_rule_limit(),
            module_rule_limit: default_module_rule_limit(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: None,
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            default: default_hardware(),
        }
    }
}

impl Default for AssistantConfigSpec {
    fn default() -> Self {
        Self {
            llm_providers: default_providers(),
            llm_selection: LLMSelection::default(),
            inference: InferenceConfig::default(),
            routing: RoutingConfig::default(),
            retrieval: RetrievalConfig::default(),
            learning: LearningConfig::default(),
            storage: StorageConfig::default(),
            registry: None,
            hardware: HardwareConfig::default(),
            observability: None,
        }
    }
}

impl Default for AssistantConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "anvil".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: AssistantConfigSpec::default(),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl AssistantConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. ANVIL_CONFIG_PATH environment variable
    /// 2. ./anvil-config.yaml (working directory)
    /// 3. ~/.anvil/config.yaml (user home)
    /// 4. /etc/anvil/config.yaml (system, Unix) or C:\ProgramData\Anvil\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("ANVIL_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./anvil-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".anvil").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/anvil/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Anvil\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path (Fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("ANVIL_SHARED_RULES") {
            match parse_bool(&val) {
                Some(shared) => {
                    tracing::info!("Environment override: ANVIL_SHARED_RULES={}", shared);
                    self.spec.learning.shared_rule_namespace = shared;
                }
                None => tracing::warn!(
                    "Invalid value for ANVIL_SHARED_RULES: '{}'. Expected true/false. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("ANVIL_MODULE_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => {
                    tracing::info!("Environment override: ANVIL_MODULE_TIMEOUT_SECS={}", secs);
                    self.spec.inference.timeout_seconds = secs;
                }
                _ => tracing::warn!(
                    "Invalid value for ANVIL_MODULE_TIMEOUT_SECS: '{}'. Expected a positive integer. Ignoring.",
                    val
                ),
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        for provider in &self.spec.llm_providers {
            if provider.name.is_empty() {
                anyhow::bail!("LLM provider name cannot be empty");
            }

            if provider.endpoint.is_empty() {
                anyhow::bail!("LLM provider endpoint cannot be empty for: {}", provider.name);
            }

            if provider.models.is_empty() {
                anyhow::bail!("LLM provider must have at least one model: {}", provider.name);
            }

            for model in &provider.models {
                if model.alias.is_empty() {
                    anyhow::bail!("Model alias cannot be empty in provider: {}", provider.name);
                }

                if model.model.is_empty() {
                    anyhow::bail!("Model identifier cannot be empty for alias: {}", model.alias);
                }
            }
        }

        if let Some(fallback_provider) = &self.spec.llm_selection.fallback_provider {
            if !self.spec.llm_providers.iter().any(|p| &p.name == fallback_provider) {
                anyhow::bail!("Fallback provider '{}' not found in llm_providers", fallback_provider);
            }
        }

        if self.spec.inference.max_attempts == 0 {
            anyhow::bail!("spec.inference.max_attempts must be at least 1");
        }

        if self.spec.inference.max_concurrency == 0 {
            anyhow::bail!("spec.inference.max_concurrency must be at least 1");
        }

        if self.spec.inference.timeout_seconds == 0 {
            anyhow::bail!("spec.inference.timeout_seconds must be at least 1");
        }

        if let Err(e) = self.spec.learning.confidence.validate() {
            anyhow::bail!("spec.learning.confidence: {}", e);
        }

        Ok(())
    }
}
