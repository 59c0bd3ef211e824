// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Embedded assistant
//!
//! Creates the assistant services in-process and keeps per-session feedback
//! state on disk between invocations.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use anvil_core::{
    application::{
        assistant::AssistantService,
        feedback::SessionSnapshot,
        repository_factory::{create_rule_stores, RuleStores},
    },
    domain::{
        config::{data_dir, AssistantConfigManifest},
        llm::InferenceEngine,
        registry::Registry,
    },
    infrastructure::{event_bus::EventBus, llm::registry::ProviderRegistry},
};
use anvil_cortex::domain::SessionId;

pub struct EmbeddedAssistant {
    service: Arc<AssistantService>,
    stores: RuleStores,
    sessions: SessionStore,
}

impl EmbeddedAssistant {
    /// Load configuration, connect the rule store and the LLM providers.
    pub async fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let manifest = AssistantConfigManifest::load_or_default(config_path)
            .context("Failed to load configuration")?;
        manifest
            .validate()
            .context("Configuration validation failed")?;

        let providers = ProviderRegistry::from_config(&manifest.spec)
            .context("Failed to initialize LLM providers")?;

        Self::with_engine(&manifest, Arc::new(providers), SessionStore::new(data_dir().join("sessions"))).await
    }

    pub async fn with_engine(
        manifest: &AssistantConfigManifest,
        engine: Arc<dyn InferenceEngine>,
        sessions: SessionStore,
    ) -> Result<Self> {
        let spec = &manifest.spec;
        let registry = match &spec.registry {
            Some(config) => Registry::from_yaml_file(&config.path)
                .with_context(|| format!("Failed to load registry {:?}", config.path))?,
            None => Registry::builtin().context("Failed to load built-in registry")?,
        };

        let stores = create_rule_stores(&spec.storage)
            .await
            .context("Failed to open rule store")?;
        let event_bus = Arc::new(EventBus::with_default_capacity());

        let service = AssistantService::from_config(
            spec,
            Arc::new(registry),
            engine,
            stores.clone(),
            event_bus,
        );
        info!(backend = ?spec.storage.backend, "Assistant ready");

        Ok(Self {
            service: Arc::new(service),
            stores,
            sessions,
        })
    }

    pub fn service(&self) -> &Arc<AssistantService> {
        &self.service
    }

    pub fn stores(&self) -> &RuleStores {
        &self.stores
    }

    /// Bring back the feedback state saved by an earlier invocation.
    pub fn resume(&self, session: SessionId) -> Result<()> {
        if let Some(snapshot) = self.sessions.load(session)? {
            debug!(session = %session, turns = snapshot.metrics.turns, "Resumed session");
            self.service.feedback().restore(snapshot);
        }
        Ok(())
    }

    pub fn persist(&self, session: SessionId) -> Result<()> {
        self.sessions.save(&self.service.feedback().snapshot(session))
    }
}

/// One JSON snapshot per session under a directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, session: SessionId) -> PathBuf {
        self.dir.join(format!("{}.json", session))
    }

    pub fn load(&self, session: SessionId) -> Result<Option<SessionSnapshot>> {
        let path = self.path(session);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read session {:?}", path))?;
        let snapshot = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session {:?}", path))?;
        Ok(Some(snapshot))
    }

    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {:?}", self.dir))?;
        let path = self.path(snapshot.session);
        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write session {:?}", path))?;
        Ok(())
    }
}
