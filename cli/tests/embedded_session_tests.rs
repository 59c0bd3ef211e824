// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anvil_cli::commands::config::{EXAMPLES_TEMPLATE, MINIMAL_TEMPLATE};
use anvil_cli::embedded::{EmbeddedAssistant, SessionStore};
use anvil_core::domain::config::{AssistantConfigManifest, StorageBackend};
use anvil_core::domain::llm::{GenerationOptions, GenerationResponse, InferenceEngine, LLMError, TokenStream};
use anvil_core::domain::turn::TurnRequest;
use anvil_cortex::domain::SessionId;
use anvil_cortex::infrastructure::RuleQuery;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Canned(&'static str);

#[async_trait]
impl InferenceEngine for Canned {
    async fn generate(
        &self,
        model_alias: &str,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<GenerationResponse, LLMError> {
        Ok(GenerationResponse::text_only(self.0, "canned", model_alias))
    }

    async fn generate_stream(
        &self,
        _model_alias: &str,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<TokenStream, LLMError> {
        Ok(Box::pin(futures::stream::iter(vec![Ok(self.0.to_string())])))
    }
}

fn manifest(dir: &Path) -> AssistantConfigManifest {
    let mut manifest = AssistantConfigManifest::default();
    manifest.spec.storage.backend = StorageBackend::Sqlite;
    manifest.spec.storage.path = Some(dir.join("rules.db"));
    manifest
}

async fn open(dir: &Path) -> EmbeddedAssistant {
    EmbeddedAssistant::with_engine(
        &manifest(dir),
        Arc::new(Canned("threshold=1023")),
        SessionStore::new(dir.join("sessions")),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_correction_in_a_later_process_targets_the_saved_turn() {
    let dir = tempfile::tempdir().unwrap();
    let session = SessionId::from_name("bench");

    {
        let assistant = open(dir.path()).await;
        assistant.resume(session).unwrap();
        assistant
            .service()
            .handle_turn(
                TurnRequest::new(session, "Write an adc threshold check"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assistant.persist(session).unwrap();
    }

    let assistant = open(dir.path()).await;
    assistant.resume(session).unwrap();
    let last = assistant.service().feedback().last_turn(session).unwrap();
    assert_eq!(last.artifact_text, "threshold=1023");

    let outcome = assistant
        .service()
        .feedback()
        .submit_correction(session, None, "threshold=4095", "ADC is 12-bit, must use 4095 not 1023")
        .await
        .unwrap();
    assert_eq!(outcome.extraction.rules().len(), 1);
    assistant.persist(session).unwrap();

    let namespace = assistant.service().feedback().namespace(session);
    let stored = assistant
        .stores()
        .rules
        .query(&RuleQuery::all(namespace))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].domain_tag, "adc");

    let metrics = assistant.service().feedback().metrics(session);
    assert_eq!(metrics.turns, 1);
    assert_eq!(metrics.corrections_submitted, 1);
}

#[tokio::test]
async fn test_unknown_session_has_no_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("sessions"));
    assert!(store.load(SessionId::new()).unwrap().is_none());
}

#[test]
fn test_config_templates_are_valid() {
    for template in [MINIMAL_TEMPLATE, EXAMPLES_TEMPLATE] {
        let manifest = AssistantConfigManifest::from_yaml_str(template).unwrap();
        manifest.validate().unwrap();
        assert_eq!(manifest.spec.hardware.default.as_deref(), Some("esp32-c3"));
    }
}
