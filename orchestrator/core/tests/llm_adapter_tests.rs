// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anvil_core::domain::llm::{FinishReason, GenerationOptions, InferenceEngine, LLMError, LLMProvider};
use anvil_core::infrastructure::llm::ollama::OllamaAdapter;
use anvil_core::infrastructure::llm::openai::OpenAIAdapter;
use anvil_core::infrastructure::llm::ProviderRegistry;
use futures::StreamExt;
use mockito::Matcher;
use std::sync::Arc;

#[tokio::test]
async fn test_ollama_generate_parses_usage() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/generate")
        .match_body(Matcher::PartialJsonString(r#"{"model":"qwen2.5-coder:3b","stream":false}"#.into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"response":"void setup() {}","done":true,"prompt_eval_count":12,"eval_count":5}"#)
        .create_async()
        .await;

    let adapter = OllamaAdapter::new("ollama-local", server.url(), "qwen2.5-coder:3b");
    let response = adapter
        .generate("write setup", &GenerationOptions::default())
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(response.text, "void setup() {}");
    assert_eq!(response.usage.total_tokens, 17);
    assert_eq!(response.provider, "ollama-local");
    assert_eq!(response.finish_reason, FinishReason::Stop);
}

#[tokio::test]
async fn test_ollama_missing_model_maps_to_model_not_found() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/generate")
        .with_status(404)
        .with_body(r#"{"error":"model not found"}"#)
        .create_async()
        .await;

    let adapter = OllamaAdapter::new("ollama-local", server.url(), "missing:7b");
    let err = adapter
        .generate("p", &GenerationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LLMError::ModelNotFound(model) if model == "missing:7b"));
}

#[tokio::test]
async fn test_ollama_stream_decodes_ndjson_body() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/generate")
        .match_body(Matcher::PartialJsonString(r#"{"stream":true}"#.into()))
        .with_status(200)
        .with_header("content-type", "application/x-ndjson")
        .with_body(concat!(
            "{\"response\":\"void \",\"done\":false}\n",
            "{\"response\":\"loop() {}\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true,\"eval_count\":2}\n",
        ))
        .create_async()
        .await;

    let adapter = OllamaAdapter::new("ollama-local", server.url(), "qwen2.5-coder:1.5b");
    let stream = adapter
        .generate_stream("p", &GenerationOptions::default())
        .await
        .unwrap();
    let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;

    assert_eq!(chunks.concat(), "void loop() {}");
}

#[tokio::test]
async fn test_openai_sends_bearer_token_and_reads_choice() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"choices":[{"message":{"role":"assistant","content":"int x = 1;"},"finish_reason":"length"}],
                "usage":{"prompt_tokens":3,"completion_tokens":4,"total_tokens":7}}"#,
        )
        .create_async()
        .await;

    let adapter = OpenAIAdapter::new("openai", server.url(), "sk-test", "gpt-4o-mini");
    let response = adapter
        .generate("p", &GenerationOptions::default())
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(response.text, "int x = 1;");
    assert_eq!(response.usage.total_tokens, 7);
    assert_eq!(response.finish_reason, FinishReason::Length);
}

#[tokio::test]
async fn test_openai_compatible_server_without_key_or_usage() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"ok"}}]}"#)
        .create_async()
        .await;

    let adapter = OpenAIAdapter::new("lm-studio", server.url(), "", "local-model");
    let response = adapter
        .generate("p", &GenerationOptions::default())
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(response.text, "ok");
    assert_eq!(response.usage.total_tokens, 0);
}

#[tokio::test]
async fn test_openai_status_codes_map_to_errors() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .create_async()
        .await;

    let adapter = OpenAIAdapter::new("openai", server.url(), "sk-test", "gpt-4o-mini");
    let err = adapter
        .generate("p", &GenerationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LLMError::RateLimit));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_registry_falls_back_when_local_server_is_down() {
    let mut remote = mockito::Server::new_async().await;
    remote
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"from remote"}}]}"#)
        .create_async()
        .await;

    let mut local = mockito::Server::new_async().await;
    local
        .mock("POST", "/api/generate")
        .with_status(503)
        .with_body("loading model")
        .create_async()
        .await;

    let mut registry = ProviderRegistry::new();
    registry.register(
        "ollama-local",
        "balanced",
        "qwen2.5-coder:3b",
        Arc::new(OllamaAdapter::new("ollama-local", local.url(), "qwen2.5-coder:3b")),
    );
    registry.register(
        "remote",
        "large",
        "gpt-4o-mini",
        Arc::new(OpenAIAdapter::new("remote", remote.url(), "sk-test", "gpt-4o-mini")),
    );
    let registry = registry.with_fallback("remote");

    let response = registry
        .generate("balanced", "p", &GenerationOptions::default())
        .await
        .unwrap();
    assert_eq!(response.text, "from remote");
    assert_eq!(response.provider, "remote");
}
