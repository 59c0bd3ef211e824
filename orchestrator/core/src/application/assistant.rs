// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Assistant Service
//!
//! Runs one user turn end to end.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestrate Router → Retrieval → generation → Validator → feedback
//! - **Integration:** the CLI (or any transport) calls [`AssistantService::handle_turn`]
//!   or [`AssistantService::stream_turn`]
//!
//! # Turn pipeline
//!
//! 1. Route the request and resolve the hardware profile.
//! 2. Select rules for the detected modules (plus `general`).
//! 3. FAST / BALANCED: render the base prompt and make one call.
//!    MODULAR: hand off to the [`ModularBuilder`].
//! 4. Validate and auto-fix the artifact.
//! 5. Only now, with the turn complete, record rule usage and remember the
//!    turn for feedback. A cancelled turn writes nothing.

use std::sync::Arc;
use std::time::Instant;

use anvil_cortex::application::{EventBus as CortexEventBus, PatternLearningEngine, RuleRetrieval};
use anvil_cortex::domain::{ModuleCatalog, Rule, RuleId, RuleNamespace, SessionId};
use anvil_cortex::infrastructure::RepositoryError;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::decomposition::{BuildError, BuildPlan, ModularBuilder};
use crate::application::feedback::FeedbackLoop;
use crate::application::inference::{CallFailure, CallPolicy, PolicyInference};
use crate::application::repository_factory::RuleStores;
use crate::application::router::RequestRouter;
use crate::application::validator::{CodeValidator, ValidationContext, ValidationReport};
use crate::domain::config::AssistantConfigSpec;
use crate::domain::events::TurnEvent;
use crate::domain::llm::{GenerationOptions, InferenceEngine, LLMError};
use crate::domain::registry::{HardwareProfile, Registry};
use crate::domain::routing::{RouteDecision, Tier};
use crate::domain::turn::{TurnId, TurnRequest, TurnResult, TurnStreamEvent};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::prompt_template_engine::{
    HardwareContext, ModuleContext, PromptContext, PromptTemplateEngine,
};

const STREAM_BUFFER: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("inference unavailable after {attempts} attempt(s): {source}")]
    InferenceUnavailable { attempts: u32, source: LLMError },

    #[error(transparent)]
    Build(BuildError),

    #[error("turn cancelled")]
    Cancelled,

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("prompt rendering failed: {0}")]
    Prompt(String),
}

impl From<CallFailure> for AssistantError {
    fn from(failure: CallFailure) -> Self {
        if failure.is_cancelled() {
            AssistantError::Cancelled
        } else {
            AssistantError::InferenceUnavailable {
                attempts: failure.attempts,
                source: failure.error,
            }
        }
    }
}

impl From<BuildError> for AssistantError {
    fn from(error: BuildError) -> Self {
        match error {
            BuildError::Cancelled => AssistantError::Cancelled,
            BuildError::Repository(e) => AssistantError::Repository(e),
            other => AssistantError::Build(other),
        }
    }
}

/// Per-turn knobs taken from the configuration.
#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub fast_model: String,
    pub balanced_model: String,
    pub options: GenerationOptions,
    pub rule_limit: usize,
    /// Hardware profile assumed when neither the request nor the caller names one.
    pub default_hardware: Option<String>,
}

impl AssistantSettings {
    pub fn from_config(spec: &AssistantConfigSpec) -> Self {
        Self {
            fast_model: spec.llm_selection.fast_model.clone(),
            balanced_model: spec.llm_selection.balanced_model.clone(),
            options: spec.inference.generation_options(),
            rule_limit: spec.retrieval.rule_limit,
            default_hardware: spec.hardware.default.clone(),
        }
    }
}

/// State of a turn between routing and generation.
struct PreparedTurn {
    turn_id: TurnId,
    started: Instant,
    request: TurnRequest,
    decision: RouteDecision,
    hardware: Option<HardwareProfile>,
    namespace: RuleNamespace,
    rules: Vec<Rule>,
}

/// Artifact before validation.
struct Generated {
    artifact: String,
    critiques: Vec<String>,
    rule_ids: Vec<RuleId>,
    /// Modules the artifact actually covers.
    modules: Vec<String>,
}

pub struct AssistantService {
    registry: Arc<Registry>,
    router: RequestRouter,
    retrieval: Arc<RuleRetrieval>,
    templates: Arc<PromptTemplateEngine>,
    inference: PolicyInference,
    builder: ModularBuilder,
    validator: CodeValidator,
    feedback: Arc<FeedbackLoop>,
    event_bus: Arc<EventBus>,
    settings: AssistantSettings,
}

impl AssistantService {
    /// Wire every service from the configuration.
    pub fn from_config(
        spec: &AssistantConfigSpec,
        registry: Arc<Registry>,
        engine: Arc<dyn InferenceEngine>,
        stores: RuleStores,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let cortex_bus: Arc<dyn CortexEventBus> = event_bus.clone();
        let catalog: Arc<dyn ModuleCatalog> = registry.clone();

        let retrieval = Arc::new(
            RuleRetrieval::new(stores.rules.clone(), cortex_bus.clone())
                .with_decay(spec.learning.decay.into_policy())
                .with_default_limit(spec.retrieval.rule_limit),
        );
        let learning = Arc::new(
            PatternLearningEngine::new(
                stores.rules.clone(),
                stores.corrections.clone(),
                catalog,
                cortex_bus,
            )
            .with_policy(spec.learning.confidence.clone()),
        );
        let feedback = Arc::new(
            FeedbackLoop::new(learning, stores.corrections, stores.rules, retrieval.clone())
                .with_shared_namespace(spec.learning.shared_rule_namespace),
        );

        let inference = PolicyInference::new(engine, CallPolicy::from_config(&spec.inference));
        let templates = Arc::new(PromptTemplateEngine::new());
        let settings = AssistantSettings::from_config(spec);
        let builder = ModularBuilder::new(
            registry.clone(),
            inference.clone(),
            retrieval.clone(),
            templates.clone(),
            event_bus.clone(),
        )
        .with_model_alias(settings.balanced_model.clone())
        .with_options(settings.options.clone())
        .with_max_concurrency(spec.inference.max_concurrency)
        .with_module_rule_limit(spec.retrieval.module_rule_limit);

        Self {
            router: RequestRouter::new(registry.clone(), &spec.routing),
            validator: CodeValidator::new(registry.clone()),
            registry,
            retrieval,
            templates,
            inference,
            builder,
            feedback,
            event_bus,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn feedback(&self) -> &Arc<FeedbackLoop> {
        &self.feedback
    }

    pub fn retrieval(&self) -> &Arc<RuleRetrieval> {
        &self.retrieval
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn route(&self, text: &str, force_tier: Option<Tier>) -> RouteDecision {
        self.router.route(text, force_tier)
    }

    pub fn validate(&self, artifact: &str, context: &ValidationContext<'_>) -> ValidationReport {
        self.validator.validate_and_fix(artifact, context)
    }

    /// Run one turn to completion.
    pub async fn handle_turn(
        &self,
        request: TurnRequest,
        cancel: &CancellationToken,
    ) -> Result<TurnResult, AssistantError> {
        let turn_id = TurnId::new();
        let session = request.session;

        let outcome = self.run_blocking(turn_id, request, cancel).await;
        if let Err(error) = &outcome {
            self.report_failure(turn_id, session, error);
        }
        outcome
    }

    async fn run_blocking(
        &self,
        turn_id: TurnId,
        request: TurnRequest,
        cancel: &CancellationToken,
    ) -> Result<TurnResult, AssistantError> {
        let prepared = self.prepare(turn_id, request).await?;
        let generated = match prepared.decision.tier {
            Tier::Modular => self.generate_modular(&prepared, cancel).await?,
            Tier::Fast | Tier::Balanced => {
                let prompt = self.single_call_prompt(&prepared)?;
                let response = self
                    .inference
                    .generate(self.model_alias(prepared.decision.tier), &prompt, &self.settings.options, cancel)
                    .await?;
                Generated {
                    artifact: response.text,
                    critiques: Vec::new(),
                    rule_ids: prepared.rules.iter().map(|r| r.id).collect(),
                    modules: prepared.decision.modules.clone(),
                }
            }
        };
        self.finish(prepared, generated, cancel).await
    }

    /// Run one turn, streaming tokens as they arrive.
    ///
    /// The stream ends with exactly one `Completed` or `Failed` item. MODULAR
    /// turns emit the merged artifact as a single token. Dropping the stream
    /// or cancelling `cancel` aborts the in-flight call.
    pub fn stream_turn(
        self: &Arc<Self>,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> ReceiverStream<TurnStreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let service = Arc::clone(self);

        tokio::spawn(async move {
            let turn_id = TurnId::new();
            let session = request.session;

            let terminal = match service.run_streamed(turn_id, request, &cancel, &tx).await {
                Ok(result) => TurnStreamEvent::Completed(Box::new(result)),
                Err(error) => {
                    service.report_failure(turn_id, session, &error);
                    TurnStreamEvent::Failed(error.to_string())
                }
            };
            if tx.send(terminal).await.is_err() {
                debug!(turn_id = %turn_id, "Stream receiver dropped before the turn ended");
            }
        });

        ReceiverStream::new(rx)
    }

    async fn run_streamed(
        &self,
        turn_id: TurnId,
        request: TurnRequest,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<TurnStreamEvent>,
    ) -> Result<TurnResult, AssistantError> {
        let prepared = self.prepare(turn_id, request).await?;

        let generated = match prepared.decision.tier {
            Tier::Modular => {
                // Nothing is sent until the build finishes, so watch for the
                // receiver going away while the module calls run.
                let generated = tokio::select! {
                    biased;
                    _ = tx.closed() => {
                        cancel.cancel();
                        return Err(AssistantError::Cancelled);
                    }
                    generated = self.generate_modular(&prepared, cancel) => generated?,
                };
                if tx.send(TurnStreamEvent::Token(generated.artifact.clone())).await.is_err() {
                    cancel.cancel();
                    return Err(AssistantError::Cancelled);
                }
                generated
            }
            Tier::Fast | Tier::Balanced => {
                let prompt = self.single_call_prompt(&prepared)?;
                let mut stream = self
                    .inference
                    .generate_stream(self.model_alias(prepared.decision.tier), &prompt, &self.settings.options, cancel)
                    .await?;

                // Each read gets the full call timeout; a stalled model ends the turn.
                let read_timeout = self.inference.policy().timeout;
                let mut artifact = String::new();
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(AssistantError::Cancelled),
                        _ = tx.closed() => {
                            cancel.cancel();
                            return Err(AssistantError::Cancelled);
                        }
                        next = tokio::time::timeout(read_timeout, stream.next()) => match next {
                            Ok(next) => next,
                            Err(_) => {
                                warn!(turn_id = %turn_id, timeout = ?read_timeout, "Token stream stalled");
                                metrics::counter!("anvil_inference_calls_total", "outcome" => "stalled").increment(1);
                                return Err(CallFailure {
                                    error: LLMError::Timeout(read_timeout),
                                    attempts: 1,
                                }
                                .into());
                            }
                        },
                    };
                    match next {
                        Some(Ok(chunk)) => {
                            artifact.push_str(&chunk);
                            if tx.send(TurnStreamEvent::Token(chunk)).await.is_err() {
                                cancel.cancel();
                                return Err(AssistantError::Cancelled);
                            }
                        }
                        Some(Err(error)) => {
                            return Err(CallFailure { error, attempts: 1 }.into());
                        }
                        None => break,
                    }
                }

                Generated {
                    artifact,
                    critiques: Vec::new(),
                    rule_ids: prepared.rules.iter().map(|r| r.id).collect(),
                    modules: prepared.decision.modules.clone(),
                }
            }
        };

        self.finish(prepared, generated, cancel).await
    }

    async fn prepare(&self, turn_id: TurnId, request: TurnRequest) -> Result<PreparedTurn, AssistantError> {
        let decision = self.router.route(&request.text, request.force_tier);
        let hardware = self.resolve_hardware(&decision, &request);
        let namespace = self.feedback.namespace(request.session);

        self.event_bus.publish_turn_event(TurnEvent::Routed {
            turn_id,
            session: request.session,
            tier: decision.tier,
            modules: decision.modules.clone(),
            forced: decision.forced,
            routed_at: Utc::now(),
        });

        let rules = self
            .retrieval
            .select(namespace, &decision.modules, Some(self.settings.rule_limit))
            .await?;
        debug!(turn_id = %turn_id, rules = rules.len(), "Selected rules for turn");

        Ok(PreparedTurn {
            turn_id,
            started: Instant::now(),
            request,
            decision,
            hardware,
            namespace,
            rules,
        })
    }

    /// Named in the request, else given by the caller, else the configured default.
    fn resolve_hardware(&self, decision: &RouteDecision, request: &TurnRequest) -> Option<HardwareProfile> {
        let name = decision
            .hardware
            .as_deref()
            .or(request.hardware.as_deref())
            .or(self.settings.default_hardware.as_deref())?;
        let profile = self.registry.hardware(name).cloned();
        if profile.is_none() {
            warn!(hardware = name, "Unknown hardware profile, continuing without one");
        }
        profile
    }

    fn model_alias(&self, tier: Tier) -> &str {
        match tier {
            Tier::Fast => &self.settings.fast_model,
            Tier::Balanced | Tier::Modular => &self.settings.balanced_model,
        }
    }

    fn single_call_prompt(&self, prepared: &PreparedTurn) -> Result<String, AssistantError> {
        let modules = &prepared.decision.modules;
        let active = modules
            .iter()
            .filter_map(|name| self.registry.module(name))
            .map(ModuleContext::from)
            .collect();
        let excluded = self
            .registry
            .modules()
            .iter()
            .filter(|m| !modules.contains(&m.name))
            .map(|m| m.name.clone())
            .collect();

        let context = PromptContext::new(prepared.request.text.clone())
            .hardware(prepared.hardware.as_ref().map(HardwareContext::from))
            .modules(active)
            .excluded_modules(excluded)
            .rules(prepared.rules.iter().map(|r| r.text.clone()).collect());

        self.templates
            .render_base(&context)
            .map_err(|e| AssistantError::Prompt(format!("{e:#}")))
    }

    async fn generate_modular(
        &self,
        prepared: &PreparedTurn,
        cancel: &CancellationToken,
    ) -> Result<Generated, AssistantError> {
        let plan = BuildPlan {
            turn_id: prepared.turn_id,
            namespace: prepared.namespace,
            request: &prepared.request.text,
            modules: &prepared.decision.modules,
            hardware: prepared.hardware.as_ref(),
            turn_rules: &prepared.rules,
        };
        let output = self.builder.build(&plan, cancel).await?;
        Ok(Generated {
            artifact: output.artifact,
            critiques: output.critiques,
            rule_ids: output.rule_ids,
            modules: output.modules_built,
        })
    }

    async fn finish(
        &self,
        prepared: PreparedTurn,
        generated: Generated,
        cancel: &CancellationToken,
    ) -> Result<TurnResult, AssistantError> {
        let context = ValidationContext {
            domain_tags: &prepared.decision.modules,
            hardware: prepared.hardware.as_ref().map(|h| h.name.as_str()),
            request: &prepared.request.text,
        };
        let report = self.validator.validate_and_fix(&generated.artifact, &context);

        // Nothing is written for a turn the caller abandoned.
        if cancel.is_cancelled() {
            return Err(AssistantError::Cancelled);
        }
        self.retrieval.record_usage(&generated.rule_ids).await?;

        let mut critiques = generated.critiques;
        critiques.extend(report.critiques);
        let suggestions = self
            .registry
            .suggestions_for(&prepared.decision.modules, &report.artifact);

        let result = TurnResult {
            turn_id: prepared.turn_id,
            session: prepared.request.session,
            request: prepared.request.text,
            tier: prepared.decision.tier,
            artifact_text: report.artifact,
            applied_fixes: report.applied_fixes,
            critiques,
            modules_used: generated.modules,
            suggestions,
            hardware: prepared.hardware.map(|h| h.name),
            rule_ids: generated.rule_ids,
            completed_at: Utc::now(),
        };
        self.feedback.record_turn(&result);

        let duration_ms = prepared.started.elapsed().as_millis() as u64;
        self.event_bus.publish_turn_event(TurnEvent::TurnCompleted {
            turn_id: result.turn_id,
            session: result.session,
            tier: result.tier,
            applied_fixes: result.applied_fixes.len(),
            critiques: result.critiques.len(),
            rules_injected: result.rule_ids.len(),
            duration_ms,
            completed_at: result.completed_at,
        });
        metrics::counter!("anvil_turns_total", "tier" => result.tier.to_string()).increment(1);
        info!(
            turn_id = %result.turn_id,
            tier = %result.tier,
            fixes = result.applied_fixes.len(),
            critiques = result.critiques.len(),
            duration_ms,
            "Turn completed"
        );

        Ok(result)
    }

    fn report_failure(&self, turn_id: TurnId, session: SessionId, error: &AssistantError) {
        match error {
            AssistantError::Cancelled => info!(turn_id = %turn_id, "Turn cancelled"),
            other => warn!(turn_id = %turn_id, error = %other, "Turn failed"),
        }
        metrics::counter!("anvil_turns_failed_total").increment(1);
        self.event_bus.publish_turn_event(TurnEvent::TurnFailed {
            turn_id,
            session,
            reason: error.to_string(),
            failed_at: Utc::now(),
        });
    }
}
