// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Modular Decomposition Builder
//!
//! Builds a MODULAR request as one generation call per detected module plus a
//! final integration call.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Fan out module calls, merge their outputs deterministically
//! - **Integration:** Router decision → module calls → integration call → Validator
//!
//! # Protocol
//!
//! 1. Each module gets its own prompt: the module's prompt fragment, the
//!    hardware context and the top rules tagged with that module.
//! 2. Module calls run concurrently on a bounded worker pool; each call has
//!    its own timeout and retry budget through [`PolicyInference`]. A module
//!    that exhausts its attempts becomes a critique, it never aborts siblings.
//! 3. Outputs are kept in detection order regardless of completion order.
//!    Constant/definition lines repeated across modules are dropped after
//!    their first occurrence, with one critique per dropped line.
//! 4. An integration call merges the sections. If it fails, the sections are
//!    returned unmerged with a critique saying so.
//!
//! Only two conditions are fatal: every module failed, or the caller cancelled.

use std::collections::HashMap;
use std::sync::Arc;

use anvil_cortex::application::RuleRetrieval;
use anvil_cortex::domain::{Rule, RuleId, RuleNamespace};
use anvil_cortex::infrastructure::RepositoryError;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::inference::{CallFailure, PolicyInference};
use crate::domain::events::TurnEvent;
use crate::domain::llm::{GenerationOptions, GenerationResponse, LLMError};
use crate::domain::registry::{HardwareProfile, Registry};
use crate::domain::turn::TurnId;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::prompt_template_engine::{
    HardwareContext, ModuleContext, PromptContext, PromptTemplateEngine, SectionContext,
};

pub const DEFAULT_MODULE_RULE_LIMIT: usize = 10;

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[\w+#-]*[ \t]*\n(.*?)```").expect("static regex"));

static DEFINE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*#define\s+([A-Za-z_]\w*)").expect("static regex"));

// `const int X = 1;`, `static constexpr float X[] = {..}`, `const X: u32 = 1;`
static CONST_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:pub\s+)?(?:static\s+)?(?:const|constexpr)\b[^=;(]*?\b([A-Za-z_]\w*)\s*(?:\[[^\]]*\])?\s*(?:=|:[^:])")
        .expect("static regex")
});

/// Everything one MODULAR build needs from the turn.
#[derive(Debug, Clone)]
pub struct BuildPlan<'a> {
    pub turn_id: TurnId,
    pub namespace: RuleNamespace,
    pub request: &'a str,
    /// Modules in detection order.
    pub modules: &'a [String],
    pub hardware: Option<&'a HardwareProfile>,
    /// Rules selected for the whole turn; injected into the integration call.
    pub turn_rules: &'a [Rule],
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutput {
    pub artifact: String,
    pub critiques: Vec<String>,
    /// Modules whose call succeeded, in detection order.
    pub modules_built: Vec<String>,
    /// Every rule injected into any prompt of the build, first use first.
    pub rule_ids: Vec<RuleId>,
    /// False when the integration call failed and the sections were concatenated.
    pub integrated: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no modules to build")]
    NoModules,

    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("every module failed: {}", .failures.join("; "))]
    AllModulesFailed { failures: Vec<String> },

    #[error("build cancelled")]
    Cancelled,

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("prompt rendering failed: {0}")]
    Prompt(String),
}

/// A module output that survived its call.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    module: String,
    code: String,
}

pub struct ModularBuilder {
    registry: Arc<Registry>,
    inference: PolicyInference,
    retrieval: Arc<RuleRetrieval>,
    templates: Arc<PromptTemplateEngine>,
    event_bus: Arc<EventBus>,
    model_alias: String,
    options: GenerationOptions,
    max_concurrency: usize,
    module_rule_limit: usize,
}

impl ModularBuilder {
    pub fn new(
        registry: Arc<Registry>,
        inference: PolicyInference,
        retrieval: Arc<RuleRetrieval>,
        templates: Arc<PromptTemplateEngine>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            inference,
            retrieval,
            templates,
            event_bus,
            model_alias: "balanced".to_string(),
            options: GenerationOptions::default(),
            max_concurrency: 3,
            module_rule_limit: DEFAULT_MODULE_RULE_LIMIT,
        }
    }

    pub fn with_model_alias(mut self, alias: impl Into<String>) -> Self {
        self.model_alias = alias.into();
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_module_rule_limit(mut self, limit: usize) -> Self {
        self.module_rule_limit = limit;
        self
    }

    pub async fn build(
        &self,
        plan: &BuildPlan<'_>,
        cancel: &CancellationToken,
    ) -> Result<BuildOutput, BuildError> {
        let modules = unique_in_order(plan.modules);
        if modules.is_empty() {
            return Err(BuildError::NoModules);
        }

        let hardware = plan.hardware.map(HardwareContext::from);
        let mut rule_ids: Vec<RuleId> = Vec::new();
        let mut prompts = Vec::with_capacity(modules.len());

        for name in &modules {
            let spec = self
                .registry
                .module(name)
                .ok_or_else(|| BuildError::UnknownModule(name.clone()))?;
            let rules = self
                .retrieval
                .select(plan.namespace, std::slice::from_ref(name), Some(self.module_rule_limit))
                .await?;
            extend_ids(&mut rule_ids, &rules);

            let context = PromptContext::new(plan.request)
                .hardware(hardware.clone())
                .module(ModuleContext::from(spec))
                .rules(rules.iter().map(|r| r.text.clone()).collect());
            let prompt = self
                .templates
                .render_module(&context)
                .map_err(|e| BuildError::Prompt(format!("{e:#}")))?;
            prompts.push((name.clone(), prompt));
        }

        info!(
            turn_id = %plan.turn_id,
            modules = ?modules,
            max_concurrency = self.max_concurrency,
            "Starting modular build"
        );

        let results = self.run_module_calls(&prompts, cancel).await;
        if cancel.is_cancelled() || results.iter().any(|(_, r)| matches!(r, Err(f) if f.is_cancelled())) {
            return Err(BuildError::Cancelled);
        }

        let mut sections = Vec::with_capacity(results.len());
        let mut critiques = Vec::new();
        let mut failures = Vec::new();

        for (module, result) in results {
            match result {
                Ok(response) => sections.push(Section {
                    code: extract_code(&response.text),
                    module,
                }),
                Err(failure) => {
                    warn!(
                        turn_id = %plan.turn_id,
                        module = %module,
                        attempts = failure.attempts,
                        error = %failure.error,
                        "Module generation failed"
                    );
                    metrics::counter!("anvil_modules_failed_total").increment(1);
                    self.event_bus.publish_turn_event(TurnEvent::ModuleFailed {
                        turn_id: plan.turn_id,
                        module: module.clone(),
                        attempts: failure.attempts,
                        error: failure.error.to_string(),
                        failed_at: Utc::now(),
                    });
                    critiques.push(format!("module {module} failed - integrate manually"));
                    failures.push(format!("{module}: {}", failure.error));
                }
            }
        }

        if sections.is_empty() {
            return Err(BuildError::AllModulesFailed { failures });
        }

        critiques.extend(drop_duplicate_definitions(&mut sections));
        let modules_built: Vec<String> = sections.iter().map(|s| s.module.clone()).collect();
        extend_ids(&mut rule_ids, plan.turn_rules);

        let context = PromptContext::new(plan.request)
            .hardware(hardware)
            .sections(
                sections
                    .iter()
                    .map(|s| SectionContext {
                        module: s.module.clone(),
                        code: s.code.clone(),
                    })
                    .collect(),
            )
            .rules(plan.turn_rules.iter().map(|r| r.text.clone()).collect());
        let prompt = self
            .templates
            .render_integration(&context)
            .map_err(|e| BuildError::Prompt(format!("{e:#}")))?;

        let (artifact, integrated) = match self
            .inference
            .generate(&self.model_alias, &prompt, &self.options, cancel)
            .await
        {
            Ok(response) => (extract_code(&response.text), true),
            Err(failure) if failure.is_cancelled() => return Err(BuildError::Cancelled),
            Err(failure) => {
                warn!(turn_id = %plan.turn_id, error = %failure, "Integration call failed");
                critiques.push(format!(
                    "integration failed ({}); module outputs are returned unmerged",
                    failure.error
                ));
                (concatenate(&sections), false)
            }
        };

        debug!(
            turn_id = %plan.turn_id,
            built = modules_built.len(),
            integrated,
            critiques = critiques.len(),
            "Modular build finished"
        );

        Ok(BuildOutput {
            artifact,
            critiques,
            modules_built,
            rule_ids,
            integrated,
        })
    }

    /// One call per module, at most `max_concurrency` in flight, results in
    /// input order.
    async fn run_module_calls(
        &self,
        prompts: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Vec<(String, Result<GenerationResponse, CallFailure>)> {
        let pool = Semaphore::new(self.max_concurrency);

        let calls = prompts.iter().map(|(module, prompt)| {
            let pool = &pool;
            async move {
                let result = match pool.acquire().await {
                    Ok(_permit) => {
                        debug!(module = %module, "Generating module");
                        self.inference
                            .generate(&self.model_alias, prompt, &self.options, cancel)
                            .await
                    }
                    Err(_) => Err(CallFailure {
                        error: LLMError::Unavailable("module worker pool closed".to_string()),
                        attempts: 0,
                    }),
                };
                (module.clone(), result)
            }
        });

        futures::future::join_all(calls).await
    }
}

fn unique_in_order(modules: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(modules.len());
    for module in modules {
        if !unique.contains(module) {
            unique.push(module.clone());
        }
    }
    unique
}

fn extend_ids(ids: &mut Vec<RuleId>, rules: &[Rule]) {
    for rule in rules {
        if !ids.contains(&rule.id) {
            ids.push(rule.id);
        }
    }
}

/// Body of the fenced code blocks in a completion, or the whole completion
/// when it has none.
pub fn extract_code(text: &str) -> String {
    let blocks: Vec<&str> = CODE_FENCE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_end())
        .collect();
    if blocks.is_empty() {
        text.trim().to_string()
    } else {
        blocks.join("\n\n")
    }
}

/// Name defined by a `#define` or constant declaration line.
fn defined_name(line: &str) -> Option<&str> {
    DEFINE_LINE
        .captures(line)
        .or_else(|| CONST_LINE.captures(line))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Drop definitions already made by an earlier module. Returns one critique
/// per dropped line.
fn drop_duplicate_definitions(sections: &mut [Section]) -> Vec<String> {
    let mut owners: HashMap<String, String> = HashMap::new();
    let mut critiques = Vec::new();

    for section in sections.iter_mut() {
        let mut defined_here: Vec<String> = Vec::new();
        let mut kept: Vec<&str> = Vec::new();

        for line in section.code.lines() {
            let Some(name) = defined_name(line) else {
                kept.push(line);
                continue;
            };
            match owners.get(name) {
                Some(owner) => critiques.push(format!(
                    "dropped duplicate definition of {name} from module {} (first defined in module {owner})",
                    section.module
                )),
                None => {
                    if !defined_here.iter().any(|n| n == name) {
                        defined_here.push(name.to_string());
                    }
                    kept.push(line);
                }
            }
        }

        let code = kept.join("\n");
        for name in defined_here {
            owners.insert(name, section.module.clone());
        }
        section.code = code;
    }

    critiques
}

fn concatenate(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| format!("// ===== MODULE: {} =====\n{}\n", s.module, s.code))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::inference::CallPolicy;
    use crate::domain::llm::{InferenceEngine, TokenStream};
    use anvil_cortex::application::EventBus as CortexEventBus;
    use anvil_cortex::domain::{RuleCategory, SessionId};
    use anvil_cortex::infrastructure::{InMemoryRuleRepository, RuleRepository};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Answers by prompt shape: module prompts are keyed by module name.
    struct ByModule {
        outputs: HashMap<String, Result<String, LLMError>>,
        integration: Result<String, LLMError>,
        prompts: Mutex<Vec<String>>,
    }

    impl ByModule {
        fn new(outputs: Vec<(&str, Result<String, LLMError>)>, integration: Result<String, LLMError>) -> Arc<Self> {
            Arc::new(Self {
                outputs: outputs.into_iter().map(|(m, r)| (m.to_string(), r)).collect(),
                integration,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl InferenceEngine for ByModule {
        async fn generate(
            &self,
            model_alias: &str,
            prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<GenerationResponse, LLMError> {
            self.prompts.lock().push(prompt.to_string());
            let result = if prompt.starts_with("INTEGRATION TASK") {
                self.integration.clone()
            } else {
                let module = prompt
                    .lines()
                    .find_map(|l| l.strip_prefix("MODULE: "))
                    .unwrap_or_default();
                self.outputs
                    .get(module)
                    .cloned()
                    .unwrap_or_else(|| Err(LLMError::InvalidInput(module.to_string())))
            };
            result.map(|text| GenerationResponse::text_only(text, "test", model_alias))
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

    struct Fixture {
        builder: ModularBuilder,
        rules: Arc<InMemoryRuleRepository>,
        event_bus: Arc<EventBus>,
    }

    fn fixture(engine: Arc<dyn InferenceEngine>) -> Fixture {
        let rules = Arc::new(InMemoryRuleRepository::new());
        let event_bus = Arc::new(EventBus::new(64));
        let cortex_bus: Arc<dyn CortexEventBus> = event_bus.clone();
        let retrieval = Arc::new(RuleRetrieval::new(rules.clone(), cortex_bus));
        let policy = CallPolicy {
            timeout: Duration::from_secs(5),
            max_attempts: 2,
            backoff: Duration::from_millis(1),
        };
        let builder = ModularBuilder::new(
            Arc::new(Registry::builtin().unwrap()),
            PolicyInference::new(engine, policy),
            retrieval,
            Arc::new(PromptTemplateEngine::new()),
            event_bus.clone(),
        );
        Fixture {
            builder,
            rules,
            event_bus,
        }
    }

    fn modules(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn plan<'a>(namespace: RuleNamespace, request: &'a str, modules: &'a [String]) -> BuildPlan<'a> {
        BuildPlan {
            turn_id: TurnId::new(),
            namespace,
            request,
            modules,
            hardware: None,
            turn_rules: &[],
        }
    }

    #[tokio::test]
    async fn test_scenario_three_modules_and_integration() {
        let engine = ByModule::new(
            vec![
                ("motor", Ok("void setMotors(int l, int r) {}".into())),
                ("servo", Ok("void activateFlipper() {}".into())),
                ("battery", Ok("float readBattery() { return 0; }".into())),
            ],
            Ok("```cpp\nvoid setup() {}\nvoid loop() {}\n```".into()),
        );
        let fx = fixture(engine.clone());
        let names = modules(&["motor", "servo", "battery"]);
        let request = "Generate motor, servo, and battery code with safety timeout";

        let output = fx
            .builder
            .build(&plan(RuleNamespace::Shared, request, &names), &CancellationToken::new())
            .await
            .unwrap();

        assert!(output.critiques.is_empty(), "{:?}", output.critiques);
        assert!(output.integrated);
        assert_eq!(output.modules_built, names);
        assert_eq!(output.artifact, "void setup() {}\nvoid loop() {}");

        let prompts = engine.prompts.lock();
        assert_eq!(prompts.len(), 4);
        let integration = prompts.last().unwrap();
        let motor = integration.find("[MODULE: motor]").unwrap();
        let servo = integration.find("[MODULE: servo]").unwrap();
        let battery = integration.find("[MODULE: battery]").unwrap();
        assert!(motor < servo && servo < battery);
    }

    #[tokio::test]
    async fn test_failed_module_becomes_critique_and_event() {
        let engine = ByModule::new(
            vec![
                ("motor", Ok("void setMotors() {}".into())),
                ("servo", Err(LLMError::Network("reset".into()))),
            ],
            Ok("merged".into()),
        );
        let fx = fixture(engine.clone());
        let mut events = fx.event_bus.subscribe();
        let names = modules(&["motor", "servo"]);
        let build_plan = plan(RuleNamespace::Shared, "motor and servo", &names);

        let output = fx
            .builder
            .build(&build_plan, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.critiques, vec!["module servo failed - integrate manually"]);
        assert_eq!(output.modules_built, vec!["motor"]);
        assert_eq!(output.artifact, "merged");
        // motor once, servo twice (one retry), integration once
        assert_eq!(engine.prompts.lock().len(), 4);

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if let crate::infrastructure::event_bus::DomainEvent::Turn(TurnEvent::ModuleFailed {
                module,
                attempts,
                ..
            }) = event
            {
                assert_eq!(module, "servo");
                assert_eq!(attempts, 2);
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn test_all_modules_failing_is_fatal() {
        let engine = ByModule::new(
            vec![
                ("motor", Err(LLMError::Unavailable("down".into()))),
                ("led", Err(LLMError::Unavailable("down".into()))),
            ],
            Ok("unused".into()),
        );
        let fx = fixture(engine);
        let names = modules(&["motor", "led"]);

        let err = fx
            .builder
            .build(&plan(RuleNamespace::Shared, "motor and led", &names), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            BuildError::AllModulesFailed { failures } => assert_eq!(failures.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_failed_integration_returns_sections_unmerged() {
        let engine = ByModule::new(
            vec![("motor", Ok("motor code".into())), ("led", Ok("led code".into()))],
            Err(LLMError::Timeout(Duration::from_secs(1))),
        );
        let fx = fixture(engine);
        let names = modules(&["motor", "led"]);

        let output = fx
            .builder
            .build(&plan(RuleNamespace::Shared, "motor and led", &names), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!output.integrated);
        assert_eq!(output.critiques.len(), 1);
        assert!(output.critiques[0].starts_with("integration failed"));
        assert_eq!(
            output.artifact,
            "// ===== MODULE: motor =====\nmotor code\n\n// ===== MODULE: led =====\nled code\n"
        );
    }

    #[tokio::test]
    async fn test_duplicate_definitions_keep_first_occurrence() {
        let engine = ByModule::new(
            vec![
                ("motor", Ok("#define SAFETY_TIMEOUT 5000\nconst int ENA = 5;\nvoid drive() {}".into())),
                ("servo", Ok("#define SAFETY_TIMEOUT 3000\nconst int SERVO_PIN = 9;\nconst int ENA = 5;".into())),
            ],
            Ok("merged".into()),
        );
        let fx = fixture(engine.clone());
        let names = modules(&["motor", "servo"]);

        let output = fx
            .builder
            .build(&plan(RuleNamespace::Shared, "motor and servo", &names), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            output.critiques,
            vec![
                "dropped duplicate definition of SAFETY_TIMEOUT from module servo (first defined in module motor)",
                "dropped duplicate definition of ENA from module servo (first defined in module motor)",
            ]
        );
        let prompts = engine.prompts.lock();
        let integration = prompts.last().unwrap();
        assert!(integration.contains("#define SAFETY_TIMEOUT 5000"));
        assert!(!integration.contains("#define SAFETY_TIMEOUT 3000"));
        assert!(integration.contains("const int SERVO_PIN = 9;"));
    }

    #[tokio::test]
    async fn test_build_is_deterministic() {
        let outputs = || {
            vec![
                ("motor", Ok("const int A = 1;".to_string())),
                ("servo", Ok("const int A = 2;".to_string())),
                ("battery", Ok("const int B = 3;".to_string())),
            ]
        };
        let names = modules(&["motor", "servo", "battery"]);

        let first_engine = ByModule::new(outputs(), Ok("merged".into()));
        let second_engine = ByModule::new(outputs(), Ok("merged".into()));
        let first = fixture(first_engine.clone())
            .builder
            .build(&plan(RuleNamespace::Shared, "r", &names), &CancellationToken::new())
            .await
            .unwrap();
        let second = fixture(second_engine.clone())
            .builder
            .build(&plan(RuleNamespace::Shared, "r", &names), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(first.artifact, second.artifact);
        assert_eq!(first.critiques, second.critiques);
        assert_eq!(
            first_engine.prompts.lock().last(),
            second_engine.prompts.lock().last()
        );
    }

    #[tokio::test]
    async fn test_module_prompts_carry_module_rules() {
        let engine = ByModule::new(
            vec![("motor", Ok("m".into())), ("led", Ok("l".into()))],
            Ok("merged".into()),
        );
        let fx = fixture(engine.clone());
        let namespace = RuleNamespace::Session(SessionId::new());
        let motor_rule = Rule::new(namespace, "Stop motors after 5000 ms without a command", RuleCategory::Taught, "motor", 1.0);
        let led_rule = Rule::new(namespace, "Blink the status LED at 2 Hz", RuleCategory::Taught, "led", 1.0);
        fx.rules.insert(&motor_rule).await.unwrap();
        fx.rules.insert(&led_rule).await.unwrap();

        let names = modules(&["motor", "led"]);
        let output = fx
            .builder
            .build(&plan(namespace, "motor and led", &names), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.rule_ids, vec![motor_rule.id, led_rule.id]);
        let prompts = engine.prompts.lock();
        let motor_prompt = prompts.iter().find(|p| p.contains("MODULE: motor")).unwrap();
        assert!(motor_prompt.contains("Stop motors after 5000 ms"));
        assert!(!motor_prompt.contains("Blink the status LED"));
    }

    #[tokio::test]
    async fn test_cancelled_build_reports_cancellation() {
        struct Hang;

        #[async_trait]
        impl InferenceEngine for Hang {
            async fn generate(&self, _: &str, _: &str, _: &GenerationOptions) -> Result<GenerationResponse, LLMError> {
                futures::future::pending().await
            }

            async fn generate_stream(&self, _: &str, _: &str, _: &GenerationOptions) -> Result<TokenStream, LLMError> {
                futures::future::pending().await
            }
        }

        let fx = fixture(Arc::new(Hang));
        let names = modules(&["motor", "servo"]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = fx
            .builder
            .build(&plan(RuleNamespace::Shared, "motor and servo", &names), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Cancelled));
    }

    #[test]
    fn test_extract_code_prefers_fenced_blocks() {
        assert_eq!(extract_code("Here:\n```cpp\nint a = 1;\n```\nDone"), "int a = 1;");
        assert_eq!(extract_code("```\nA\n```\ntext\n```python\nB\n```"), "A\n\nB");
        assert_eq!(extract_code("  plain text  "), "plain text");
    }

    #[test]
    fn test_defined_name_recognises_common_forms() {
        assert_eq!(defined_name("#define LED_PIN 2"), Some("LED_PIN"));
        assert_eq!(defined_name("const int ENA = 5;"), Some("ENA"));
        assert_eq!(defined_name("static constexpr float GAINS[3] = {1, 2, 3};"), Some("GAINS"));
        assert_eq!(defined_name("pub const MAX_RPM: u32 = 300;"), Some("MAX_RPM"));
        assert_eq!(defined_name("const std::string NAME = \"x\";"), Some("NAME"));
        assert_eq!(defined_name("int speed = 5;"), None);
        assert_eq!(defined_name("void loop() {"), None);
    }

    #[test]
    fn test_unknown_module_is_rejected() {
        let fx = fixture(ByModule::new(vec![], Ok(String::new())));
        let names = modules(&["warp-drive"]);
        let err = tokio_test::block_on(
            fx.builder
                .build(&plan(RuleNamespace::Shared, "r", &names), &CancellationToken::new()),
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::UnknownModule(name) if name == "warp-drive"));
    }
}
