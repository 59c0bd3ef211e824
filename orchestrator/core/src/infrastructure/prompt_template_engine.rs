// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Prompt Template Engine
//!
//! This module renders augmented generation prompts using Handlebars.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Turn a request, its rules and its hardware context into final prompts
//! - **Integration:** Router decision + Rule Retrieval → LLM input
//!
//! # Templates
//!
//! - [`BASE_TEMPLATE`] - single-call prompt (FAST and BALANCED)
//! - [`MODULE_TEMPLATE`] - one module of a MODULAR build
//! - [`INTEGRATION_TEMPLATE`] - merge call of a MODULAR build
//!
//! HTML escaping is disabled: the user's request and rule texts are inserted
//! byte-for-byte. Rules render numbered from 1, one per line, after the
//! instruction block and before the request.
//!
//! # Usage
//!
//! ```ignore
//! let engine = PromptTemplateEngine::new();
//! let context = PromptContext::new("Generate servo code")
//!     .modules(vec![ModuleContext::new("servo", "Servo control...")])
//!     .rules(vec!["Serial should run at 115200 baud".into()]);
//! let prompt = engine.render_base(&context)?;
//! ```

use std::collections::HashMap;

use anyhow::{Context, Result};
use handlebars::{handlebars_helper, Handlebars};
use serde::{Deserialize, Serialize};

use crate::domain::registry::{HardwareProfile, ModuleSpec};

pub const BASE_TEMPLATE: &str = "You are an expert embedded developer.
{{#if hardware}}
TARGET HARDWARE: {{hardware.description}}
{{#each hardware.constants}}
- {{name}}: {{value}}
{{/each}}
{{/if}}
ACTIVE MODULES: {{#if modules}}{{#each modules}}{{name}}{{#unless @last}}, {{/unless}}{{/each}}{{else}}none (logic only){{/if}}
{{#each modules}}
- {{fragment}}
{{/each}}
{{#if excluded_modules}}
STRICT NEGATIVE CONSTRAINTS:
{{#each excluded_modules}}
- Do NOT add {{this}} code unless explicitly requested.
{{/each}}
{{/if}}
{{#if rules}}
CRITICAL RULES (MUST FOLLOW):
{{#each rules}}
{{inc @index}}. {{this}}
{{/each}}
{{/if}}

USER REQUEST:
{{request}}

Generate code following ALL rules above. Do not add unrequested features.
";

pub const MODULE_TEMPLATE: &str = "You are an expert embedded developer generating ONE module of a larger firmware.
{{#if hardware}}
TARGET HARDWARE: {{hardware.description}}
{{#each hardware.constants}}
- {{name}}: {{value}}
{{/each}}
{{/if}}
MODULE: {{module.name}}
TASK: {{module.fragment}}
{{#if rules}}
RULES (MUST FOLLOW):
{{#each rules}}
{{inc @index}}. {{this}}
{{/each}}
{{/if}}

ORIGINAL USER REQUEST (context only):
{{request}}

Generate only the {{module.name}} module. Keep it modular with clear comments.
";

pub const INTEGRATION_TEMPLATE: &str = "INTEGRATION TASK: Combine the modules below into one cohesive sketch with a single setup() and a single loop().
{{#if hardware}}
TARGET HARDWARE: {{hardware.description}}
{{/if}}
{{#each sections}}

[MODULE: {{module}}]
{{code}}
[END MODULE: {{module}}]
{{/each}}
{{#if rules}}

RULES (MUST FOLLOW):
{{#each rules}}
{{inc @index}}. {{this}}
{{/each}}
{{/if}}

USER REQUEST:
{{request}}

Keep the behaviour of every module. Do not add unrequested features.
";

// ============================================================================
// Template Context
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConstantContext {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HardwareContext {
    pub name: String,
    pub description: String,
    pub constants: Vec<ConstantContext>,
}

impl From<&HardwareProfile> for HardwareContext {
    fn from(profile: &HardwareProfile) -> Self {
        Self {
            name: profile.name.clone(),
            description: profile.description.clone(),
            constants: profile
                .constants
                .iter()
                .map(|(name, value)| ConstantContext {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleContext {
    pub name: String,
    pub fragment: String,
}

impl ModuleContext {
    pub fn new(name: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fragment: fragment.into(),
        }
    }
}

impl From<&ModuleSpec> for ModuleContext {
    fn from(spec: &ModuleSpec) -> Self {
        Self::new(spec.name.clone(), spec.prompt_fragment.replace('\n', " "))
    }
}

/// One generated module handed to the integration call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SectionContext {
    pub module: String,
    pub code: String,
}

/// Context data for prompt template rendering
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptContext {
    /// The user's literal request
    pub request: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware: Option<HardwareContext>,

    /// Requested modules (base prompt)
    pub modules: Vec<ModuleContext>,

    /// Known modules that were not requested; rendered as negative constraints
    pub excluded_modules: Vec<String>,

    /// The module being generated (module prompt)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<ModuleContext>,

    /// Generated modules (integration prompt)
    pub sections: Vec<SectionContext>,

    /// Rule texts, one per line
    pub rules: Vec<String>,

    /// Additional custom fields
    #[serde(flatten)]
    pub extras: HashMap<String, serde_json::Value>,
}

impl PromptContext {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            ..Self::default()
        }
    }

    pub fn hardware(mut self, hardware: Option<HardwareContext>) -> Self {
        self.hardware = hardware;
        self
    }

    pub fn modules(mut self, modules: Vec<ModuleContext>) -> Self {
        self.modules = modules;
        self
    }

    pub fn excluded_modules(mut self, excluded: Vec<String>) -> Self {
        self.excluded_modules = excluded;
        self
    }

    pub fn module(mut self, module: ModuleContext) -> Self {
        self.module = Some(module);
        self
    }

    pub fn sections(mut self, sections: Vec<SectionContext>) -> Self {
        self.sections = sections;
        self
    }

    /// Rule texts; embedded line breaks are folded so each rule stays on one line.
    pub fn rules(mut self, rules: Vec<String>) -> Self {
        self.rules = rules
            .into_iter()
            .map(|r| r.lines().map(str::trim).filter(|l| !l.is_empty()).collect::<Vec<_>>().join(" "))
            .collect();
        self
    }

    /// Add extra field
    pub fn extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }
}

// ============================================================================
// Template Engine
// ============================================================================

handlebars_helper!(inc: |index: u64| index + 1);

pub struct PromptTemplateEngine {
    handlebars: Handlebars<'static>,
}

impl PromptTemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_helper("inc", Box::new(inc));
        Self { handlebars }
    }

    pub fn render(&self, template: &str, context: &PromptContext) -> Result<String> {
        self.handlebars
            .render_template(template, context)
            .context("Failed to render prompt template")
    }

    pub fn render_base(&self, context: &PromptContext) -> Result<String> {
        self.render(BASE_TEMPLATE, context)
    }

    pub fn render_module(&self, context: &PromptContext) -> Result<String> {
        self.render(MODULE_TEMPLATE, context)
    }

    pub fn render_integration(&self, context: &PromptContext) -> Result<String> {
        self.render(INTEGRATION_TEMPLATE, context)
    }

    /// Validate template syntax without rendering
    pub fn validate_template(&self, template: &str) -> Result<()> {
        handlebars::template::Template::compile(template)
            .map(|_| ())
            .context("Invalid Handlebars template syntax")
    }
}

impl Default for PromptTemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
