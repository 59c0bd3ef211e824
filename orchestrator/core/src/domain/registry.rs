// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Registry
//!
//! Static catalogue of modules, hardware profiles and validator checks.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Data-driven module/keyword table, hardware constants and check profiles
//!
//! The registry is a YAML document compiled once at startup. Adding a domain
//! means adding records, never code. The default document is embedded from
//! `assets/registry.yaml`; a deployment may point `spec.registry.path` at its
//! own file.
//!
//! Compilation rejects documents the rest of the system could not honour:
//! patterns that do not compile, a keyword claimed by two modules, a module
//! named `general`, a check scoped to an unknown module or board, and any
//! required construct whose own snippet would not satisfy its presence
//! pattern (such a fix would be re-applied on every pass).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use anvil_cortex::domain::{ModuleCatalog, GENERAL_TAG};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::keywords::{tokenize, KeywordSet};

/// Default registry document.
pub const DEFAULT_REGISTRY_YAML: &str = include_str!("../../assets/registry.yaml");

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to read registry {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse registry: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid pattern for '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("Duplicate registry entry: {0}")]
    Duplicate(String),

    #[error("'{0}' is reserved and cannot name a module")]
    ReservedName(String),

    #[error("'{0}' has no keywords")]
    NoKeywords(String),

    #[error("Keyword '{keyword}' is claimed by both '{first}' and '{second}'")]
    DuplicateKeyword {
        keyword: String,
        first: String,
        second: String,
    },

    #[error("Check profile applies to unknown scope '{0}'")]
    UnknownScope(String),

    #[error("Required construct '{0}' snippet does not satisfy its own presence pattern")]
    NotIdempotent(String),

    #[error("Constant check '{0}' has no `value` capture group")]
    MissingValueGroup(String),
}

// ============================================================================
// Document (serialized form)
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub modules: Vec<ModuleDocument>,
    #[serde(default)]
    pub hardware: Vec<HardwareDocument>,
    #[serde(default)]
    pub checks: Vec<CheckProfileDocument>,
    #[serde(default)]
    pub suggestions: Vec<SuggestionDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDocument {
    pub name: String,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub prompt_fragment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareDocument {
    pub name: String,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub constants: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckProfileDocument {
    pub applies_to: Vec<String>,
    #[serde(default)]
    pub required: Vec<RequiredDocument>,
    #[serde(default)]
    pub constants: Vec<ConstantDocument>,
    #[serde(default)]
    pub forbidden: Vec<ForbiddenDocument>,
    #[serde(default)]
    pub unrequested: Vec<UnrequestedDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredDocument {
    pub name: String,
    pub trigger: String,
    pub present: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    #[serde(default)]
    pub preamble: Vec<PreambleDocument>,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreambleDocument {
    pub text: String,
    pub unless: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstantDocument {
    pub name: String,
    pub pattern: String,
    pub expected: String,
    #[serde(default)]
    pub accepted: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForbiddenDocument {
    pub name: String,
    pub pattern: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnrequestedDocument {
    pub name: String,
    pub pattern: String,
    pub request_keywords: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionDocument {
    pub applies_to: Vec<String>,
    /// Modules whose presence in the request makes the suggestion moot.
    #[serde(default)]
    pub unless_requested: Vec<String>,
    /// Pattern whose presence in the artifact makes the suggestion moot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unless_present: Option<String>,
    pub message: String,
}

// ============================================================================
// Compiled registry
// ============================================================================

#[derive(Debug, Clone)]
pub struct ModuleSpec {
    pub name: String,
    pub keywords: Vec<String>,
    pub prompt_fragment: String,
    matcher: KeywordSet,
}

impl ModuleSpec {
    pub fn matcher(&self) -> &KeywordSet {
        &self.matcher
    }
}

#[derive(Debug, Clone)]
pub struct HardwareProfile {
    pub name: String,
    pub description: String,
    pub keywords: Vec<String>,
    /// Named constants rendered into prompts (`adc_max`, `serial_baud`, ...).
    pub constants: BTreeMap<String, String>,
    matcher: KeywordSet,
}

/// A construct that must be present whenever `trigger` matches.
#[derive(Debug, Clone)]
pub struct RequiredConstruct {
    pub name: String,
    pub trigger: Regex,
    pub present: Regex,
    /// Snippet goes on the line after the first anchor match.
    pub anchor: Option<Regex>,
    /// Declarations placed after the last `#include`, each only when absent.
    pub preamble: Vec<PreambleLine>,
    pub snippet: String,
}

#[derive(Debug, Clone)]
pub struct PreambleLine {
    pub text: String,
    pub unless: Regex,
}

/// A literal whose value is checked; the `value` group is what gets replaced.
#[derive(Debug, Clone)]
pub struct ConstantCheck {
    pub name: String,
    pub pattern: Regex,
    pub expected: String,
    pub accepted: Vec<String>,
    pub max: Option<f64>,
}

impl ConstantCheck {
    pub fn is_violation(&self, value: &str) -> bool {
        if value == self.expected || self.accepted.iter().any(|a| a == value) {
            return false;
        }
        match self.max {
            Some(max) => value
                .trim_end_matches(['f', 'F'])
                .parse::<f64>()
                .map(|v| v > max)
                .unwrap_or(false),
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForbiddenConstruct {
    pub name: String,
    pub pattern: Regex,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct UnrequestedConstruct {
    pub name: String,
    pub pattern: Regex,
    pub request_keywords: KeywordSet,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct CheckProfile {
    /// Module names, hardware profile names or `general`.
    pub applies_to: Vec<String>,
    pub required: Vec<RequiredConstruct>,
    pub constants: Vec<ConstantCheck>,
    pub forbidden: Vec<ForbiddenConstruct>,
    pub unrequested: Vec<UnrequestedConstruct>,
}

impl CheckProfile {
    pub fn applies(&self, domain_tags: &[String], hardware: Option<&str>) -> bool {
        self.applies_to.iter().any(|scope| {
            scope == GENERAL_TAG
                || domain_tags.iter().any(|t| t == scope)
                || hardware == Some(scope.as_str())
        })
    }
}

/// Follow-up offered after a turn that requested one of `applies_to`.
#[derive(Debug, Clone)]
pub struct Suggestion {
    pub applies_to: Vec<String>,
    pub unless_requested: Vec<String>,
    pub unless_present: Option<Regex>,
    pub message: String,
}

impl Suggestion {
    pub fn fires(&self, requested: &[String], artifact: &str) -> bool {
        self.applies_to.iter().any(|m| requested.contains(m))
            && !self.unless_requested.iter().any(|m| requested.contains(m))
            && !self.unless_present.as_ref().is_some_and(|p| p.is_match(artifact))
    }
}

#[derive(Debug, Clone)]
pub struct Registry {
    modules: Vec<ModuleSpec>,
    hardware: Vec<HardwareProfile>,
    checks: Vec<CheckProfile>,
    suggestions: Vec<Suggestion>,
}

fn compile(name: &str, pattern: &str) -> Result<Regex, RegistryError> {
    Regex::new(pattern).map_err(|source| RegistryError::InvalidPattern {
        name: name.to_string(),
        source,
    })
}

impl Registry {
    /// The embedded default registry.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_yaml_str(DEFAULT_REGISTRY_YAML)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, RegistryError> {
        let document: RegistryDocument = serde_yaml::from_str(yaml)?;
        Self::from_document(document)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_document(document: RegistryDocument) -> Result<Self, RegistryError> {
        let mut names = HashSet::new();
        let mut keyword_owner: HashMap<String, String> = HashMap::new();
        let mut modules = Vec::with_capacity(document.modules.len());

        for module in document.modules {
            if module.name == GENERAL_TAG {
                return Err(RegistryError::ReservedName(module.name));
            }
            if !names.insert(module.name.clone()) {
                return Err(RegistryError::Duplicate(module.name));
            }
            let matcher = KeywordSet::new(&module.keywords);
            if matcher.is_empty() {
                return Err(RegistryError::NoKeywords(module.name));
            }
            for phrase in matcher.phrases() {
                if let Some(first) = keyword_owner.get(&phrase) {
                    if first != &module.name {
                        return Err(RegistryError::DuplicateKeyword {
                            keyword: phrase,
                            first: first.clone(),
                            second: module.name,
                        });
                    }
                }
                keyword_owner.insert(phrase, module.name.clone());
            }
            modules.push(ModuleSpec {
                name: module.name,
                keywords: module.keywords,
                prompt_fragment: module.prompt_fragment.trim().to_string(),
                matcher,
            });
        }

        let mut hardware = Vec::with_capacity(document.hardware.len());
        for profile in document.hardware {
            if profile.name == GENERAL_TAG {
                return Err(RegistryError::ReservedName(profile.name));
            }
            if !names.insert(profile.name.clone()) {
                return Err(RegistryError::Duplicate(profile.name));
            }
            let matcher = KeywordSet::new(&profile.keywords);
            if matcher.is_empty() {
                return Err(RegistryError::NoKeywords(profile.name));
            }
            hardware.push(HardwareProfile {
                name: profile.name,
                description: profile.description,
                keywords: profile.keywords,
                constants: profile.constants,
                matcher,
            });
        }

        let checks = document
            .checks
            .into_iter()
            .map(|check| Self::compile_profile(check, &names))
            .collect::<Result<Vec<_>, _>>()?;

        let suggestions = document
            .suggestions
            .into_iter()
            .map(|doc| Self::compile_suggestion(doc, &modules))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            modules,
            hardware,
            checks,
            suggestions,
        })
    }

    fn compile_suggestion(doc: SuggestionDocument, modules: &[ModuleSpec]) -> Result<Suggestion, RegistryError> {
        for scope in doc.applies_to.iter().chain(&doc.unless_requested) {
            if !modules.iter().any(|m| &m.name == scope) {
                return Err(RegistryError::UnknownScope(scope.clone()));
            }
        }
        let unless_present = doc
            .unless_present
            .as_deref()
            .map(|pattern| compile(&doc.message, pattern))
            .transpose()?;
        Ok(Suggestion {
            applies_to: doc.applies_to,
            unless_requested: doc.unless_requested,
            unless_present,
            message: doc.message,
        })
    }

    fn compile_profile(
        doc: CheckProfileDocument,
        names: &HashSet<String>,
    ) -> Result<CheckProfile, RegistryError> {
        for scope in &doc.applies_to {
            if scope != GENERAL_TAG && !names.contains(scope) {
                return Err(RegistryError::UnknownScope(scope.clone()));
            }
        }

        let mut required = Vec::with_capacity(doc.required.len());
        for r in doc.required {
            let preamble = r
                .preamble
                .into_iter()
                .map(|line| {
                    Ok(PreambleLine {
                        unless: compile(&r.name, &line.unless)?,
                        text: line.text,
                    })
                })
                .collect::<Result<Vec<_>, RegistryError>>()?;
            let construct = RequiredConstruct {
                trigger: compile(&r.name, &r.trigger)?,
                present: compile(&r.name, &r.present)?,
                anchor: r.anchor.as_deref().map(|a| compile(&r.name, a)).transpose()?,
                preamble,
                snippet: r.snippet,
                name: r.name,
            };

            if !construct.present.is_match(&construct.snippet)
                || construct.preamble.iter().any(|p| !p.unless.is_match(&p.text))
            {
                return Err(RegistryError::NotIdempotent(construct.name));
            }
            required.push(construct);
        }

        let constants = doc
            .constants
            .into_iter()
            .map(|c| {
                let pattern = compile(&c.name, &c.pattern)?;
                if !pattern.capture_names().flatten().any(|n| n == "value") {
                    return Err(RegistryError::MissingValueGroup(c.name));
                }
                Ok(ConstantCheck {
                    name: c.name,
                    pattern,
                    expected: c.expected,
                    accepted: c.accepted,
                    max: c.max,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let forbidden = doc
            .forbidden
            .into_iter()
            .map(|f| {
                Ok(ForbiddenConstruct {
                    pattern: compile(&f.name, &f.pattern)?,
                    name: f.name,
                    message: f.message,
                })
            })
            .collect::<Result<Vec<_>, RegistryError>>()?;

        let unrequested = doc
            .unrequested
            .into_iter()
            .map(|u| {
                Ok(UnrequestedConstruct {
                    pattern: compile(&u.name, &u.pattern)?,
                    request_keywords: KeywordSet::new(&u.request_keywords),
                    name: u.name,
                    message: u.message,
                })
            })
            .collect::<Result<Vec<_>, RegistryError>>()?;

        Ok(CheckProfile {
            applies_to: doc.applies_to,
            required,
            constants,
            forbidden,
            unrequested,
        })
    }

    pub fn modules(&self) -> &[ModuleSpec] {
        &self.modules
    }

    pub fn module(&self, name: &str) -> Option<&ModuleSpec> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn hardware_profiles(&self) -> &[HardwareProfile] {
        &self.hardware
    }

    pub fn hardware(&self, name: &str) -> Option<&HardwareProfile> {
        self.hardware.iter().find(|h| h.name == name)
    }

    pub fn checks(&self) -> &[CheckProfile] {
        &self.checks
    }

    /// Check profiles in scope for the given tags and board.
    pub fn checks_for<'a>(
        &'a self,
        domain_tags: &'a [String],
        hardware: Option<&'a str>,
    ) -> impl Iterator<Item = &'a CheckProfile> + 'a {
        self.checks
            .iter()
            .filter(move |c| c.applies(domain_tags, hardware))
    }

    /// Messages of the suggestions that fire for a turn, in registry order.
    pub fn suggestions_for(&self, requested: &[String], artifact: &str) -> Vec<String> {
        self.suggestions
            .iter()
            .filter(|s| s.fires(requested, artifact))
            .map(|s| s.message.clone())
            .collect()
    }

    /// Modules mentioned in `tokens`, deduplicated, in order of first mention.
    pub fn detect_modules_in(&self, tokens: &[String]) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for index in 0..tokens.len() {
            for module in &self.modules {
                if module.matcher.matches_at(tokens, index) && !found.contains(&module.name) {
                    found.push(module.name.clone());
                }
            }
        }
        found
    }

    pub fn detect_modules(&self, text: &str) -> Vec<String> {
        self.detect_modules_in(&tokenize(text))
    }

    /// The board mentioned earliest in `text`.
    pub fn detect_hardware(&self, text: &str) -> Option<&HardwareProfile> {
        let tokens = tokenize(text);
        self.hardware
            .iter()
            .filter_map(|h| h.matcher.first_match(&tokens).map(|i| (i, h)))
            .min_by_key(|(i, _)| *i)
            .map(|(_, h)| h)
    }
}

impl ModuleCatalog for Registry {
    fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name.clone()).collect()
    }

    fn first_module_in(&self, text: &str) -> Option<String> {
        let tokens = tokenize(text);
        self.modules
            .iter()
            .find(|m| m.matcher.matches(&tokens))
            .map(|m| m.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(modules: &str, checks: &str) -> String {
        format!("modules:\n{modules}\nhardware: []\nchecks:\n{checks}\n")
    }

    #[test]
    fn test_builtin_registry_loads() {
        let registry = Registry::builtin().unwrap();
        assert_eq!(
            registry.module_names(),
            vec!["ble", "servo", "motor", "battery", "sensor", "adc", "led", "button", "weapon"]
        );
        assert!(registry.module("safety").is_none());
        assert!(registry.hardware("esp32-c3").is_some());
        assert!(!registry.checks().is_empty());
    }

    #[test]
    fn test_detection_follows_mention_order() {
        let registry = Registry::builtin().unwrap();
        let modules =
            registry.detect_modules("Generate motor, servo, and battery code with safety timeout");
        assert_eq!(modules, vec!["motor", "servo", "battery"]);

        let repeated = registry.detect_modules("servo arm, then the motors, then the servo again");
        assert_eq!(repeated, vec!["servo", "motor"]);
    }

    #[test]
    fn test_first_module_uses_registry_order() {
        let registry = Registry::builtin().unwrap();
        assert_eq!(
            registry.first_module_in("ADC is 12-bit, must use 4095 not 1023"),
            Some("adc".to_string())
        );
        assert_eq!(registry.first_module_in("keep loop() short"), None);
    }

    #[test]
    fn test_hardware_detection_prefers_earliest_mention() {
        let registry = Registry::builtin().unwrap();
        let hw = registry.detect_hardware("port this Arduino Uno sketch to the ESP32-C3").unwrap();
        assert_eq!(hw.name, "arduino-uno");
        assert!(registry.detect_hardware("blink an led").is_none());
    }

    #[test]
    fn test_checks_scope_by_tag_and_board() {
        let registry = Registry::builtin().unwrap();
        let motor = vec!["motor".to_string()];
        let none: Vec<String> = vec![];

        let scoped_motor = registry.checks_for(&motor, None).count();
        let scoped_none = registry.checks_for(&none, None).count();
        let scoped_board = registry.checks_for(&none, Some("esp32-c3")).count();

        assert_eq!(scoped_none, 1);
        assert_eq!(scoped_motor, 2);
        assert_eq!(scoped_board, 2);
    }

    #[test]
    fn test_suggestions_follow_request_and_artifact() {
        let registry = Registry::builtin().unwrap();
        let motor = vec!["motor".to_string()];
        let with_battery = vec!["motor".to_string(), "battery".to_string()];

        let plain = registry.suggestions_for(&motor, "void loop() {\n  analogWrite(ENA, 255);\n}");
        assert!(plain.iter().any(|s| s.contains("battery")));
        assert!(plain.iter().any(|s| s.contains("ramp")));

        let covered = registry.suggestions_for(&with_battery, "int speed = rampTo(target);");
        assert!(!covered.iter().any(|s| s.contains("battery")));
        assert!(!covered.iter().any(|s| s.contains("ramp")));

        assert!(registry.suggestions_for(&[], "code").is_empty());
    }

    #[test]
    fn test_rejects_suggestion_for_unknown_module() {
        let yaml = format!(
            "{}suggestions:\n  - {{applies_to: [a], unless_requested: [nope], message: m}}\n",
            minimal("  - {name: a, keywords: [x]}", "  []")
        );
        assert!(matches!(
            Registry::from_yaml_str(&yaml),
            Err(RegistryError::UnknownScope(_))
        ));
    }

    #[test]
    fn test_constant_violation_rules() {
        let check = ConstantCheck {
            name: "t".into(),
            pattern: Regex::new(r"T=(?P<value>\d+)").unwrap(),
            expected: "5000".into(),
            accepted: vec![],
            max: Some(5000.0),
        };
        assert!(!check.is_violation("3000"));
        assert!(!check.is_violation("5000"));
        assert!(check.is_violation("8000"));
    }

    #[test]
    fn test_rejects_duplicate_keywords() {
        let yaml = minimal(
            "  - {name: a, keywords: [arm]}\n  - {name: b, keywords: [Arms]}",
            "  []",
        );
        assert!(matches!(
            Registry::from_yaml_str(&yaml),
            Err(RegistryError::DuplicateKeyword { .. })
        ));
    }

    #[test]
    fn test_rejects_reserved_and_unknown_scopes() {
        let reserved = minimal("  - {name: general, keywords: [x]}", "  []");
        assert!(matches!(
            Registry::from_yaml_str(&reserved),
            Err(RegistryError::ReservedName(_))
        ));

        let unknown = minimal("  - {name: a, keywords: [x]}", "  - applies_to: [nope]");
        assert!(matches!(
            Registry::from_yaml_str(&unknown),
            Err(RegistryError::UnknownScope(_))
        ));
    }

    #[test]
    fn test_rejects_bad_patterns_and_non_idempotent_constructs() {
        let bad = minimal(
            "  - {name: a, keywords: [x]}",
            "  - applies_to: [a]\n    forbidden:\n      - {name: f, pattern: '(', message: m}",
        );
        assert!(matches!(
            Registry::from_yaml_str(&bad),
            Err(RegistryError::InvalidPattern { .. })
        ));

        let looping = minimal(
            "  - {name: a, keywords: [x]}",
            "  - applies_to: [a]\n    required:\n      - {name: r, trigger: 'go', present: 'guard', snippet: 'nothing'}",
        );
        assert!(matches!(
            Registry::from_yaml_str(&looping),
            Err(RegistryError::NotIdempotent(_))
        ));

        let no_group = minimal(
            "  - {name: a, keywords: [x]}",
            "  - applies_to: [a]\n    constants:\n      - {name: c, pattern: '\\d+', expected: '1'}",
        );
        assert!(matches!(
            Registry::from_yaml_str(&no_group),
            Err(RegistryError::MissingValueGroup(_))
        ));
    }
}
