// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Code Validator & Auto-Fix
//!
//! Pattern-based post-processing of generated artifacts.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Apply the registry's check profiles to an artifact
//!
//! Passes run in a fixed order over raw text (no parsing):
//!
//! 1. Missing required constructs are inserted.
//! 2. Wrong constants are replaced, unless the request itself asks for the
//!    value found. Values inside `//` comments or longer literals are left alone.
//! 3. Forbidden and unrequested constructs are reported as critiques against
//!    the fixed text. They are never rewritten or removed.
//!
//! Running the validator on its own output applies no further fixes.

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info};

use crate::domain::keywords::tokenize;
use crate::domain::registry::{CheckProfile, ConstantCheck, Registry, RequiredConstruct};

/// What the validator knows about the turn that produced an artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationContext<'a> {
    pub domain_tags: &'a [String],
    pub hardware: Option<&'a str>,
    /// The user's request; empty disables unrequested-feature checks.
    pub request: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub artifact: String,
    pub applied_fixes: Vec<String>,
    pub critiques: Vec<String>,
}

pub struct CodeValidator {
    registry: Arc<Registry>,
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

/// Byte offset just past the line containing `at`.
fn end_of_line(text: &str, at: usize) -> usize {
    text[at..].find('\n').map(|i| at + i + 1).unwrap_or(text.len())
}

/// Insertion point for a snippet anchored at `anchor_end`: the next line, or
/// right after the anchor when code follows it on the same line.
fn after_anchor(text: &str, anchor_end: usize) -> usize {
    let line_end = end_of_line(text, anchor_end);
    if text[anchor_end..line_end].trim().is_empty() {
        line_end
    } else {
        anchor_end
    }
}

/// Byte offset just past the last `#include` line, or 0.
fn after_includes(text: &str) -> usize {
    static INCLUDE: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r"(?m)^\s*#include\b").expect("static regex"));
    INCLUDE
        .find_iter(text)
        .last()
        .map(|m| end_of_line(text, m.start()))
        .unwrap_or(0)
}

/// `at` sits after a `//` on its line.
fn in_line_comment(text: &str, at: usize) -> bool {
    let line_start = text[..at].rfind('\n').map(|i| i + 1).unwrap_or(0);
    text[line_start..at].contains("//")
}

/// The literal ending at `end` carries on (`1023.5`, `10230`).
fn continues_literal(text: &str, end: usize) -> bool {
    text[end..]
        .chars()
        .next()
        .is_some_and(|c| c == '.' || c.is_ascii_digit())
}

fn insert_line_block(text: &mut String, at: usize, block: &str) {
    let mut block = block.to_string();
    if !block.ends_with('\n') {
        block.push('\n');
    }
    if at > 0 && !text[..at].ends_with('\n') {
        block.insert(0, '\n');
    }
    text.insert_str(at, &block);
}

impl CodeValidator {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn validate_and_fix(&self, artifact: &str, context: &ValidationContext<'_>) -> ValidationReport {
        let profiles: Vec<&CheckProfile> = self
            .registry
            .checks_for(context.domain_tags, context.hardware)
            .collect();

        let mut text = artifact.to_string();
        let mut fixes = Vec::new();
        let mut critiques = Vec::new();

        for construct in profiles.iter().flat_map(|p| &p.required) {
            self.ensure_required(&mut text, construct, &mut fixes, &mut critiques);
        }

        let request_values = request_literals(context.request);
        for check in profiles.iter().flat_map(|p| &p.constants) {
            self.fix_constant(&mut text, check, &request_values, &mut fixes, &mut critiques);
        }

        for forbidden in profiles.iter().flat_map(|p| &p.forbidden) {
            if forbidden.pattern.is_match(&text) {
                push_unique(&mut critiques, format!("{}: {}", forbidden.name, forbidden.message));
            }
        }

        if !context.request.trim().is_empty() {
            let request_tokens = tokenize(context.request);
            for unrequested in profiles.iter().flat_map(|p| &p.unrequested) {
                if unrequested.pattern.is_match(&text)
                    && !unrequested.request_keywords.matches(&request_tokens)
                {
                    push_unique(&mut critiques, unrequested.message.clone());
                }
            }
        }

        if !fixes.is_empty() {
            metrics::counter!("anvil_validator_fixes_total").increment(fixes.len() as u64);
        }
        debug!(
            fixes = fixes.len(),
            critiques = critiques.len(),
            profiles = profiles.len(),
            "Validated artifact"
        );

        ValidationReport {
            artifact: text,
            applied_fixes: fixes,
            critiques,
        }
    }

    fn ensure_required(
        &self,
        text: &mut String,
        construct: &RequiredConstruct,
        fixes: &mut Vec<String>,
        critiques: &mut Vec<String>,
    ) {
        if !construct.trigger.is_match(text) || construct.present.is_match(text) {
            return;
        }

        let snippet_at = match &construct.anchor {
            Some(anchor) => match anchor.find(text) {
                Some(m) => after_anchor(text, m.end()),
                None => {
                    push_unique(
                        critiques,
                        format!("missing {}: no place to insert it automatically", construct.name),
                    );
                    return;
                }
            },
            None => text.len(),
        };

        // Decided before the snippet goes in; the snippet mentions the same names.
        let missing: Vec<&str> = construct
            .preamble
            .iter()
            .filter(|line| !line.unless.is_match(text.as_str()))
            .map(|line| line.text.as_str())
            .collect();

        insert_line_block(text, snippet_at, &construct.snippet);
        if !missing.is_empty() {
            let at = after_includes(text);
            insert_line_block(text, at, &missing.join("\n"));
        }

        info!(construct = %construct.name, "Inserted required construct");
        push_unique(fixes, format!("inserted {}", construct.name));
    }

    fn fix_constant(
        &self,
        text: &mut String,
        check: &ConstantCheck,
        request_values: &[String],
        fixes: &mut Vec<String>,
        critiques: &mut Vec<String>,
    ) {
        let mut replacements = Vec::new();
        for captures in check.pattern.captures_iter(text.as_str()) {
            let Some(value) = captures.name("value") else {
                continue;
            };
            if in_line_comment(text, value.start()) || continues_literal(text, value.end()) {
                continue;
            }
            if !check.is_violation(value.as_str()) {
                continue;
            }
            let literal = value.as_str().trim_end_matches(['f', 'F']);
            if request_values.iter().any(|v| v == literal) {
                push_unique(
                    critiques,
                    format!("{}: kept {} because the request asks for it", check.name, value.as_str()),
                );
                continue;
            }
            replacements.push((value.range(), value.as_str().to_string()));
        }

        for (range, old) in replacements.into_iter().rev() {
            text.replace_range(range, &check.expected);
            info!(check = %check.name, old = %old, new = %check.expected, "Replaced constant");
            push_unique(fixes, format!("replaced {} {} with {}", check.name, old, check.expected));
        }
    }
}

/// Numeric literals written in the request.
fn request_literals(request: &str) -> Vec<String> {
    request
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '.'))
        .map(|t| t.trim_matches('.'))
        .filter(|t| t.starts_with(|c: char| c.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}
