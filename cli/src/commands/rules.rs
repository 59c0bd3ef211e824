// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Rule store and validator commands
//!
//! Commands: rules, validate

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;

use anvil_core::application::validator::ValidationContext;
use anvil_cortex::domain::SessionId;
use anvil_cortex::infrastructure::RuleQuery;

use super::assist::print_rule;
use crate::embedded::EmbeddedAssistant;

pub async fn list(
    assistant: &EmbeddedAssistant,
    session: SessionId,
    tags: Vec<String>,
    limit: usize,
) -> Result<()> {
    let namespace = assistant.service().feedback().namespace(session);
    let mut query = RuleQuery::all(namespace).with_limit(limit);
    if !tags.is_empty() {
        query = query.with_tags(tags);
    }

    let rules = assistant
        .stores()
        .rules
        .query(&query)
        .await
        .context("Failed to query rules")?;

    if rules.is_empty() {
        println!("{}", "No rules learned yet.".dimmed());
        return Ok(());
    }

    println!("{} ({})", "Rules".bold(), namespace);
    for rule in &rules {
        print_rule(rule);
        println!(
            "      {} {}  {} {}",
            "used".dimmed(),
            rule.usage_count,
            "succeeded".dimmed(),
            rule.success_count
        );
    }
    Ok(())
}

pub fn validate(
    assistant: &EmbeddedAssistant,
    file: &Path,
    request: Option<String>,
    tags: Vec<String>,
    hardware: Option<String>,
) -> Result<()> {
    let artifact = std::fs::read_to_string(file).with_context(|| format!("Failed to read {:?}", file))?;
    let request = request.unwrap_or_default();

    // Without explicit tags, validate against what the request names.
    let tags = if tags.is_empty() {
        assistant.service().registry().detect_modules(&request)
    } else {
        tags
    };

    let context = ValidationContext {
        domain_tags: &tags,
        hardware: hardware.as_deref(),
        request: &request,
    };
    let report = assistant.service().validate(&artifact, &context);

    println!("{}", report.artifact);
    println!();
    if report.applied_fixes.is_empty() && report.critiques.is_empty() {
        println!("{}", "✓ No issues found".green());
    }
    for fix in &report.applied_fixes {
        println!("  {} {}", "fixed".green(), fix);
    }
    for critique in &report.critiques {
        println!("  {} {}", "warning".yellow(), critique);
    }
    Ok(())
}
