// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Assistant turn and feedback commands
//!
//! Commands: ask, route, correct, accept, teach

use anyhow::{Context, Result};
use colored::Colorize;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use anvil_core::domain::routing::Tier;
use anvil_core::domain::turn::{TurnRequest, TurnResult, TurnStreamEvent};
use anvil_cortex::application::ExtractionOutcome;
use anvil_cortex::domain::{Rule, SessionId};
use anvil_cortex::infrastructure::UpsertOutcome;

use crate::embedded::EmbeddedAssistant;

pub struct AskArgs {
    pub request: String,
    pub stream: bool,
    pub tier: Option<Tier>,
    pub hardware: Option<String>,
}

pub async fn ask(assistant: &EmbeddedAssistant, session: SessionId, args: AskArgs) -> Result<()> {
    assistant.resume(session)?;

    let mut request = TurnRequest::new(session, args.request);
    if let Some(tier) = args.tier {
        request = request.with_tier(tier);
    }
    if let Some(hardware) = args.hardware {
        request = request.with_hardware(hardware);
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling turn");
            ctrl_c.cancel();
        }
    });

    let result = if args.stream {
        ask_streaming(assistant, request, cancel).await?
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner());
        spinner.set_message("Generating...");
        spinner.enable_steady_tick(Duration::from_millis(100));

        let outcome = assistant.service().handle_turn(request, &cancel).await;
        spinner.finish_and_clear();
        let result = outcome.context("Turn failed")?;
        println!("{}", result.artifact_text);
        result
    };

    print_turn_summary(&result);
    assistant.persist(session)?;
    Ok(())
}

async fn ask_streaming(
    assistant: &EmbeddedAssistant,
    request: TurnRequest,
    cancel: CancellationToken,
) -> Result<TurnResult> {
    let mut stream = assistant.service().stream_turn(request, cancel);
    let mut stdout = std::io::stdout();

    while let Some(item) = stream.next().await {
        match item {
            TurnStreamEvent::Token(chunk) => {
                print!("{}", chunk);
                stdout.flush()?;
            }
            TurnStreamEvent::Completed(result) => {
                println!();
                if !result.applied_fixes.is_empty() {
                    println!();
                    println!("{}", "Validated artifact:".bold());
                    println!("{}", result.artifact_text);
                }
                return Ok(*result);
            }
            TurnStreamEvent::Failed(reason) => {
                println!();
                anyhow::bail!("Turn failed: {}", reason);
            }
        }
    }
    anyhow::bail!("Turn ended without a result")
}

fn print_turn_summary(result: &TurnResult) {
    println!();
    let modules = if result.modules_used.is_empty() {
        "none".to_string()
    } else {
        result.modules_used.join(", ")
    };
    println!(
        "{} {}  {} {}  {} {}",
        "Tier:".dimmed(),
        result.tier,
        "Modules:".dimmed(),
        modules,
        "Rules:".dimmed(),
        result.rule_ids.len()
    );
    for fix in &result.applied_fixes {
        println!("  {} {}", "fixed".green(), fix);
    }
    for critique in &result.critiques {
        println!("  {} {}", "warning".yellow(), critique);
    }
    for suggestion in &result.suggestions {
        println!("  {} {}", "suggest".cyan(), suggestion);
    }
}

pub fn route(assistant: &EmbeddedAssistant, request: &str, tier: Option<Tier>) -> Result<()> {
    let decision = assistant.service().route(request, tier);
    println!("{} {}", "Tier:".bold(), decision.tier);
    if decision.forced {
        println!("  (forced)");
    }
    println!(
        "{} {}",
        "Modules:".bold(),
        if decision.modules.is_empty() {
            "none".to_string()
        } else {
            decision.modules.join(", ")
        }
    );
    if let Some(hardware) = &decision.hardware {
        println!("{} {}", "Hardware:".bold(), hardware);
    }
    Ok(())
}

pub async fn correct(
    assistant: &EmbeddedAssistant,
    session: SessionId,
    rationale: String,
    original: Option<PathBuf>,
    corrected: Option<PathBuf>,
) -> Result<()> {
    assistant.resume(session)?;

    let original = original.as_deref().map(read_artifact).transpose()?;
    let corrected = corrected.as_deref().map(read_artifact).transpose()?.unwrap_or_default();

    let outcome = assistant
        .service()
        .feedback()
        .submit_correction(session, original, corrected, rationale)
        .await
        .context("Failed to process correction")?;

    match &outcome.extraction {
        ExtractionOutcome::Skipped(reason) => {
            println!("{} {}", "Correction logged but skipped:".yellow(), reason);
        }
        ExtractionOutcome::Learned { rules, inserted, merged } => {
            println!(
                "{}",
                format!("✓ Learned {} rule(s) ({} new, {} merged)", rules.len(), inserted, merged).green()
            );
            for rule in rules {
                print_rule(rule);
            }
        }
    }
    if !outcome.reinforced.is_empty() {
        println!("  {} {} rule(s)", "reinforced".dimmed(), outcome.reinforced.len());
    }

    assistant.persist(session)?;
    Ok(())
}

pub async fn accept(assistant: &EmbeddedAssistant, session: SessionId) -> Result<()> {
    assistant.resume(session)?;

    let reinforced = assistant
        .service()
        .feedback()
        .accept(session)
        .await
        .context("Nothing to accept")?;
    println!("{}", format!("✓ Accepted; {} rule(s) reinforced", reinforced.len()).green());

    let metrics = assistant.service().feedback().metrics(session);
    println!(
        "  {} {:.0}%  {} {:.0}%  {} {:.0}%",
        "acceptance".dimmed(),
        metrics.acceptance_rate() * 100.0,
        "corrections".dimmed(),
        metrics.correction_rate() * 100.0,
        "accuracy".dimmed(),
        metrics.accuracy() * 100.0
    );
    if let Some(trend) = metrics.accuracy_trend() {
        println!("  {} {:+.1}%", "trend".dimmed(), trend * 100.0);
    }

    assistant.persist(session)?;
    Ok(())
}

pub async fn teach(assistant: &EmbeddedAssistant, session: SessionId, text: &str) -> Result<()> {
    assistant.resume(session)?;

    let outcome = assistant
        .service()
        .feedback()
        .teach(session, text)
        .await
        .context("Failed to store rule")?;

    match &outcome {
        UpsertOutcome::Inserted(rule) => {
            println!("{}", "✓ Rule stored".green());
            print_rule(rule);
        }
        UpsertOutcome::Merged { rule, .. } => {
            println!("{}", "✓ Rule already known; merged".green());
            print_rule(rule);
        }
    }

    assistant.persist(session)?;
    Ok(())
}

pub(crate) fn print_rule(rule: &Rule) {
    println!(
        "  [{}] {:.2} {} {}",
        rule.domain_tag.cyan(),
        rule.confidence,
        rule.category.as_str().dimmed(),
        rule.text
    );
}

fn read_artifact(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
}
