// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use anvil_core::domain::config::{AssistantConfigManifest, StorageBackend};

pub const MINIMAL_TEMPLATE: &str = include_str!("../../templates/config-minimal.yaml");
pub const EXAMPLES_TEMPLATE: &str = include_str!("../../templates/config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./anvil-config.yaml)
        #[arg(short, long, default_value = "./anvil-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = AssistantConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;
    let spec = &config.spec;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. ANVIL_CONFIG_PATH: {}",
            std::env::var("ANVIL_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./anvil-config.yaml");
        println!("  4. ~/.anvil/config.yaml");
        println!("  5. /etc/anvil/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    // LLM providers
    println!("{}", "LLM Providers:".bold());
    for provider in &spec.llm_providers {
        let state = if provider.enabled { "" } else { " (disabled)" };
        println!("  {} ({}){}", provider.name.bold(), provider.provider_type, state);
        println!("    Endpoint: {}", provider.endpoint);
        for model in &provider.models {
            println!("      - {} → {}", model.alias, model.model);
        }
    }
    println!();

    println!("{}", "LLM Selection:".bold());
    println!("  FAST: {}", spec.llm_selection.fast_model);
    println!("  BALANCED / MODULAR: {}", spec.llm_selection.balanced_model);
    if let Some(fallback) = &spec.llm_selection.fallback_provider {
        println!("  Fallback provider: {}", fallback);
    }
    println!();

    println!("{}", "Inference:".bold());
    println!("  Timeout: {}s", spec.inference.timeout_seconds);
    println!("  Attempts: {}", spec.inference.max_attempts);
    println!("  Module concurrency: {}", spec.inference.max_concurrency);
    println!();

    println!("{}", "Learning:".bold());
    println!(
        "  Rule namespace: {}",
        if spec.learning.shared_rule_namespace { "shared" } else { "per session" }
    );
    println!("  Decay: {:?}", spec.learning.decay);
    println!(
        "  Rules per turn: {} (per module: {})",
        spec.retrieval.rule_limit, spec.retrieval.module_rule_limit
    );
    println!();

    println!("{}", "Storage:".bold());
    match spec.storage.backend {
        StorageBackend::Sqlite => println!("  SQLite: {}", spec.storage.sqlite_path().display()),
        StorageBackend::InMemory => println!("  In memory (rules are lost on exit)"),
    }
    if let Some(registry) = &spec.registry {
        println!("  Registry: {}", registry.path.display());
    }
    if let Some(hardware) = &spec.hardware.default {
        println!("  Default hardware: {}", hardware);
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = AssistantConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        EXAMPLES_TEMPLATE
    } else {
        MINIMAL_TEMPLATE
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
