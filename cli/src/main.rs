// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # anvil
//!
//! Local, rule-learning coding assistant for embedded firmware.
//!
//! ## Architecture
//!
//! Every command runs the assistant in-process: configuration is discovered,
//! the rule store is opened, and per-session feedback state is restored from
//! the data directory so `ask`, `correct` and `accept` can follow each other
//! across invocations.
//!
//! ## Commands
//!
//! - `anvil ask <request> [--stream] [--tier]` - Run one turn
//! - `anvil route <request>` - Show the routing decision only
//! - `anvil correct --rationale <text> [--original FILE] [--corrected FILE]` - Teach by correction
//! - `anvil accept` - Positive feedback on the last turn
//! - `anvil teach <rule>` - Store a rule directly
//! - `anvil rules [--tag] [--limit]` - List learned rules
//! - `anvil validate <FILE>` - Run the validator and auto-fixer on a file
//! - `anvil config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;

use anvil_cli::commands::{self, assist::AskArgs, ConfigCommand};
use anvil_cli::embedded::EmbeddedAssistant;
use anvil_core::domain::config::AssistantConfigManifest;
use anvil_core::domain::routing::Tier;
use anvil_cortex::domain::SessionId;

/// anvil - a coding assistant that learns from your corrections
#[derive(Parser)]
#[command(name = "anvil")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "ANVIL_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Session name; rules and feedback are scoped to it
    #[arg(short, long, global = true, env = "ANVIL_SESSION", default_value = "default")]
    session: String,

    /// Log level (trace, debug, info, warn, error) [default: config, else warn]
    #[arg(long, global = true, env = "ANVIL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format [default: config, else text]
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum TierArg {
    Fast,
    Balanced,
    Modular,
}

impl From<TierArg> for Tier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Fast => Tier::Fast,
            TierArg::Balanced => Tier::Balanced,
            TierArg::Modular => Tier::Modular,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Ask for code or an explanation
    #[command(name = "ask")]
    Ask {
        #[arg(value_name = "REQUEST")]
        request: String,

        /// Print tokens as they arrive
        #[arg(long)]
        stream: bool,

        /// Skip classification and use this tier
        #[arg(long, value_enum)]
        tier: Option<TierArg>,

        /// Hardware profile when the request names none
        #[arg(long)]
        hardware: Option<String>,
    },

    /// Show how a request would be routed
    #[command(name = "route")]
    Route {
        #[arg(value_name = "REQUEST")]
        request: String,

        #[arg(long, value_enum)]
        tier: Option<TierArg>,
    },

    /// Correct the last answer and learn from it
    #[command(name = "correct")]
    Correct {
        /// Why the answer was wrong
        #[arg(short, long)]
        rationale: String,

        /// Artifact being corrected (default: the last answer)
        #[arg(long, value_name = "FILE")]
        original: Option<PathBuf>,

        /// Corrected artifact (omit to learn from the rationale alone)
        #[arg(long, value_name = "FILE")]
        corrected: Option<PathBuf>,
    },

    /// Mark the last answer as good
    #[command(name = "accept")]
    Accept,

    /// Store a rule directly
    #[command(name = "teach")]
    Teach {
        #[arg(value_name = "RULE")]
        rule: String,
    },

    /// List learned rules
    #[command(name = "rules")]
    Rules {
        /// Only rules with this domain tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Validate and auto-fix a source file
    #[command(name = "validate")]
    Validate {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Request the file answers; enables unrequested-feature checks
        #[arg(long)]
        request: Option<String>,

        /// Domain tags to check against (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long)]
        hardware: Option<String>,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Flags win over the config's observability.logging section
    let logging = AssistantConfigManifest::load_or_default(cli.config.clone())
        .ok()
        .and_then(|manifest| manifest.spec.observability)
        .and_then(|observability| observability.logging);
    let level = cli
        .log_level
        .clone()
        .or_else(|| logging.as_ref().map(|l| l.level.clone()))
        .unwrap_or_else(|| "warn".to_string());
    let format = cli.log_format.unwrap_or_else(|| match logging.as_ref() {
        Some(l) if l.format.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, format)?;

    let session = SessionId::from_name(&cli.session);

    let config = cli.config;
    let assistant = || EmbeddedAssistant::new(config.clone());

    match cli.command {
        Some(Commands::Ask {
            request,
            stream,
            tier,
            hardware,
        }) => {
            let args = AskArgs {
                request,
                stream,
                tier: tier.map(Tier::from),
                hardware,
            };
            commands::assist::ask(&assistant().await?, session, args).await
        }
        Some(Commands::Route { request, tier }) => {
            commands::assist::route(&assistant().await?, &request, tier.map(Tier::from))
        }
        Some(Commands::Correct {
            rationale,
            original,
            corrected,
        }) => {
            commands::assist::correct(&assistant().await?, session, rationale, original, corrected).await
        }
        Some(Commands::Accept) => commands::assist::accept(&assistant().await?, session).await,
        Some(Commands::Teach { rule }) => {
            commands::assist::teach(&assistant().await?, session, &rule).await
        }
        Some(Commands::Rules { tags, limit }) => {
            commands::rules::list(&assistant().await?, session, tags, limit).await
        }
        Some(Commands::Validate {
            file,
            request,
            tags,
            hardware,
        }) => commands::rules::validate(&assistant().await?, &file, request, tags, hardware),
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, config.clone()).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Text => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }

    Ok(())
}
