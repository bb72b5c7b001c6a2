//! sessiongraph - Knowledge graphs from conversational sessions
//!
//! Main entry point for the sessiongraph CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

mod commands;

use commands::{config, extract, load, schema, stats};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// sessiongraph - Knowledge graphs from conversational sessions
#[derive(Parser)]
#[command(name = "sessiongraph")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file applied on top of the discovered ones
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Graph database file (default: from config)
    #[arg(long, global = true, env = "SESSIONGRAPH_DATABASE")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract entities, events and relationships from a dataset
    Extract(extract::ExtractArgs),

    /// Load an extraction file into the graph
    Load(load::LoadArgs),

    /// Create or check the graph schema
    Schema(schema::SchemaArgs),

    /// Show graph statistics
    Stats(stats::StatsArgs),

    /// Show the effective configuration
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = sessiongraph_config::load_config(cli.config.as_deref())
        .context("failed to load configuration")?;

    // Initialize tracing: console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "sessiongraph=debug,sessiongraph_extract=debug,sessiongraph_llm=debug,sessiongraph_graph=debug,sessiongraph_config=debug,info"
    } else {
        "sessiongraph=info,sessiongraph_extract=warn,sessiongraph_llm=warn,sessiongraph_graph=warn,warn"
    };
    let console_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let file_layer = if loaded.config.logging.file_enabled() {
        let log_dir = loaded
            .config
            .logging
            .dir
            .clone()
            .or_else(|| sessiongraph_config::user_config_dir().map(|d| d.join("logs")))
            .unwrap_or_else(|| PathBuf::from("logs"));
        let file_appender = tracing_appender::rolling::daily(&log_dir, "sessiongraph.log");
        Some(tracing_appender::non_blocking(file_appender))
    } else {
        None
    };
    let (file_writer, _guard) = match file_layer {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "sessiongraph=trace,sessiongraph_extract=trace,sessiongraph_llm=trace,sessiongraph_graph=trace,sessiongraph_config=trace,info",
                ))
        }))
        .init();

    for warning in &loaded.warnings {
        warn!("{warning}");
    }
    loaded
        .config
        .validate()
        .context("invalid configuration")?;

    let database = cli
        .database
        .unwrap_or_else(|| loaded.config.graph.database());

    // Create context for commands
    let ctx = commands::Context {
        loaded,
        database,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Extract(args) => extract::run(args, &ctx).await,
        Commands::Load(args) => load::run(args, &ctx).await,
        Commands::Schema(args) => schema::run(args, &ctx).await,
        Commands::Stats(args) => stats::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
