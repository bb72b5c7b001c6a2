//! Extract command - dataset to extraction file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Args;
use console::{Style, style};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{info, warn};

use sessiongraph_config::{Backend, SessiongraphConfig};
use sessiongraph_extract::{
    BackendCompleter, ExtractionConfig, ExtractionEngine, ExtractionReport, RetryPolicy,
    SessionSink,
};
use sessiongraph_llm::{OllamaBackend, OllamaConfig, OpenAiBackend, OpenAiConfig, SharedBackend};

use super::Context;

/// Arguments for the extract command.
#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Dataset file (categories of questions with their sessions)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Extraction file to write (default: llm_responses_<timestamp>.json in the output dir)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Keep the existing output file and skip sessions already in it
    #[arg(long, requires = "output")]
    pub resume: bool,

    /// Extract at most this many sessions (0 = all)
    #[arg(long)]
    pub max_sessions: Option<usize>,
}

/// Extraction summary for JSON output.
#[derive(Debug, Serialize)]
struct ExtractOutput {
    output: PathBuf,
    sessions_extracted: usize,
    sessions_skipped: usize,
    sessions_in_file: usize,
    report: ExtractionReport,
}

/// Run the extract command.
pub async fn run(args: ExtractArgs, ctx: &Context) -> Result<()> {
    let config = ctx.config();
    let max_sessions = args
        .max_sessions
        .unwrap_or_else(|| config.extraction.max_sessions());

    let mut inputs = sessiongraph_extract::load_dataset(&args.input, max_sessions)
        .with_context(|| format!("cannot read dataset {}", args.input.display()))?;

    let output = match args.output {
        Some(path) => path,
        None => default_output(&config.extraction.output_dir()),
    };

    let mut skipped = 0;
    if args.resume {
        let done = sessiongraph_extract::session_indices(&output)?;
        let before = inputs.len();
        inputs.retain(|input| !done.contains(&input.session_index));
        skipped = before - inputs.len();
        info!(skipped, remaining = inputs.len(), "Resuming extraction");
    } else if output.exists() {
        warn!(path = %output.display(), "Overwriting existing extraction file");
        std::fs::remove_file(&output)
            .with_context(|| format!("cannot replace {}", output.display()))?;
    }

    let backend = build_backend(config)?;
    if let Err(e) = backend.health_check().await {
        warn!(backend = backend.name(), error = %e, "Completion service is not reachable");
    }
    let engine = build_engine(config, backend);

    let progress = if ctx.json_output {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(inputs.len() as u64);
        bar.set_style(ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}",
        )?);
        bar.enable_steady_tick(Duration::from_millis(200));
        bar
    };

    let sink = SessionSink::open(&output)?;
    let (sessions, report) = engine
        .extract_all_with(&inputs, Some(&sink), |session| {
            progress.inc(1);
            progress.set_message(format!("session {}", session.session_index));
            if session.failed_completions() > 0 {
                progress.println(format!(
                    "  {} session {}: {} message(s) without a completion",
                    style("!").yellow(),
                    session.session_index,
                    session.failed_completions()
                ));
            }
        })
        .await?;
    progress.finish_and_clear();
    drop(sink);

    let total = sessiongraph_extract::compact(&output)?;

    let summary = ExtractOutput {
        output,
        sessions_extracted: sessions.len(),
        sessions_skipped: skipped,
        sessions_in_file: total,
        report,
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, ctx.verbose);
    }

    Ok(())
}

fn default_output(output_dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    output_dir.join(format!("llm_responses_{stamp}.json"))
}

/// Build the completion backend named by `[llm]`.
fn build_backend(config: &SessiongraphConfig) -> Result<SharedBackend> {
    let llm = &config.llm;
    let timeout = Duration::from_secs(llm.timeout_secs());

    let backend: SharedBackend = match llm.backend() {
        Backend::Ollama => Arc::new(OllamaBackend::new(
            OllamaConfig::default()
                .with_base_url(llm.base_url())
                .with_timeout(timeout),
        )?),
        Backend::Openai => Arc::new(OpenAiBackend::new(
            OpenAiConfig::local(llm.base_url())
                .with_api_key(llm.api_key.clone())
                .with_name(Backend::Openai.as_str())
                .with_timeout(timeout),
        )?),
    };

    info!(
        backend = backend.name(),
        model = llm.model(),
        base_url = llm.base_url(),
        "Completion backend ready"
    );
    Ok(backend)
}

fn build_engine(config: &SessiongraphConfig, backend: SharedBackend) -> ExtractionEngine {
    let llm = &config.llm;
    let settings = &config.extraction;

    let completer = BackendCompleter::new(backend, llm.model())
        .with_temperature(llm.temperature())
        .with_max_tokens(llm.max_tokens());

    let retry = RetryPolicy {
        max_attempts: settings.max_attempts(),
        initial_backoff: Duration::from_millis(settings.initial_backoff_ms()),
        multiplier: settings.backoff_multiplier(),
        max_backoff: Duration::from_millis(settings.max_backoff_ms()),
        attempt_timeout: settings.attempt_timeout_secs().map(Duration::from_secs),
    };

    ExtractionEngine::new(
        Arc::new(completer),
        ExtractionConfig {
            retry,
            concurrency: settings.concurrency(),
            session_concurrency: settings.session_concurrency(),
            use_extraction_prompt: settings.use_extraction_prompt(),
            system_prompt: settings.system_prompt.clone(),
        },
    )
}

fn print_summary(summary: &ExtractOutput, verbose: bool) {
    let green = Style::new().green();
    let yellow = Style::new().yellow();
    let dim = Style::new().dim();
    let report = &summary.report;

    println!();
    println!("{}", style("Extraction complete").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!(
        "  {} {}",
        dim.apply_to("Output:"),
        summary.output.display()
    );
    println!(
        "  {} {} extracted, {} skipped, {} in file",
        dim.apply_to("Sessions:"),
        green.apply_to(summary.sessions_extracted),
        summary.sessions_skipped,
        summary.sessions_in_file
    );
    println!(
        "  {} {} entities, {} events, {} relationships",
        dim.apply_to("Found:"),
        report.entities,
        report.events,
        report.relationships
    );

    if report.has_degradation() || report.failed_completions > 0 {
        println!(
            "  {} {} partial, {} unusable, {} failed completions",
            yellow.apply_to("Degraded:"),
            report.partial,
            report.unusable,
            report.failed_completions
        );
    }
    if verbose {
        println!("  {} {}", dim.apply_to("Report:"), report);
    }
    println!();
}
