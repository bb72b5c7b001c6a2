//! Config command - show the effective configuration.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::{Style, style};
use serde::Serialize;

use sessiongraph_config::SessiongraphConfig;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: Option<ConfigCommand>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration (default)
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Write a config file with the current values
    Init {
        /// Create project-local config (./sessiongraph.toml) instead of user config
        #[arg(long)]
        local: bool,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Effective configuration for JSON output.
#[derive(Debug, Serialize)]
struct ShowOutput<'a> {
    backend: &'a str,
    model: &'a str,
    base_url: &'a str,
    api_key_set: bool,
    temperature: f32,
    max_tokens: u32,
    max_attempts: u32,
    concurrency: usize,
    use_extraction_prompt: bool,
    output_dir: String,
    database: String,
    sources: Vec<String>,
    env_overrides: &'a [String],
    warnings: &'a [String],
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command.unwrap_or(ConfigCommand::Show) {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Init { local, force } => cmd_init(ctx, local, force),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = &ctx.loaded;
    let config = &loaded.config;

    let output = ShowOutput {
        backend: config.llm.backend().as_str(),
        model: config.llm.model(),
        base_url: config.llm.base_url(),
        api_key_set: config.llm.api_key.is_some(),
        temperature: config.llm.temperature(),
        max_tokens: config.llm.max_tokens(),
        max_attempts: config.extraction.max_attempts(),
        concurrency: config.extraction.concurrency(),
        use_extraction_prompt: config.extraction.use_extraction_prompt(),
        output_dir: config.extraction.output_dir().display().to_string(),
        database: ctx.database.display().to_string(),
        sources: loaded
            .loaded_from()
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
        env_overrides: &loaded.env_overrides,
        warnings: &loaded.warnings,
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    let yellow = Style::new().yellow();

    println!("# sessiongraph configuration\n");
    if output.sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in &output.sources {
            println!("  {source}");
        }
        println!();
    }

    println!("{}", style("[llm]").bold());
    println!("  {} {}", dim.apply_to("backend:    "), output.backend);
    println!("  {} {}", dim.apply_to("model:      "), output.model);
    println!("  {} {}", dim.apply_to("base_url:   "), output.base_url);
    println!(
        "  {} {}",
        dim.apply_to("api_key:    "),
        if output.api_key_set { "set" } else { "not set" }
    );
    println!("  {} {}", dim.apply_to("temperature:"), output.temperature);
    println!("  {} {}", dim.apply_to("max_tokens: "), output.max_tokens);
    println!();
    println!("{}", style("[extraction]").bold());
    println!("  {} {}", dim.apply_to("max_attempts:         "), output.max_attempts);
    println!("  {} {}", dim.apply_to("concurrency:          "), output.concurrency);
    println!(
        "  {} {}",
        dim.apply_to("use_extraction_prompt:"),
        output.use_extraction_prompt
    );
    println!("  {} {}", dim.apply_to("output_dir:           "), output.output_dir);
    println!();
    println!("{}", style("[graph]").bold());
    println!("  {} {}", dim.apply_to("database:"), output.database);

    if !output.env_overrides.is_empty() {
        println!();
        println!("Environment overrides: {}", output.env_overrides.join(", "));
    }
    for warning in output.warnings {
        println!("{} {}", yellow.apply_to("warning:"), warning);
    }
    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    let sources = &ctx.loaded.sources;

    if ctx.json_output {
        let entries: Vec<_> = sources
            .iter()
            .map(|s| {
                serde_json::json!({ "path": s.path.display().to_string(), "loaded": s.loaded })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let green = Style::new().green();
    let dim = Style::new().dim();
    println!("Config files (lowest precedence first):");
    for source in sources {
        if source.loaded {
            println!("  {} {}", green.apply_to("●"), source.path.display());
        } else {
            println!("  {} {}", dim.apply_to("○"), dim.apply_to(source.path.display()));
        }
    }
    Ok(())
}

fn cmd_init(ctx: &Context, local: bool, force: bool) -> Result<()> {
    let path = if local {
        std::path::PathBuf::from("sessiongraph.toml")
    } else {
        sessiongraph_config::user_config_path()
            .ok_or_else(|| anyhow::anyhow!("cannot determine the user config directory"))?
    };

    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to replace it)", path.display());
    }

    // Keys stay in the environment.
    let mut config: SessiongraphConfig = ctx.loaded.config.clone();
    config.llm.api_key = None;
    sessiongraph_config::save_config(&config, &path)?;

    println!("Wrote {}", path.display());
    Ok(())
}
