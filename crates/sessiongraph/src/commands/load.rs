//! Load command - extraction file into the graph.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use console::{Style, style};

use sessiongraph_graph::{GraphLoader, GraphStore, LoadResult};

use super::Context;

/// Arguments for the load command.
#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Extraction file written by `sessiongraph extract`
    pub file: PathBuf,

    /// Load only this session
    #[arg(short, long)]
    pub session: Option<u64>,
}

/// Run the load command.
pub async fn run(args: LoadArgs, ctx: &Context) -> Result<()> {
    let mut sessions = sessiongraph_extract::read_file(&args.file)
        .with_context(|| format!("cannot read extraction file {}", args.file.display()))?;

    if let Some(index) = args.session {
        sessions.retain(|s| s.session_index == index);
        if sessions.is_empty() {
            bail!("session {index} is not in {}", args.file.display());
        }
    }

    let store = ctx.open_store().await?;
    let store: Arc<dyn GraphStore> = store;
    let results = tokio::task::spawn_blocking(move || GraphLoader::new(store).load_all(&sessions))
        .await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_results(&results, ctx);
    }

    let failed = results.iter().filter(|r| !r.success).count();
    if failed > 0 {
        bail!("{failed} of {} sessions failed to load", results.len());
    }
    Ok(())
}

fn print_results(results: &[LoadResult], ctx: &Context) {
    let green = Style::new().green();
    let red = Style::new().red();
    let dim = Style::new().dim();

    for result in results {
        if result.success {
            println!("{} {}", green.apply_to("✓"), result);
        } else {
            println!("{} {}", red.apply_to("✗"), result);
        }
    }

    let nodes: usize = results.iter().map(|r| r.nodes_created).sum();
    let edges: usize = results.iter().map(|r| r.edges_created).sum();
    println!();
    println!(
        "{} {} sessions into {}",
        style("Loaded").bold(),
        results.iter().filter(|r| r.success).count(),
        ctx.database.display()
    );
    println!(
        "  {} {} nodes, {} edges",
        dim.apply_to("Created:"),
        nodes,
        edges
    );
}
