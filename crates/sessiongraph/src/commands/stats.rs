//! Stats command - graph statistics.

use anyhow::Result;
use clap::Args;
use console::{Style, style};

use sessiongraph_graph::GraphStore;

use super::Context;

/// Arguments for the stats command.
#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Show the edge count of every relationship type
    #[arg(short, long)]
    pub by_type: bool,
}

/// Run the stats command.
pub async fn run(args: StatsArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store().await?;
    let stats = tokio::task::spawn_blocking(move || store.stats()).await??;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!();
    println!("{}", style("Graph Statistics").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!("  {} {}", dim.apply_to("Database:"), ctx.database.display());
    println!("  {} {}", dim.apply_to("Schema:  "), stats.schema_version);
    println!("  {} {}", dim.apply_to("Users:   "), stats.users);
    println!("  {} {}", dim.apply_to("Entities:"), stats.entities);
    println!("  {} {}", dim.apply_to("Events:  "), stats.events);
    println!(
        "  {} {} ({} types)",
        dim.apply_to("Edges:   "),
        stats.edges,
        stats.edges_by_type.len()
    );

    if args.by_type || ctx.verbose {
        for (kind, count) in &stats.edges_by_type {
            println!("    {kind:<24} {count}");
        }
    }
    println!();
    Ok(())
}
