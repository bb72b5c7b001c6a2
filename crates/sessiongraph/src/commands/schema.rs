//! Schema command - create or check the graph schema.

use anyhow::{Result, bail};
use clap::Args;
use console::Style;
use serde::Serialize;

use sessiongraph_graph::{SCHEMA_VERSION, SchemaManager, SqliteGraphStore};

use super::Context;

/// Arguments for the schema command.
#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Report problems without creating anything
    #[arg(long)]
    pub check: bool,
}

#[derive(Debug, Serialize)]
struct SchemaOutput {
    database: String,
    version: i32,
    expected_version: i32,
    problems: Vec<String>,
}

/// Run the schema command.
pub async fn run(args: SchemaArgs, ctx: &Context) -> Result<()> {
    let database = ctx.database.display().to_string();

    let output = if args.check {
        if !ctx.database.exists() {
            bail!(
                "graph database {database} does not exist; run `sessiongraph schema` to create it"
            );
        }
        let path = ctx.database.clone();
        let (version, problems) =
            tokio::task::spawn_blocking(move || SqliteGraphStore::check_schema(&path)).await??;
        SchemaOutput {
            database,
            version,
            expected_version: SCHEMA_VERSION,
            problems,
        }
    } else {
        let store = ctx.open_store().await?;
        let version = store.with_connection(SchemaManager::version)?;
        SchemaOutput {
            database,
            version,
            expected_version: SCHEMA_VERSION,
            problems: Vec::new(),
        }
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let green = Style::new().green();
        let red = Style::new().red();
        let dim = Style::new().dim();

        println!("  {} {}", dim.apply_to("Database:"), output.database);
        if output.problems.is_empty() {
            println!(
                "  {} {}",
                dim.apply_to("Schema:"),
                green.apply_to(format!("ok (version {})", output.version))
            );
        } else {
            for problem in &output.problems {
                println!("  {} {}", red.apply_to("✗"), problem);
            }
        }
    }

    if !output.problems.is_empty() {
        bail!("schema has {} problem(s)", output.problems.len());
    }
    Ok(())
}
