//! CLI command handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use sessiongraph_config::{LoadedConfig, SessiongraphConfig};
use sessiongraph_graph::SqliteGraphStore;

pub mod config;
pub mod extract;
pub mod load;
pub mod schema;
pub mod stats;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration and where it came from.
    pub loaded: LoadedConfig,
    /// Graph database file.
    pub database: PathBuf,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    pub fn config(&self) -> &SessiongraphConfig {
        &self.loaded.config
    }

    /// Open (or create) the graph database.
    pub async fn open_store(&self) -> Result<Arc<SqliteGraphStore>> {
        let path = self.database.clone();
        let store = tokio::task::spawn_blocking(move || SqliteGraphStore::open(&path))
            .await?
            .with_context(|| format!("cannot open graph database {}", self.database.display()))?;
        Ok(Arc::new(store))
    }
}
