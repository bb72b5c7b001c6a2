//! Session knowledge graph for sessiongraph.
//!
//! Extracted sessions are loaded into a property graph with three node
//! kinds:
//!
//! - `User`: one per session, keyed `user_session_{index}`
//! - `Entity` and `Event`: shared across sessions, keyed by `(name, type)`
//!
//! Edges carry the `session_index` that produced them and are never merged
//! across sessions.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use sessiongraph_graph::{GraphLoader, GraphStore, SqliteGraphStore};
//! use sessiongraph_types::Session;
//!
//! let store = Arc::new(SqliteGraphStore::open("graph.db")?);
//! let loader = GraphLoader::new(store.clone());
//!
//! let result = loader.load(&Session::new(0, "2023/05/20"));
//! assert!(result.success);
//! println!("{}", store.stats()?);
//! # Ok::<(), sessiongraph_graph::GraphError>(())
//! ```

pub mod batch;
pub mod error;
pub mod loader;
pub mod schema;
pub mod store;

pub use batch::{ApplyOutcome, EdgeUpsert, Endpoint, GraphBatch, NodeUpsert, UserUpsert};
pub use error::{GraphError, Result};
pub use loader::{GraphLoader, LoadResult, plan};
pub use schema::{SCHEMA_VERSION, SchemaManager};
pub use store::{GraphStats, GraphStore, SqliteGraphStore, StoredEdge, StoredNode};
