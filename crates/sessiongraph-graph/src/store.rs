//! Graph store abstraction and its SQLite implementation.
//!
//! # Layout
//!
//! ```text
//! ┌────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │   users    │   │      entities       │   │       events        │
//! │ user_id PK │   │ UNIQUE(name, type)  │   │ UNIQUE(name, type)  │
//! └────────────┘   └─────────────────────┘   └─────────────────────┘
//!        ▲                   ▲                          ▲
//!        └───────────────────┼──────────────────────────┘
//!                    ┌───────┴───────┐
//!                    │     edges     │  UNIQUE(source, target,
//!                    │               │         type, session_index)
//!                    └───────────────┘
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use sessiongraph_types::{NodeKey, NodeLabel, Properties};

use crate::batch::{
    ApplyOutcome, EdgeUpsert, Endpoint, GraphBatch, NodeUpsert, UserUpsert, merge_first_write_wins,
};
use crate::error::{GraphError, Result};
use crate::schema::{SCHEMA_VERSION, SchemaManager};

/// How long a writer waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A persistent property graph of users, entities, events and edges.
pub trait GraphStore: Send + Sync {
    /// Apply all writes of one session atomically.
    fn apply(&self, batch: &GraphBatch) -> Result<ApplyOutcome>;

    /// Read-only counts.
    fn stats(&self) -> Result<GraphStats>;

    /// Look up one node. Users are keyed by user id with an empty type.
    fn node(&self, label: NodeLabel, key: &NodeKey) -> Result<Option<StoredNode>>;

    /// Edges attributed to one session, in insertion order.
    fn session_edges(&self, session_index: u64) -> Result<Vec<StoredEdge>>;
}

/// A node as stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredNode {
    pub label: NodeLabel,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: Properties,
}

/// An edge as stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEdge {
    pub source: Endpoint,
    pub target: Endpoint,
    pub relationship_type: String,
    pub session_index: u64,
    pub properties: Properties,
}

/// Graph statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub users: usize,
    pub entities: usize,
    pub events: usize,
    pub edges: usize,
    pub edges_by_type: BTreeMap<String, usize>,
    pub schema_version: i32,
}

impl fmt::Display for GraphStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "users:     {}", self.users)?;
        writeln!(f, "entities:  {}", self.entities)?;
        writeln!(f, "events:    {}", self.events)?;
        write!(f, "edges:     {}", self.edges)?;
        for (kind, count) in &self.edges_by_type {
            write!(f, "\n  {kind:<24} {count}")?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite store
// ─────────────────────────────────────────────────────────────────────────────

/// Graph store backed by a single SQLite file.
///
/// Writers take an immediate transaction, so concurrent loads through
/// separate connections serialize on the database lock rather than racing
/// on the unique indexes.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
    location: String,
}

impl fmt::Debug for SqliteGraphStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteGraphStore")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl SqliteGraphStore {
    /// Open or create a store, creating the schema if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                GraphError::Connection(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .map_err(|e| GraphError::Connection(format!("cannot open {}: {e}", path.display())))?;

        let store = Self::init(conn, path.display().to_string())?;
        info!(path = %path.display(), "Graph store opened");
        Ok(store)
    }

    /// Schema version and problems of an existing database, without
    /// changing it.
    pub fn check_schema(path: impl AsRef<Path>) -> Result<(i32, Vec<String>)> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| GraphError::Connection(format!("cannot open {}: {e}", path.display())))?;
        Ok((SchemaManager::version(&conn)?, SchemaManager::check(&conn)?))
    }

    /// Create an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, ":memory:".to_string())
    }

    fn init(conn: Connection, location: String) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        debug!(location = %location, journal = %journal, "Graph connection configured");
        SchemaManager::ensure(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            location,
        })
    }

    /// Where the database lives.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Run `f` against the underlying connection.
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }
}

impl GraphStore for SqliteGraphStore {
    fn apply(&self, batch: &GraphBatch) -> Result<ApplyOutcome> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut outcome = ApplyOutcome::default();
        if insert_user(&tx, &batch.user, &now)? {
            outcome.nodes_created += 1;
        }
        for node in &batch.entities {
            if upsert_node(&tx, NodeTable::Entities, node, &now)? {
                outcome.nodes_created += 1;
            }
        }
        for node in &batch.events {
            if upsert_node(&tx, NodeTable::Events, node, &now)? {
                outcome.nodes_created += 1;
            }
        }
        for edge in &batch.edges {
            if insert_edge(&tx, batch.session_index, edge, &now)? {
                outcome.edges_created += 1;
            }
        }

        tx.commit()?;

        debug!(
            session_index = batch.session_index,
            nodes_created = outcome.nodes_created,
            edges_created = outcome.edges_created,
            "Batch applied"
        );
        Ok(outcome)
    }

    fn stats(&self) -> Result<GraphStats> {
        let conn = self.conn.lock();
        let count = |table: &str| -> Result<usize> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
            Ok(n as usize)
        };

        let mut stmt = conn.prepare(
            "SELECT relationship_type, COUNT(*) FROM edges
             GROUP BY relationship_type ORDER BY relationship_type",
        )?;
        let edges_by_type = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

        Ok(GraphStats {
            users: count("users")?,
            entities: count("entities")?,
            events: count("events")?,
            edges: count("edges")?,
            edges_by_type,
            schema_version: SchemaManager::version(&conn).unwrap_or(SCHEMA_VERSION),
        })
    }

    fn node(&self, label: NodeLabel, key: &NodeKey) -> Result<Option<StoredNode>> {
        let conn = self.conn.lock();

        let table = match label {
            NodeLabel::User => {
                let row = conn
                    .query_row(
                        "SELECT session_index, session_date FROM users WHERE user_id = ?1",
                        [&key.name],
                        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                    )
                    .optional()?;
                return Ok(row.map(|(session_index, session_date)| {
                    let mut properties = Properties::new();
                    properties.insert("session_index".into(), Value::from(session_index));
                    properties.insert("session_date".into(), Value::String(session_date));
                    StoredNode {
                        label,
                        name: key.name.clone(),
                        kind: String::new(),
                        properties,
                    }
                }));
            }
            NodeLabel::Entity => NodeTable::Entities,
            NodeLabel::Event => NodeTable::Events,
        };

        let stored: Option<String> = conn
            .query_row(
                &format!("SELECT properties FROM {table} WHERE name = ?1 AND type = ?2"),
                params![key.name, key.kind],
                |row| row.get(0),
            )
            .optional()?;

        stored
            .map(|raw| {
                Ok(StoredNode {
                    label,
                    name: key.name.clone(),
                    kind: key.kind.clone(),
                    properties: parse_properties(&raw)?,
                })
            })
            .transpose()
    }

    fn session_edges(&self, session_index: u64) -> Result<Vec<StoredEdge>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT source_label, source_name, source_type,
                    target_label, target_name, target_type,
                    relationship_type, properties
             FROM edges WHERE session_index = ?1 ORDER BY id",
        )?;

        let rows = stmt
            .query_map([sql_index(session_index)?], |row| {
                Ok((
                    [row.get::<_, String>(0)?, row.get(1)?, row.get(2)?],
                    [row.get::<_, String>(3)?, row.get(4)?, row.get(5)?],
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(source, target, relationship_type, properties)| {
                Ok(StoredEdge {
                    source: endpoint_from_row(source)?,
                    target: endpoint_from_row(target)?,
                    relationship_type,
                    session_index,
                    properties: parse_properties(&properties)?,
                })
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Statements
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum NodeTable {
    Entities,
    Events,
}

impl fmt::Display for NodeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Entities => "entities",
            Self::Events => "events",
        })
    }
}

fn sql_index(session_index: u64) -> Result<i64> {
    i64::try_from(session_index)
        .map_err(|_| GraphError::InvalidData(format!("session index {session_index} out of range")))
}

fn insert_user(conn: &Connection, user: &UserUpsert, now: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO users (user_id, session_index, session_date, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id) DO NOTHING",
        params![user.user_id, sql_index(user.session_index)?, user.session_date, now],
    )?;
    Ok(inserted == 1)
}

/// Create the node, or add new property keys to the existing one.
fn upsert_node(conn: &Connection, table: NodeTable, node: &NodeUpsert, now: &str) -> Result<bool> {
    let properties = serde_json::to_string(&node.properties)?;
    let inserted = conn.execute(
        &format!(
            "INSERT INTO {table} (name, type, properties, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name, type) DO NOTHING"
        ),
        params![node.key.name, node.key.kind, properties, now],
    )?;
    if inserted == 1 {
        return Ok(true);
    }
    if node.properties.is_empty() {
        return Ok(false);
    }

    let stored: String = conn.query_row(
        &format!("SELECT properties FROM {table} WHERE name = ?1 AND type = ?2"),
        params![node.key.name, node.key.kind],
        |row| row.get(0),
    )?;
    let mut existing = parse_properties(&stored)?;
    if merge_first_write_wins(&mut existing, &node.properties) {
        conn.execute(
            &format!("UPDATE {table} SET properties = ?3 WHERE name = ?1 AND type = ?2"),
            params![node.key.name, node.key.kind, serde_json::to_string(&existing)?],
        )?;
    }
    Ok(false)
}

fn insert_edge(
    conn: &Connection,
    session_index: u64,
    edge: &EdgeUpsert,
    now: &str,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO edges (source_label, source_name, source_type,
                            target_label, target_name, target_type,
                            relationship_type, session_index, properties, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(source_label, source_name, source_type,
                     target_label, target_name, target_type,
                     relationship_type, session_index) DO NOTHING",
        params![
            edge.source.label.as_str(),
            edge.source.name,
            edge.source.kind,
            edge.target.label.as_str(),
            edge.target.name,
            edge.target.kind,
            edge.relationship_type,
            sql_index(session_index)?,
            serde_json::to_string(&edge.properties)?,
            now,
        ],
    )?;
    Ok(inserted == 1)
}

fn parse_properties(raw: &str) -> Result<Properties> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(GraphError::InvalidData(format!(
            "stored properties are not an object: {other}"
        ))),
    }
}

fn endpoint_from_row([label, name, kind]: [String; 3]) -> Result<Endpoint> {
    let label = NodeLabel::parse(&label)
        .ok_or_else(|| GraphError::InvalidData(format!("unknown node label '{label}'")))?;
    Ok(Endpoint { label, name, kind })
}
