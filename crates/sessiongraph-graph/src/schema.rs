//! Graph schema: node and edge tables with their uniqueness constraints.
//!
//! The unique indexes are what make loading idempotent. Every upsert in the
//! store targets one of them with `ON CONFLICT`, so two loads racing on the
//! same merge key cannot produce duplicate nodes.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{GraphError, Result};

/// Current schema version, tracked in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// Constraints a usable store must carry: table and unique column set.
const REQUIRED_UNIQUE: &[(&str, &[&str])] = &[
    ("users", &["user_id"]),
    ("entities", &["name", "type"]),
    ("events", &["name", "type"]),
    (
        "edges",
        &[
            "source_label",
            "source_name",
            "source_type",
            "target_label",
            "target_name",
            "target_type",
            "relationship_type",
            "session_index",
        ],
    ),
];

/// Creates and checks the graph schema.
pub struct SchemaManager;

impl SchemaManager {
    /// Create tables and constraints if missing. Safe to call repeatedly.
    pub fn ensure(conn: &Connection) -> Result<()> {
        let current = Self::version(conn)?;
        if current >= SCHEMA_VERSION {
            debug!(version = current, "Graph schema up to date");
            return Ok(());
        }

        info!(from = current, to = SCHEMA_VERSION, "Creating graph schema");

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                session_index INTEGER NOT NULL,
                session_date TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                properties TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS uq_entities_key
                ON entities(name, type);

            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                properties TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS uq_events_key
                ON events(name, type);

            -- User endpoints store the user id as name and '' as type.
            CREATE TABLE IF NOT EXISTS edges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_label TEXT NOT NULL,
                source_name TEXT NOT NULL,
                source_type TEXT NOT NULL,
                target_label TEXT NOT NULL,
                target_name TEXT NOT NULL,
                target_type TEXT NOT NULL,
                relationship_type TEXT NOT NULL,
                session_index INTEGER NOT NULL,
                properties TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS uq_edges_key
                ON edges(source_label, source_name, source_type,
                         target_label, target_name, target_type,
                         relationship_type, session_index);
            CREATE INDEX IF NOT EXISTS idx_edges_session
                ON edges(session_index);
            CREATE INDEX IF NOT EXISTS idx_edges_type
                ON edges(relationship_type);
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        info!(version = SCHEMA_VERSION, "Graph schema created");
        Ok(())
    }

    /// Schema version recorded in the database (0 for a fresh file).
    pub fn version(conn: &Connection) -> Result<i32> {
        Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
    }

    /// Problems with the schema; empty when it is complete.
    pub fn check(conn: &Connection) -> Result<Vec<String>> {
        let mut problems = Vec::new();

        let version = Self::version(conn)?;
        if version < SCHEMA_VERSION {
            problems.push(format!(
                "schema version {version} is older than {SCHEMA_VERSION}"
            ));
        }

        for (table, columns) in REQUIRED_UNIQUE {
            if !table_exists(conn, table)? {
                problems.push(format!("missing table '{table}'"));
            } else if !has_unique_index(conn, table, columns)? {
                problems.push(format!(
                    "missing unique constraint on {table}({})",
                    columns.join(", ")
                ));
            }
        }

        Ok(problems)
    }

    /// Fail with [`GraphError::SchemaViolation`] if anything is missing.
    pub fn verify(conn: &Connection) -> Result<()> {
        let problems = Self::check(conn)?;
        if problems.is_empty() {
            Ok(())
        } else {
            Err(GraphError::SchemaViolation(problems.join("; ")))
        }
    }
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn has_unique_index(conn: &Connection, table: &str, columns: &[&str]) -> Result<bool> {
    let mut list = conn.prepare("SELECT name FROM pragma_index_list(?1) WHERE \"unique\" = 1")?;
    let indexes = list
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut info = conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
    for index in indexes {
        let indexed = info
            .query_map([&index], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if indexed == columns {
            return Ok(true);
        }
    }
    Ok(false)
}
