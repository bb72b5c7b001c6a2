//! Loads extracted sessions into a [`GraphStore`].
//!
//! Each session becomes one [`GraphBatch`]: its User node, every Entity and
//! Event folded by `(name, type)`, and every relationship as an edge tagged
//! with the session index. The batch is applied in one transaction, so a
//! load either lands completely or not at all and can simply be repeated.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use sessiongraph_types::{NodeKey, NodeLabel, NodeRef, Properties, Session};

use crate::batch::{
    ApplyOutcome, EdgeUpsert, Endpoint, GraphBatch, NodeUpsert, UserUpsert, merge_first_write_wins,
};
use crate::error::Result;
use crate::store::GraphStore;

/// Outcome of loading one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadResult {
    pub success: bool,
    pub session_index: u64,
    pub user_id: String,
    /// Distinct entities in the session.
    pub entity_count: usize,
    /// Distinct events in the session.
    pub event_count: usize,
    /// Relationships in the session, before deduplication.
    pub relationship_count: usize,
    pub nodes_created: usize,
    pub edges_created: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl fmt::Display for LoadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            write!(
                f,
                "session {} ({}): {} entities, {} events, {} relationships; created {} nodes, {} edges",
                self.session_index,
                self.user_id,
                self.entity_count,
                self.event_count,
                self.relationship_count,
                self.nodes_created,
                self.edges_created,
            )
        } else {
            write!(
                f,
                "session {} ({}): FAILED [{}] {}",
                self.session_index,
                self.user_id,
                self.error_kind.as_deref().unwrap_or("unknown"),
                self.error.as_deref().unwrap_or(""),
            )
        }
    }
}

/// Writes sessions to a graph store.
pub struct GraphLoader {
    store: Arc<dyn GraphStore>,
}

impl GraphLoader {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Load one session, reporting store failures in the result.
    pub fn load(&self, session: &Session) -> LoadResult {
        match self.try_load(session) {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    session_index = session.session_index,
                    error_kind = e.category(),
                    error = %e,
                    "Session load failed"
                );
                LoadResult {
                    success: false,
                    error: Some(e.to_string()),
                    error_kind: Some(e.category().to_string()),
                    ..summary(session, ApplyOutcome::default())
                }
            }
        }
    }

    /// Load one session, propagating store failures.
    pub fn try_load(&self, session: &Session) -> Result<LoadResult> {
        let outcome = self.store.apply(&plan(session))?;
        let result = summary(session, outcome);

        info!(
            session_index = result.session_index,
            entities = result.entity_count,
            events = result.event_count,
            relationships = result.relationship_count,
            nodes_created = result.nodes_created,
            edges_created = result.edges_created,
            "Session loaded"
        );
        Ok(result)
    }

    /// Load sessions in order. A failed session does not stop the rest.
    pub fn load_all(&self, sessions: &[Session]) -> Vec<LoadResult> {
        sessions.iter().map(|session| self.load(session)).collect()
    }
}

fn summary(session: &Session, outcome: ApplyOutcome) -> LoadResult {
    LoadResult {
        success: true,
        session_index: session.session_index,
        user_id: session.user_id(),
        entity_count: session
            .records
            .iter()
            .flat_map(|r| r.entities.iter().map(|e| e.key()))
            .collect::<HashSet<_>>()
            .len(),
        event_count: session
            .records
            .iter()
            .flat_map(|r| r.events.iter().map(|e| e.key()))
            .collect::<HashSet<_>>()
            .len(),
        relationship_count: session.relationship_count(),
        nodes_created: outcome.nodes_created,
        edges_created: outcome.edges_created,
        error: None,
        error_kind: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Planning
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered upserts folded by key, first write wins.
struct Folded<K> {
    order: Vec<(K, Properties)>,
    index: HashMap<K, usize>,
}

impl<K> Default for Folded<K> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<K: Clone + Eq + std::hash::Hash> Folded<K> {
    fn add(&mut self, key: K, properties: &Properties) {
        match self.index.get(&key) {
            Some(&i) => {
                merge_first_write_wins(&mut self.order[i].1, properties);
            }
            None => {
                self.index.insert(key.clone(), self.order.len());
                self.order.push((key, properties.clone()));
            }
        }
    }

    fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }
}

/// Build the write batch for `session`.
///
/// Entity and event keys are folded in record order. Edge endpoints that
/// name nodes not declared in the session get a bare node of their own.
/// Duplicate edges within the session collapse to one.
pub fn plan(session: &Session) -> GraphBatch {
    let user_id = session.user_id();
    let mut entities: Folded<NodeKey> = Folded::default();
    let mut events: Folded<NodeKey> = Folded::default();
    let mut edges: Folded<(Endpoint, Endpoint, String)> = Folded::default();

    for record in &session.records {
        for entity in &record.entities {
            entities.add(entity.key(), &entity.properties);
        }
        for event in &record.events {
            let mut properties = event.properties.clone();
            if let Some(date) = &event.date {
                properties
                    .entry("date")
                    .or_insert_with(|| date.clone().into());
            }
            if let Some(location) = &event.location {
                properties
                    .entry("location")
                    .or_insert_with(|| location.clone().into());
            }
            events.add(event.key(), &properties);
        }
    }

    let empty = Properties::new();
    for record in &session.records {
        for relationship in &record.relationships {
            let mut endpoint = |node: &NodeRef| match node {
                NodeRef::User => Endpoint::user(&user_id),
                NodeRef::Entity(key) => {
                    if !entities.contains(key) {
                        entities.add(key.clone(), &empty);
                    }
                    Endpoint::node(NodeLabel::Entity, key)
                }
                NodeRef::Event(key) => {
                    if !events.contains(key) {
                        events.add(key.clone(), &empty);
                    }
                    Endpoint::node(NodeLabel::Event, key)
                }
            };
            let source = endpoint(&relationship.source_ref);
            let target = endpoint(&relationship.target_ref);
            edges.add(
                (source, target, relationship.relationship_type.clone()),
                &relationship.properties,
            );
        }
    }

    let nodes = |folded: Folded<NodeKey>| -> Vec<NodeUpsert> {
        folded
            .order
            .into_iter()
            .map(|(key, properties)| NodeUpsert { key, properties })
            .collect()
    };

    GraphBatch {
        session_index: session.session_index,
        user: UserUpsert {
            user_id: user_id.clone(),
            session_index: session.session_index,
            session_date: session.session_date.clone(),
        },
        entities: nodes(entities),
        events: nodes(events),
        edges: edges
            .order
            .into_iter()
            .map(|((source, target, relationship_type), properties)| EdgeUpsert {
                source,
                target,
                relationship_type,
                properties,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::store::{GraphStats, SqliteGraphStore, StoredEdge, StoredNode};
    use sessiongraph_types::{Entity, Event, ExtractionRecord, Relationship};

    fn guitar_record() -> ExtractionRecord {
        let mut record = ExtractionRecord::default();
        record
            .entities
            .push(Entity::new("guitar", "object").with_property("condition", "new"));
        record.relationships.push(Relationship::new(
            NodeRef::User,
            NodeRef::entity("guitar", "object"),
            "HAS",
        ));
        record
    }

    #[test]
    fn test_plan_folds_duplicate_keys() {
        let mut second = guitar_record();
        second.entities[0] = Entity::new("guitar", "object")
            .with_property("condition", "used")
            .with_property("brand", "Fender");
        let session = Session::new(3, "d").with_records(vec![guitar_record(), second]);

        let batch = plan(&session);
        assert_eq!(batch.user.user_id, "user_session_3");
        assert_eq!(batch.entities.len(), 1);
        assert_eq!(batch.entities[0].properties["condition"], "new");
        assert_eq!(batch.entities[0].properties["brand"], "Fender");
        assert_eq!(batch.edges.len(), 1);
        assert_eq!(batch.edges[0].source, Endpoint::user("user_session_3"));
    }

    #[test]
    fn test_plan_adds_bare_nodes_for_undeclared_endpoints() {
        let mut record = ExtractionRecord::default();
        let mut event = Event::new("trip", "travel");
        event.date = Some("2023-05-01".into());
        record.events.push(event);
        record.relationships.push(Relationship::new(
            NodeRef::event("trip", "travel"),
            NodeRef::entity("Lisbon", "place"),
            "TO",
        ));
        let session = Session::new(0, "").with_records(vec![record]);

        let batch = plan(&session);
        assert_eq!(batch.events[0].properties["date"], "2023-05-01");
        assert_eq!(batch.entities.len(), 1);
        assert_eq!(batch.entities[0].key, NodeKey::new("Lisbon", "place"));
        assert!(batch.entities[0].properties.is_empty());
    }

    #[test]
    fn test_load_result_counts() {
        let store = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        let loader = GraphLoader::new(store);
        let session = Session::new(0, "").with_records(vec![guitar_record(), guitar_record()]);

        let result = loader.try_load(&session).unwrap();
        assert!(result.success);
        assert_eq!(result.entity_count, 1);
        assert_eq!(result.relationship_count, 2);
        assert_eq!(result.nodes_created, 2);
        assert_eq!(result.edges_created, 1);
    }

    struct UnreachableStore;

    impl GraphStore for UnreachableStore {
        fn apply(&self, _batch: &GraphBatch) -> Result<ApplyOutcome> {
            Err(GraphError::Connection("connection refused".into()))
        }
        fn stats(&self) -> Result<GraphStats> {
            Err(GraphError::Connection("connection refused".into()))
        }
        fn node(&self, _label: NodeLabel, _key: &NodeKey) -> Result<Option<StoredNode>> {
            Ok(None)
        }
        fn session_edges(&self, _session_index: u64) -> Result<Vec<StoredEdge>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_connectivity_failure_reported() {
        let loader = GraphLoader::new(Arc::new(UnreachableStore));
        let session = Session::new(5, "").with_records(vec![guitar_record()]);

        let result = loader.load(&session);
        assert!(!result.success);
        assert_eq!(result.user_id, "user_session_5");
        assert_eq!(result.error_kind.as_deref(), Some("connection"));
        assert_eq!(result.nodes_created, 0);
        assert!(result.to_string().contains("FAILED"));

        assert!(loader.try_load(&session).is_err());
    }
}
