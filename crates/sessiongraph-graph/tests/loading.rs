//! Graph loading against a real SQLite store.

use std::sync::Arc;

use proptest::prelude::*;
use sessiongraph_graph::{GraphLoader, GraphStore, SqliteGraphStore};
use sessiongraph_types::{
    Entity, Event, ExtractionRecord, NodeKey, NodeLabel, NodeRef, Relationship, Session,
};

fn loader() -> (GraphLoader, Arc<SqliteGraphStore>) {
    let store = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
    (GraphLoader::new(store.clone()), store)
}

/// "I just got a new guitar and want tips for learning chords."
fn guitar_session(session_index: u64) -> Session {
    let mut record = ExtractionRecord::default()
        .with_source("I just got a new guitar and want tips for learning chords.");
    record.entities.push(Entity::new("guitar", "object").with_property("condition", "new"));
    record.events.push(Event::new("request for tips", "request"));
    record.relationships = vec![
        Relationship::new(NodeRef::User, NodeRef::entity("guitar", "object"), "HAS"),
        Relationship::new(
            NodeRef::User,
            NodeRef::event("request for tips", "request"),
            "REQUESTS",
        ),
        Relationship::new(
            NodeRef::event("request for tips", "request"),
            NodeRef::entity("guitar", "object"),
            "CONCERNS",
        ),
    ];
    Session::new(session_index, "2023/05/20 (Sat) 02:21").with_records(vec![record])
}

#[test]
fn test_guitar_session_loaded_twice() {
    let (loader, store) = loader();
    let session = guitar_session(0);

    let first = loader.load(&session);
    assert!(first.success, "{first}");
    assert_eq!(first.user_id, "user_session_0");
    assert_eq!(first.nodes_created, 3);
    assert_eq!(first.edges_created, 3);

    let second = loader.load(&session);
    assert!(second.success);
    assert_eq!(second.nodes_created, 0);
    assert_eq!(second.edges_created, 0);

    let stats = store.stats().unwrap();
    assert_eq!(stats.users, 1);
    assert_eq!(stats.entities, 1);
    assert_eq!(stats.events, 1);
    assert_eq!(stats.edges, 3);
    assert_eq!(stats.edges_by_type["HAS"], 1);

    let guitar = store
        .node(NodeLabel::Entity, &NodeKey::new("guitar", "object"))
        .unwrap()
        .unwrap();
    assert_eq!(guitar.properties["condition"], "new");
}

#[test]
fn test_unlabelled_reference_session_loaded_twice() {
    let (loader, store) = loader();
    let session: Session = serde_json::from_value(serde_json::json!({
        "session_index": 0,
        "llm_response": [{
            "entities": [{"name": "guitar", "type": "object", "properties": {}}],
            "events": [],
            "relationships": [{
                "source_ref": "User",
                "target_ref": {"name": "guitar", "type": "object"},
                "relationship_type": "HAS"
            }]
        }]
    }))
    .unwrap();

    assert_eq!(loader.load(&session).edges_created, 1);
    assert_eq!(loader.load(&session).edges_created, 0);

    let stats = store.stats().unwrap();
    assert_eq!(stats.users, 1);
    assert_eq!(stats.entities, 1);
    assert_eq!(stats.edges, 1);
    assert_eq!(stats.edges_by_type["HAS"], 1);
}

#[test]
fn test_entities_shared_across_sessions() {
    let (loader, store) = loader();
    loader.try_load(&guitar_session(0)).unwrap();
    loader.try_load(&guitar_session(1)).unwrap();

    let stats = store.stats().unwrap();
    assert_eq!(stats.users, 2);
    assert_eq!(stats.entities, 1);
    assert_eq!(stats.events, 1);
    assert_eq!(stats.edges, 6);
}

#[test]
fn test_user_endpoint_is_producing_session() {
    let (loader, store) = loader();
    loader.try_load(&guitar_session(4)).unwrap();
    loader.try_load(&guitar_session(9)).unwrap();

    for index in [4u64, 9] {
        let edges = store.session_edges(index).unwrap();
        let user_edges: Vec<_> = edges
            .iter()
            .filter(|e| e.source.label == NodeLabel::User)
            .collect();
        assert_eq!(user_edges.len(), 2);
        assert!(
            user_edges
                .iter()
                .all(|e| e.source.name == format!("user_session_{index}"))
        );
    }
}

#[test]
fn test_same_name_different_type_are_distinct() {
    let (loader, store) = loader();
    let mut record = ExtractionRecord::default();
    record.entities.push(Entity::new("Python", "language"));
    record.entities.push(Entity::new("Python", "animal"));
    loader
        .try_load(&Session::new(0, "").with_records(vec![record]))
        .unwrap();

    assert_eq!(store.stats().unwrap().entities, 2);
}

#[test]
fn test_empty_session_creates_only_user() {
    let (loader, store) = loader();
    let result = loader.try_load(&Session::new(2, "")).unwrap();
    assert_eq!(result.nodes_created, 1);
    assert_eq!(store.stats().unwrap().users, 1);
}

#[test]
fn test_concurrent_loads_share_merge_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.db");
    // Create the schema before the writers race.
    drop(SqliteGraphStore::open(&path).unwrap());

    let handles: Vec<_> = (0..4u64)
        .map(|index| {
            let path = path.clone();
            std::thread::spawn(move || {
                let store = Arc::new(SqliteGraphStore::open(&path).unwrap());
                let loader = GraphLoader::new(store);
                loader.load(&guitar_session(index))
            })
        })
        .collect();

    for handle in handles {
        let result = handle.join().unwrap();
        assert!(result.success, "{result}");
    }

    let stats = SqliteGraphStore::open(&path).unwrap().stats().unwrap();
    assert_eq!(stats.users, 4);
    assert_eq!(stats.entities, 1);
    assert_eq!(stats.events, 1);
    assert_eq!(stats.edges, 12);
}

fn arb_session() -> impl Strategy<Value = Session> {
    let names = prop::sample::select(vec!["guitar", "piano", "Lisbon", "degree"]);
    let kinds = prop::sample::select(vec!["object", "place"]);
    let entity = (names, kinds);
    (0u64..3, prop::collection::vec(prop::collection::vec(entity, 0..4), 0..3)).prop_map(
        |(index, records)| {
            let records = records
                .into_iter()
                .map(|entities| {
                    let mut record = ExtractionRecord::default();
                    for (name, kind) in entities {
                        record.entities.push(Entity::new(name, kind));
                        record.relationships.push(Relationship::new(
                            NodeRef::User,
                            NodeRef::entity(name, kind),
                            "MENTIONS",
                        ));
                    }
                    record
                })
                .collect();
            Session::new(index, "").with_records(records)
        },
    )
}

proptest! {
    #[test]
    fn reloading_never_changes_the_graph(sessions in prop::collection::vec(arb_session(), 1..5)) {
        let (loader, store) = loader();
        for session in &sessions {
            prop_assert!(loader.load(session).success);
        }
        let once = store.stats().unwrap();

        for session in &sessions {
            let again = loader.load(session);
            prop_assert_eq!(again.nodes_created, 0);
            prop_assert_eq!(again.edges_created, 0);
        }
        prop_assert_eq!(store.stats().unwrap(), once);
    }
}
