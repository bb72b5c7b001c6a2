//! Store-level write batches.
//!
//! A [`GraphBatch`] is the complete set of upserts for one session, already
//! deduplicated and with every edge endpoint resolved to a concrete node.
//! Stores apply a batch atomically.

use std::fmt;

use serde::Serialize;

use sessiongraph_types::{NodeKey, NodeLabel, Properties};

/// A concrete node identity in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub label: NodeLabel,
    /// User id for users, otherwise the node name.
    pub name: String,
    /// Empty for users.
    #[serde(rename = "type")]
    pub kind: String,
}

impl Endpoint {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            label: NodeLabel::User,
            name: user_id.into(),
            kind: String::new(),
        }
    }

    pub fn node(label: NodeLabel, key: &NodeKey) -> Self {
        Self {
            label,
            name: key.name.clone(),
            kind: key.kind.clone(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label {
            NodeLabel::User => write!(f, "User({})", self.name),
            label => write!(f, "{}({}:{})", label.as_str(), self.name, self.kind),
        }
    }
}

/// The session's User node.
#[derive(Debug, Clone, PartialEq)]
pub struct UserUpsert {
    pub user_id: String,
    pub session_index: u64,
    pub session_date: String,
}

/// An Entity or Event upsert keyed by `(name, type)`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpsert {
    pub key: NodeKey,
    pub properties: Properties,
}

/// An edge attributed to the batch's session.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeUpsert {
    pub source: Endpoint,
    pub target: Endpoint,
    pub relationship_type: String,
    pub properties: Properties,
}

/// All writes for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphBatch {
    pub session_index: u64,
    pub user: UserUpsert,
    pub entities: Vec<NodeUpsert>,
    pub events: Vec<NodeUpsert>,
    pub edges: Vec<EdgeUpsert>,
}

/// What a store actually created while applying a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    pub nodes_created: usize,
    pub edges_created: usize,
}

/// Add keys from `incoming` that `existing` lacks. Returns whether anything
/// was added.
pub fn merge_first_write_wins(existing: &mut Properties, incoming: &Properties) -> bool {
    let mut changed = false;
    for (key, value) in incoming {
        if !existing.contains_key(key) {
            existing.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_keeps_existing_values() {
        let mut existing = json!({"color": "red"}).as_object().cloned().unwrap();
        let incoming = json!({"color": "blue", "brand": "Fender"})
            .as_object()
            .cloned()
            .unwrap();

        assert!(merge_first_write_wins(&mut existing, &incoming));
        assert_eq!(existing["color"], "red");
        assert_eq!(existing["brand"], "Fender");
        assert!(!merge_first_write_wins(&mut existing, &incoming));
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::user("user_session_3").to_string(), "User(user_session_3)");
        let key = NodeKey::new("guitar", "object");
        assert_eq!(
            Endpoint::node(NodeLabel::Entity, &key).to_string(),
            "Entity(guitar:object)"
        );
    }
}
