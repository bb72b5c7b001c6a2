//! Per-message extraction records and the graph references they carry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Free-form property bag attached to entities, events, and relationships.
pub type Properties = serde_json::Map<String, serde_json::Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Node identity
// ─────────────────────────────────────────────────────────────────────────────

/// Merge key shared by entities and events: `(name, type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl NodeKey {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

/// Node kinds in the graph store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    User,
    Entity,
    Event,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Entity => "Entity",
            Self::Event => "Event",
        }
    }

    /// Inverse of [`as_str`](Self::as_str), ignoring case.
    pub fn parse(s: &str) -> Option<Self> {
        [Self::User, Self::Entity, Self::Event]
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl std::fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved relationship endpoint.
///
/// `User` always means "the user of the session that produced this
/// relationship"; it is never bound to a concrete session until the graph
/// loader maps it to `user_session_{index}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "NodeRefRepr", into = "NodeRefRepr")]
pub enum NodeRef {
    User,
    Entity(NodeKey),
    Event(NodeKey),
}

impl NodeRef {
    pub fn entity(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::Entity(NodeKey::new(name, kind))
    }

    pub fn event(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::Event(NodeKey::new(name, kind))
    }

    pub fn label(&self) -> NodeLabel {
        match self {
            Self::User => NodeLabel::User,
            Self::Entity(_) => NodeLabel::Entity,
            Self::Event(_) => NodeLabel::Event,
        }
    }

    pub fn key(&self) -> Option<&NodeKey> {
        match self {
            Self::User => None,
            Self::Entity(key) | Self::Event(key) => Some(key),
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User)
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => f.write_str("User"),
            Self::Entity(key) => write!(f, "Entity {key}"),
            Self::Event(key) => write!(f, "Event {key}"),
        }
    }
}

/// Error converting a serialized reference into a [`NodeRef`].
#[derive(Debug, Clone, Error)]
pub enum NodeRefError {
    #[error("unknown node reference '{0}' (expected \"User\" or a {{label, name, type}} object)")]
    UnknownTag(String),

    #[error("node reference has an empty {0}")]
    EmptyField(&'static str),
}

/// Wire form of [`NodeRef`]: `"User"` or `{"label", "name", "type"}`.
/// An object without a label is an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum NodeRefRepr {
    Tag(String),
    Node {
        #[serde(default)]
        label: Option<NodeLabel>,
        #[serde(default)]
        name: String,
        #[serde(rename = "type", default)]
        kind: String,
    },
}

impl TryFrom<NodeRefRepr> for NodeRef {
    type Error = NodeRefError;

    fn try_from(repr: NodeRefRepr) -> Result<Self, Self::Error> {
        match repr {
            NodeRefRepr::Tag(tag) if tag.eq_ignore_ascii_case("user") => Ok(NodeRef::User),
            NodeRefRepr::Tag(tag) => Err(NodeRefError::UnknownTag(tag)),
            NodeRefRepr::Node {
                label: Some(NodeLabel::User),
                ..
            } => Ok(NodeRef::User),
            NodeRefRepr::Node { label, name, kind } => {
                if name.trim().is_empty() {
                    return Err(NodeRefError::EmptyField("name"));
                }
                if kind.trim().is_empty() {
                    return Err(NodeRefError::EmptyField("type"));
                }
                let key = NodeKey::new(name, kind);
                Ok(match label {
                    Some(NodeLabel::Event) => NodeRef::Event(key),
                    _ => NodeRef::Entity(key),
                })
            }
        }
    }
}

impl From<NodeRef> for NodeRefRepr {
    fn from(node: NodeRef) -> Self {
        match node {
            NodeRef::User => NodeRefRepr::Tag("User".to_string()),
            NodeRef::Entity(key) => NodeRefRepr::Node {
                label: Some(NodeLabel::Entity),
                name: key.name,
                kind: key.kind,
            },
            NodeRef::Event(key) => NodeRefRepr::Node {
                label: Some(NodeLabel::Event),
                name: key.name,
                kind: key.kind,
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extracted items
// ─────────────────────────────────────────────────────────────────────────────

/// An entity extracted from one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity name (e.g. "guitar", "Computer Science degree").
    pub name: String,
    /// Entity type (e.g. "object", "person", "platform").
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: Properties,
    /// Snippet of the message the entity was read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_from: Option<String>,
}

impl Entity {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            properties: Properties::new(),
            extracted_from: None,
        }
    }

    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::new(&self.name, &self.kind)
    }

    /// Whether this entity stands for the first-person speaker.
    ///
    /// Speaker entities are never stored as Entity nodes; references to them
    /// resolve to the session's User node.
    pub fn is_speaker(&self) -> bool {
        self.kind.eq_ignore_ascii_case("user")
    }
}

/// An event extracted from one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name or short description (e.g. "request for tips").
    pub name: String,
    /// Event type (e.g. "request", "utility", "attendance").
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_from: Option<String>,
}

impl Event {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            properties: Properties::new(),
            date: None,
            location: None,
            extracted_from: None,
        }
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::new(&self.name, &self.kind)
    }
}

/// A typed edge between two resolved endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_ref: NodeRef,
    pub target_ref: NodeRef,
    /// Free-form edge type, e.g. `HAS`, `REQUESTS`, `PERFORMS`.
    pub relationship_type: String,
    #[serde(default)]
    pub properties: Properties,
}

impl Relationship {
    pub fn new(source: NodeRef, target: NodeRef, relationship_type: impl Into<String>) -> Self {
        Self {
            source_ref: source,
            target_ref: target,
            relationship_type: relationship_type.into(),
            properties: Properties::new(),
        }
    }
}

/// Structured output for one message.
///
/// An empty record is the fallback for a message whose completion could not
/// be obtained or parsed; a record is never absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    /// The message text this record was extracted from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl ExtractionRecord {
    /// An empty record attributed to `source_message`.
    pub fn empty(source_message: Option<String>) -> Self {
        Self {
            source_message,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.events.is_empty() && self.relationships.is_empty()
    }

    pub fn with_source(mut self, source_message: impl Into<String>) -> Self {
        self.source_message = Some(source_message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_ref_user_roundtrip() {
        let value = serde_json::to_value(NodeRef::User).unwrap();
        assert_eq!(value, json!("User"));
        let back: NodeRef = serde_json::from_value(json!("user")).unwrap();
        assert_eq!(back, NodeRef::User);
    }

    #[test]
    fn test_node_ref_entity_wire_form() {
        let value = serde_json::to_value(NodeRef::entity("guitar", "object")).unwrap();
        assert_eq!(
            value,
            json!({"label": "Entity", "name": "guitar", "type": "object"})
        );
    }

    #[test]
    fn test_node_ref_without_label_is_entity() {
        let node: NodeRef =
            serde_json::from_value(json!({"name": "guitar", "type": "object"})).unwrap();
        assert_eq!(node, NodeRef::entity("guitar", "object"));
    }

    #[test]
    fn test_node_ref_rejects_unknown_tag() {
        let result: Result<NodeRef, _> = serde_json::from_value(json!("guitar"));
        assert!(result.is_err());
    }

    #[test]
    fn test_node_ref_rejects_empty_name() {
        let result: Result<NodeRef, _> =
            serde_json::from_value(json!({"label": "Event", "name": " ", "type": "request"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_node_label_parse() {
        assert_eq!(NodeLabel::parse("entity"), Some(NodeLabel::Entity));
        assert_eq!(NodeLabel::parse(" User "), Some(NodeLabel::User));
        assert_eq!(NodeLabel::parse("Person"), None);
    }

    #[test]
    fn test_entity_speaker() {
        assert!(Entity::new("USER", "user").is_speaker());
        assert!(!Entity::new("guitar", "object").is_speaker());
    }

    #[test]
    fn test_record_missing_sections_default() {
        let record: ExtractionRecord =
            serde_json::from_value(json!({"entities": [{"name": "Go", "type": "language"}]}))
                .unwrap();
        assert_eq!(record.entities.len(), 1);
        assert!(record.events.is_empty());
        assert!(record.relationships.is_empty());
        assert!(record.source_message.is_none());
    }

    #[test]
    fn test_event_optional_fields_skipped() {
        let value = serde_json::to_value(Event::new("graduation", "attendance")).unwrap();
        assert!(value.get("date").is_none());
        assert!(value.get("location").is_none());
        assert_eq!(value["type"], "attendance");
    }
}
