//! Session-level containers: the extracted [`Session`] and its input form.

use serde::{Deserialize, Serialize};

use crate::record::ExtractionRecord;

/// Identifier of the User node owned by session `session_index`.
pub fn user_id_for(session_index: u64) -> String {
    format!("user_session_{session_index}")
}

/// One conversation with its per-message extraction records.
///
/// Extra keys found in the interchange file (e.g. `question_category`) are
/// kept in `metadata` and written back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_index: u64,
    #[serde(default)]
    pub session_date: String,
    #[serde(rename = "llm_response", default)]
    pub records: Vec<ExtractionRecord>,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Session {
    pub fn new(session_index: u64, session_date: impl Into<String>) -> Self {
        Self {
            session_index,
            session_date: session_date.into(),
            records: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_records(mut self, records: Vec<ExtractionRecord>) -> Self {
        self.records = records;
        self
    }

    /// The id of this session's User node.
    pub fn user_id(&self) -> String {
        user_id_for(self.session_index)
    }

    pub fn entity_count(&self) -> usize {
        self.records.iter().map(|r| r.entities.len()).sum()
    }

    pub fn event_count(&self) -> usize {
        self.records.iter().map(|r| r.events.len()).sum()
    }

    pub fn relationship_count(&self) -> usize {
        self.records.iter().map(|r| r.relationships.len()).sum()
    }
}

/// An unextracted session as read from the dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInput {
    pub session_index: u64,
    #[serde(default)]
    pub session_date: String,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl SessionInput {
    pub fn new(session_index: u64, session_date: impl Into<String>, messages: Vec<String>) -> Self {
        Self {
            session_index,
            session_date: session_date.into(),
            messages,
            metadata: serde_json::Map::new(),
        }
    }

    /// Attach extracted records, carrying the date and metadata over.
    pub fn into_session(self, records: Vec<ExtractionRecord>) -> Session {
        Session {
            session_index: self.session_index,
            session_date: self.session_date,
            records,
            metadata: self.metadata,
        }
    }

    /// Non-blank messages, numbered in order of appearance.
    pub fn non_empty_messages(&self) -> impl Iterator<Item = (usize, &str)> {
        self.messages
            .iter()
            .map(String::as_str)
            .filter(|m| !m.trim().is_empty())
            .enumerate()
    }
}
