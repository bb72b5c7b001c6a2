//! Shared types for the sessiongraph pipeline.
//!
//! Everything that crosses a crate boundary lives here: the per-message
//! [`ExtractionRecord`] produced by the extractor, the per-session
//! [`Session`] written to the interchange file, and the [`NodeRef`]
//! endpoints that relationships point at.

pub mod record;
pub mod session;

pub use record::{
    Entity, Event, ExtractionRecord, NodeKey, NodeLabel, NodeRef, NodeRefError, Properties,
    Relationship,
};
pub use session::{Session, SessionInput, user_id_for};
