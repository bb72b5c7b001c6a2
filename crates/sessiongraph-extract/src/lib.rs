//! Structured extraction from conversation sessions.
//!
//! Turns raw session messages into [`ExtractionRecord`]s by prompting a
//! completion backend, then persists them as interchange files that the
//! graph loader consumes.
//!
//! # Pipeline
//!
//! ```text
//! dataset.json ──► load_dataset() ──► SessionInput*
//!                                         │
//!                                         ▼
//!                    ExtractionEngine (per message, bounded concurrency)
//!                      prompt ─► Completer ─► RetryPolicy ─► parser
//!                                         │
//!                                         ▼
//!                    SessionSink::append() (one fragment per session)
//!                                         │
//!                                         ▼
//!                    aggregator::compact() ─► canonical JSON array
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use sessiongraph_extract::{ExtractionConfig, ExtractionEngine, SessionSink, load_dataset};
//! use sessiongraph_llm::{OllamaBackend, OllamaConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(OllamaBackend::new(OllamaConfig::default())?);
//! let config = ExtractionConfig::default();
//! let engine = ExtractionEngine::with_backend(backend, "llama3.1:8b", config);
//!
//! let inputs = load_dataset("dataset.json", 0)?;
//! let sink = SessionSink::open("llm_responses.json")?;
//! let (sessions, report) = engine.extract_all(&inputs, Some(&sink)).await?;
//! println!("{} sessions\n{report}", sessions.len());
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod parser;
pub mod prompt;
pub mod report;
pub mod retry;

pub use aggregator::{
    Deserialized, SessionSink, compact, deserialize, deserialize_detailed, read_file, serialize,
    session_indices, write_file,
};
pub use dataset::{load_dataset, parse_dataset};
pub use engine::{BackendCompleter, Completer, ExtractionConfig, ExtractionEngine};
pub use error::{AggregateError, Result};
pub use parser::{
    ParseQuality, ParsedResponse, parse_record_value, parse_response, parse_response_detailed,
};
pub use prompt::ExtractionPrompt;
pub use report::{ExtractionReport, MessageOutcome, SessionReport};
pub use retry::{RetryOutcome, RetryPolicy};

pub use sessiongraph_types::ExtractionRecord;
