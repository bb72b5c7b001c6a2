//! Text-completion backends for the sessiongraph extractor.
//!
//! The core abstraction is the [`LlmBackend`] trait. Two HTTP providers
//! implement it:
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  LlmBackend trait                    │
//! │  - complete() -> CompletionResponse  │
//! │  - health_check()                    │
//! └──────────────────────────────────────┘
//!                  │
//!        ┌─────────┴─────────┐
//!        ▼                   ▼
//!  ┌───────────┐     ┌───────────────┐
//!  │  Ollama   │     │ OpenAI-compat │
//!  │ /api/chat │     │ /chat/compl.. │
//!  └───────────┘     └───────────────┘
//! ```
//!
//! Backends perform a single request per call. Retries, per-attempt
//! timeouts and backoff are applied by the extraction engine.

pub mod backend;
pub mod error;
pub mod ollama;
pub mod openai;
pub mod types;

pub use backend::{LlmBackend, MockBackend, MockResponse, SharedBackend};
pub use error::{LlmError, Result};
pub use ollama::{OllamaBackend, OllamaConfig};
pub use openai::{OpenAiBackend, OpenAiConfig};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, Usage};
