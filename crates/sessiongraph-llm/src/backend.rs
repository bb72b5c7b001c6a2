//! LLM backend trait and the scripted mock used in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::{LlmError, Result};
use crate::types::{CompletionRequest, CompletionResponse};

// ─────────────────────────────────────────────────────────────────────────────
// LLM Backend Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A black-box text-completion service.
///
/// Backends make exactly one HTTP call per `complete`; retry and timeout
/// policy belong to the caller.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Execute a completion request and return the full response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Get the name of this backend.
    fn name(&self) -> &str;

    /// Check if the backend is reachable and properly configured.
    async fn health_check(&self) -> Result<()>;
}

/// A backend that can be shared across tasks.
pub type SharedBackend = Arc<dyn LlmBackend>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Backend
// ─────────────────────────────────────────────────────────────────────────────

/// One scripted reply from [`MockBackend`].
#[derive(Debug)]
pub enum MockResponse {
    Text(String),
    Error(LlmError),
}

impl From<&str> for MockResponse {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<LlmError> for MockResponse {
    fn from(err: LlmError) -> Self {
        Self::Error(err)
    }
}

/// A mock backend for testing purposes.
///
/// Returns pre-configured replies in order. Once the script is exhausted,
/// every further request fails with a non-retryable `InvalidRequest`.
#[derive(Debug)]
pub struct MockBackend {
    name: String,
    responses: Mutex<Vec<MockResponse>>,
    request_log: Mutex<Vec<CompletionRequest>>,
}

impl MockBackend {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            name: "mock".to_string(),
            responses: Mutex::new(responses),
            request_log: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock backend with a single text response.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![MockResponse::Text(text.into())])
    }

    /// Get all requests that were made to this backend.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.request_log.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.request_log.lock().len()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = request.model.clone();
        self.request_log.lock().push(request);

        let next = {
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                None
            } else {
                Some(responses.remove(0))
            }
        };

        match next {
            Some(MockResponse::Text(text)) => Ok(CompletionResponse::new(model, text)),
            Some(MockResponse::Error(err)) => Err(err),
            None => Err(LlmError::InvalidRequest(
                "MockBackend: no more responses available".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
