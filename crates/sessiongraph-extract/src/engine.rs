//! Extraction engine: per-message completion, retry, and parsing.
//!
//! Each non-empty message of a session is sent to the completion service
//! independently. Calls run concurrently under one shared permit pool, are
//! retried per [`RetryPolicy`], and their output goes through the tolerant
//! parser. A message that never yields a completion gets an empty record;
//! a session is never aborted.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use sessiongraph_llm::{CompletionRequest, LlmError, Message, SharedBackend};
use sessiongraph_types::{ExtractionRecord, Session, SessionInput};

use crate::aggregator::SessionSink;
use crate::error::{AggregateError, Result};
use crate::parser::{ParseQuality, parse_response_detailed};
use crate::prompt::ExtractionPrompt;
use crate::report::{ExtractionReport, MessageOutcome, SessionReport};
use crate::retry::RetryPolicy;

/// Default sampling temperature for extraction.
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Default generation limit for one extraction.
pub const DEFAULT_MAX_TOKENS: u32 = 4000;

// ─────────────────────────────────────────────────────────────────────────────
// Completer
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for text completion, enabling test mocking.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> sessiongraph_llm::Result<String>;
}

/// Production completer backed by an [`LlmBackend`](sessiongraph_llm::LlmBackend).
pub struct BackendCompleter {
    backend: SharedBackend,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl BackendCompleter {
    pub fn new(backend: SharedBackend, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl Completer for BackendCompleter {
    async fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> sessiongraph_llm::Result<String> {
        let mut request =
            CompletionRequest::new(&self.model, vec![Message::user(prompt)], self.max_tokens)
                .with_temperature(self.temperature);
        if let Some(system) = system {
            request = request.with_system(system);
        }

        let response = self.backend.complete(request).await?;
        if response.is_blank() {
            return Err(LlmError::EmptyResponse(self.backend.name().to_string()));
        }
        if response.is_truncated() {
            debug!(
                model = %self.model,
                max_tokens = self.max_tokens,
                "Completion stopped at the token limit"
            );
        }
        Ok(response.content)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the extraction engine.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub retry: RetryPolicy,
    /// Maximum completions in flight across all sessions.
    pub concurrency: usize,
    /// Sessions processed concurrently by [`ExtractionEngine::extract_all`].
    pub session_concurrency: usize,
    /// Wrap messages in the extraction prompt; otherwise send them raw.
    pub use_extraction_prompt: bool,
    /// Replaces the built-in system prompt.
    pub system_prompt: Option<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            concurrency: 4,
            session_concurrency: 2,
            use_extraction_prompt: true,
            system_prompt: None,
        }
    }
}

/// Turns sessions of raw messages into sessions of extraction records.
pub struct ExtractionEngine {
    completer: Arc<dyn Completer>,
    config: ExtractionConfig,
    permits: Semaphore,
}

impl ExtractionEngine {
    pub fn new(completer: Arc<dyn Completer>, config: ExtractionConfig) -> Self {
        let permits = Semaphore::new(config.concurrency.max(1));
        Self {
            completer,
            config,
            permits,
        }
    }

    /// Create an engine that completes through `backend` with `model`.
    pub fn with_backend(
        backend: SharedBackend,
        model: impl Into<String>,
        config: ExtractionConfig,
    ) -> Self {
        Self::new(Arc::new(BackendCompleter::new(backend, model)), config)
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// User prompt and system prompt for one message.
    fn prompt_for(&self, message: &str) -> (String, Option<&str>) {
        if self.config.use_extraction_prompt {
            let system = self
                .config
                .system_prompt
                .as_deref()
                .unwrap_or(ExtractionPrompt::system());
            (ExtractionPrompt::build(message), Some(system))
        } else {
            (message.to_string(), self.config.system_prompt.as_deref())
        }
    }

    /// Extract one message. Always yields a record.
    pub async fn extract_message(
        &self,
        message_index: usize,
        message: &str,
    ) -> (ExtractionRecord, MessageOutcome) {
        let (prompt, system) = self.prompt_for(message);

        // The pool is never closed, so a permit is always granted.
        let _permit = self.permits.acquire().await.ok();
        let outcome = self
            .config
            .retry
            .run("completion", |_| self.completer.complete(&prompt, system))
            .await;
        let attempts = outcome.attempts;

        match outcome.result {
            Ok(raw) => {
                let parsed = parse_response_detailed(&raw);
                debug!(
                    message_index,
                    attempts,
                    quality = %parsed.quality,
                    entities = parsed.record.entities.len(),
                    events = parsed.record.events.len(),
                    relationships = parsed.record.relationships.len(),
                    "Message extracted"
                );
                (
                    parsed.record.with_source(message),
                    MessageOutcome {
                        message_index,
                        attempts,
                        quality: parsed.quality,
                        error: None,
                        warnings: parsed.warnings,
                    },
                )
            }
            Err(e) => {
                warn!(
                    message_index,
                    attempts,
                    error_kind = e.kind(),
                    error = %e,
                    "Completion failed, using empty record"
                );
                (
                    ExtractionRecord::empty(Some(message.to_string())),
                    MessageOutcome {
                        message_index,
                        attempts,
                        quality: ParseQuality::Unusable,
                        error: Some(e.to_string()),
                        warnings: Vec::new(),
                    },
                )
            }
        }
    }

    /// Extract every non-empty message of `input`, in message order.
    pub async fn extract(&self, input: &SessionInput) -> Session {
        self.extract_detailed(input).await.0
    }

    /// Like [`extract`](Self::extract), with per-message statistics.
    pub async fn extract_detailed(&self, input: &SessionInput) -> (Session, SessionReport) {
        let messages: Vec<(usize, &str)> = input.non_empty_messages().collect();

        let mut results: Vec<(ExtractionRecord, MessageOutcome)> = stream::iter(messages)
            .map(|(index, text)| self.extract_message(index, text))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(_, outcome)| outcome.message_index);

        let (records, outcomes): (Vec<_>, Vec<_>) = results.into_iter().unzip();
        let session = input.clone().into_session(records);

        let report = SessionReport {
            session_index: session.session_index,
            messages: outcomes,
            entities: session.entity_count(),
            events: session.event_count(),
            relationships: session.relationship_count(),
        };

        info!(
            session_index = session.session_index,
            messages = report.messages.len(),
            entities = report.entities,
            events = report.events,
            relationships = report.relationships,
            failed = report.failed_completions(),
            "Session extracted"
        );

        (session, report)
    }

    /// Extract many sessions concurrently.
    ///
    /// Each finished session is appended to `sink` as soon as it completes.
    /// Returned sessions are ordered by `session_index`.
    pub async fn extract_all(
        &self,
        inputs: &[SessionInput],
        sink: Option<&SessionSink>,
    ) -> Result<(Vec<Session>, ExtractionReport)> {
        self.extract_all_with(inputs, sink, |_| {}).await
    }

    /// Like [`extract_all`](Self::extract_all), calling `on_session` after
    /// each session is written.
    pub async fn extract_all_with<F>(
        &self,
        inputs: &[SessionInput],
        sink: Option<&SessionSink>,
        on_session: F,
    ) -> Result<(Vec<Session>, ExtractionReport)>
    where
        F: Fn(&SessionReport) + Sync,
    {
        let on_session = &on_session;

        let mut finished: Vec<(Session, SessionReport)> = stream::iter(inputs)
            .map(|input| async move {
                let (session, report) = self.extract_detailed(input).await;
                if let Some(sink) = sink {
                    sink.append(&session)?;
                }
                on_session(&report);
                Ok::<_, AggregateError>((session, report))
            })
            .buffer_unordered(self.config.session_concurrency.max(1))
            .try_collect()
            .await?;
        finished.sort_by_key(|(session, _)| session.session_index);

        let mut report = ExtractionReport::default();
        for (_, session_report) in &finished {
            report.absorb(session_report);
        }
        info!(
            sessions = report.sessions,
            messages = report.messages,
            partial = report.partial,
            unusable = report.unusable,
            failed = report.failed_completions,
            "Extraction finished"
        );

        let sessions = finished.into_iter().map(|(session, _)| session).collect();
        Ok((sessions, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use sessiongraph_llm::{MockBackend, MockResponse};
    use sessiongraph_types::NodeRef;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Echoes the prompt back as a single entity, after a delay that makes
    /// shorter prompts finish first.
    struct EchoCompleter {
        calls: Mutex<Vec<(String, Option<String>)>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl EchoCompleter {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Completer for EchoCompleter {
        async fn complete(
            &self,
            prompt: &str,
            system: Option<&str>,
        ) -> sessiongraph_llm::Result<String> {
            self.calls
                .lock()
                .push((prompt.to_string(), system.map(str::to_string)));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(10 * prompt.len() as u64)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(serde_json::json!({
                "entities": [{"name": prompt, "type": "object"}],
                "relationships": [{"source": "USER", "target": prompt, "type": "HAS"}]
            })
            .to_string())
        }
    }

    struct FailingCompleter {
        calls: AtomicUsize,
        error: fn() -> LlmError,
    }

    #[async_trait]
    impl Completer for FailingCompleter {
        async fn complete(&self, _: &str, _: Option<&str>) -> sessiongraph_llm::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err((self.error)())
        }
    }

    fn raw_config(concurrency: usize) -> ExtractionConfig {
        ExtractionConfig {
            retry: RetryPolicy::immediate(3),
            concurrency,
            use_extraction_prompt: false,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_follow_message_order() {
        let completer = Arc::new(EchoCompleter::new());
        let engine = ExtractionEngine::new(completer.clone(), raw_config(4));
        let input = SessionInput::new(
            7,
            "2023/05/20",
            vec![
                "a long first message".into(),
                "   ".into(),
                "second".into(),
                "3rd".into(),
            ],
        );

        let session = engine.extract(&input).await;

        assert_eq!(session.session_index, 7);
        assert_eq!(session.session_date, "2023/05/20");
        let names: Vec<_> = session
            .records
            .iter()
            .map(|r| r.entities[0].name.as_str())
            .collect();
        assert_eq!(names, vec!["a long first message", "second", "3rd"]);
        assert_eq!(session.records[1].source_message.as_deref(), Some("second"));
        assert_eq!(session.records[2].relationships[0].source_ref, NodeRef::User);
        assert_eq!(completer.calls.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bounded_across_sessions() {
        let completer = Arc::new(EchoCompleter::new());
        let config = ExtractionConfig {
            session_concurrency: 3,
            ..raw_config(2)
        };
        let engine = ExtractionEngine::new(completer.clone(), config);
        let inputs: Vec<_> = (0..3)
            .map(|i| SessionInput::new(i, "", vec!["one".into(), "two".into(), "three".into()]))
            .collect();

        let (sessions, report) = engine.extract_all(&inputs, None).await.unwrap();

        assert_eq!(sessions.len(), 3);
        assert_eq!(report.messages, 9);
        assert!(completer.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_always_failing_completer_yields_empty_records() {
        let completer = Arc::new(FailingCompleter {
            calls: AtomicUsize::new(0),
            error: || LlmError::Network("connection refused".into()),
        });
        let engine = ExtractionEngine::new(completer.clone(), raw_config(1));
        let input = SessionInput::new(0, "", vec!["hello".into(), "bye".into()]);

        let (session, report) = engine.extract_detailed(&input).await;

        assert_eq!(session.records.len(), 2);
        assert!(session.records.iter().all(ExtractionRecord::is_empty));
        assert_eq!(session.records[0].source_message.as_deref(), Some("hello"));
        assert_eq!(completer.calls.load(Ordering::SeqCst), 6);
        assert_eq!(report.failed_completions(), 2);
        assert_eq!(report.total_attempts(), 6);
    }

    #[tokio::test]
    async fn test_non_retryable_error_not_retried() {
        let completer = Arc::new(FailingCompleter {
            calls: AtomicUsize::new(0),
            error: || LlmError::InvalidRequest("model not found".into()),
        });
        let engine = ExtractionEngine::new(completer.clone(), raw_config(1));

        let (record, outcome) = engine.extract_message(0, "hello").await;

        assert!(record.is_empty());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(completer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_selection() {
        let completer = Arc::new(EchoCompleter::new());
        let engine = ExtractionEngine::new(
            completer.clone(),
            ExtractionConfig {
                retry: RetryPolicy::immediate(1),
                ..Default::default()
            },
        );
        engine.extract_message(0, "I play guitar").await;

        let raw = ExtractionEngine::new(completer.clone(), raw_config(1));
        raw.extract_message(0, "I play guitar").await;

        let calls = completer.calls.lock();
        assert!(calls[0].0.contains("Now extract from this message"));
        assert_eq!(calls[0].1.as_deref(), Some(ExtractionPrompt::system()));
        assert_eq!(calls[1], ("I play guitar".to_string(), None));
    }

    #[tokio::test]
    async fn test_backend_completer_retries_blank_response() {
        let backend = Arc::new(MockBackend::new(vec![
            MockResponse::from("   "),
            MockResponse::from(r#"{"entities": [{"name": "guitar", "type": "object"}]}"#),
        ]));
        let engine = ExtractionEngine::with_backend(backend.clone(), "llama3:8b", raw_config(1));

        let (record, outcome) = engine.extract_message(0, "I have a guitar").await;

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.quality, ParseQuality::WellFormed);
        assert_eq!(record.entities[0].name, "guitar");

        let requests = backend.requests();
        assert_eq!(requests[0].model, "llama3:8b");
        assert_eq!(requests[0].max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(requests[0].temperature, Some(DEFAULT_TEMPERATURE));
    }
}
