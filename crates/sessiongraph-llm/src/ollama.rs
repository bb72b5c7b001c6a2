//! Native Ollama backend (`POST {base}/api/chat`).

use async_trait::async_trait;
use reqwest::{Client, Response, header};
use std::time::Duration;

use crate::backend::LlmBackend;
use crate::error::{LlmError, Result, classify_status, parse_retry_after_header};
use crate::types::{CompletionRequest, CompletionResponse, Message, Usage};

/// Default local Ollama endpoint.
pub const DEFAULT_OLLAMA_BASE: &str = "http://localhost:11434";

/// Local inference is slow; allow generous request time.
const DEFAULT_TIMEOUT_SECS: u64 = 600;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the Ollama backend.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Server root, without the `/api` suffix.
    pub base_url: String,

    /// HTTP-level request timeout.
    pub timeout: Duration,

    /// Name for this backend instance.
    pub name: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_BASE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            name: "ollama".to_string(),
        }
    }
}

impl OllamaConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ollama Backend
// ─────────────────────────────────────────────────────────────────────────────

pub struct OllamaBackend {
    client: Client,
    config: OllamaConfig,
}

impl OllamaBackend {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(LlmError::Config("Ollama base URL is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.config.base_url.trim_end_matches('/'))
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.config.base_url.trim_end_matches('/'))
    }

    fn to_ollama_request(request: &CompletionRequest) -> OllamaChatRequest {
        OllamaChatRequest {
            model: request.model.clone(),
            messages: request.chat_messages(),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: Some(request.max_tokens),
            },
        }
    }

    async fn handle_response(name: &str, response: Response) -> Result<CompletionResponse> {
        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        let body = response.text().await?;
        let parsed: OllamaChatResponse = serde_json::from_str(&body)?;

        let response = CompletionResponse {
            model: parsed.model,
            content: parsed.message.map(|m| m.content).unwrap_or_default(),
            finish_reason: parsed.done_reason,
            usage: Usage::new(
                parsed.prompt_eval_count.unwrap_or(0),
                parsed.eval_count.unwrap_or(0),
            ),
        };

        if response.is_blank() {
            return Err(LlmError::EmptyResponse(name.to_string()));
        }
        Ok(response)
    }

    async fn handle_error_response(response: Response) -> LlmError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after_header);
        let body = response.text().await.unwrap_or_default();

        let message = serde_json::from_str::<OllamaErrorResponse>(&body)
            .map(|e| e.error)
            .unwrap_or(body);

        classify_status(status.as_u16(), message, retry_after)
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let ollama_request = Self::to_ollama_request(&request);

        tracing::debug!(
            backend = %self.config.name,
            model = %ollama_request.model,
            messages = ollama_request.messages.len(),
            num_predict = request.max_tokens,
            "Sending Ollama chat request"
        );

        let response = self
            .client
            .post(self.chat_url())
            .json(&ollama_request)
            .send()
            .await?;

        Self::handle_response(&self.config.name, response).await
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn health_check(&self) -> Result<()> {
        let response = self.client.get(self.tags_url()).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::handle_error_response(response).await)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, serde::Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, serde::Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    model: String,
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, serde::Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, serde::Deserialize)]
struct OllamaErrorResponse {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OllamaConfig::default();
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.name, "ollama");
        assert_eq!(config.timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_chat_url_trims_slash() {
        let backend =
            OllamaBackend::new(OllamaConfig::default().with_base_url("http://gpu-box:11434/"))
                .unwrap();
        assert_eq!(backend.chat_url(), "http://gpu-box:11434/api/chat");
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let result = OllamaBackend::new(OllamaConfig::default().with_base_url(" "));
        assert!(matches!(result, Err(LlmError::Config(_))));
    }

    #[test]
    fn test_to_ollama_request() {
        let messages = vec![Message::user("I got a guitar")];
        let request = CompletionRequest::new("llama3:8b", messages, 4000)
            .with_system("extract")
            .with_temperature(0.2);
        let body = serde_json::to_value(OllamaBackend::to_ollama_request(&request)).unwrap();

        assert_eq!(body["model"], "llama3:8b");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 4000);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "I got a guitar");
        assert!((body["options"]["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }
}
