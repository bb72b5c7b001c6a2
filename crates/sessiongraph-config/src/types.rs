//! Configuration types.
//!
//! Every field is optional so that layers can be merged: a later layer only
//! overrides what it sets. Accessors fill in defaults.
//!
//! ```toml
//! [llm]
//! backend = "ollama"
//! model = "llama3:8b"
//! base_url = "http://localhost:11434"
//! temperature = 0.2
//! max_tokens = 4000
//!
//! [extraction]
//! max_attempts = 3
//! initial_backoff_ms = 1000
//! concurrency = 4
//! use_extraction_prompt = true
//! output_dir = "output"
//!
//! [graph]
//! database = "~/.local/share/sessiongraph/graph.db"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

pub const DEFAULT_MODEL: &str = "llama3:8b";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Application name for directory resolution.
pub(crate) const APP_NAME: &str = "sessiongraph";

/// Merged configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessiongraphConfig {
    pub llm: LlmConfig,
    pub extraction: ExtractionSettings,
    pub graph: GraphConfig,
    pub logging: LoggingConfig,
}

impl SessiongraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: SessiongraphConfig) {
        self.llm.merge(other.llm);
        self.extraction.merge(other.extraction);
        self.graph.merge(other.graph);
        self.logging.merge(other.logging);
    }

    /// Reject values no run could use.
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.llm.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(invalid("llm.temperature", format!("{t} is outside 0.0..=2.0")));
        }
        if self.extraction.max_attempts == Some(0) {
            return Err(invalid("extraction.max_attempts", "must be at least 1"));
        }
        if self.extraction.concurrency == Some(0) {
            return Err(invalid("extraction.concurrency", "must be at least 1"));
        }
        if let Some(m) = self.extraction.backoff_multiplier
            && m < 1.0
        {
            return Err(invalid("extraction.backoff_multiplier", "must be at least 1.0"));
        }
        if self.llm.backend() == Backend::Openai
            && self.llm.base_url.is_none()
            && self.llm.api_key.is_none()
        {
            return Err(invalid(
                "llm.api_key",
                "the openai backend needs an api_key (or OPENAI_API_KEY) unless base_url points at a local server",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn overlay<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// [llm]
// ─────────────────────────────────────────────────────────────────────────────

/// Completion backend provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Ollama,
    /// OpenAI or any server speaking its chat-completions API.
    Openai,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Openai => "openai",
        }
    }

    /// Environment variable holding this backend's API key, if any.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::Ollama => None,
            Self::Openai => Some("OPENAI_API_KEY"),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `[llm]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: Option<Backend>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// Prefer the environment variable; a warning is emitted if set here.
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// HTTP timeout for one request.
    pub timeout_secs: Option<u64>,
}

impl LlmConfig {
    fn merge(&mut self, other: LlmConfig) {
        overlay(&mut self.backend, other.backend);
        overlay(&mut self.model, other.model);
        overlay(&mut self.base_url, other.base_url);
        overlay(&mut self.api_key, other.api_key);
        overlay(&mut self.temperature, other.temperature);
        overlay(&mut self.max_tokens, other.max_tokens);
        overlay(&mut self.timeout_secs, other.timeout_secs);
    }

    pub fn backend(&self) -> Backend {
        self.backend.unwrap_or_default()
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(match self.backend() {
            Backend::Ollama => DEFAULT_OLLAMA_URL,
            Backend::Openai => DEFAULT_OPENAI_URL,
        })
    }

    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(0.2)
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(4000)
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(600)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// [extraction]
// ─────────────────────────────────────────────────────────────────────────────

/// `[extraction]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub max_backoff_ms: Option<u64>,
    /// Deadline for one completion attempt; 0 disables it.
    pub attempt_timeout_secs: Option<u64>,
    /// Completions in flight at once.
    pub concurrency: Option<usize>,
    /// Sessions extracted at once.
    pub session_concurrency: Option<usize>,
    pub use_extraction_prompt: Option<bool>,
    pub system_prompt: Option<String>,
    /// 0 means every session in the dataset.
    pub max_sessions: Option<usize>,
    pub output_dir: Option<PathBuf>,
}

impl ExtractionSettings {
    fn merge(&mut self, other: ExtractionSettings) {
        overlay(&mut self.max_attempts, other.max_attempts);
        overlay(&mut self.initial_backoff_ms, other.initial_backoff_ms);
        overlay(&mut self.backoff_multiplier, other.backoff_multiplier);
        overlay(&mut self.max_backoff_ms, other.max_backoff_ms);
        overlay(&mut self.attempt_timeout_secs, other.attempt_timeout_secs);
        overlay(&mut self.concurrency, other.concurrency);
        overlay(&mut self.session_concurrency, other.session_concurrency);
        overlay(&mut self.use_extraction_prompt, other.use_extraction_prompt);
        overlay(&mut self.system_prompt, other.system_prompt);
        overlay(&mut self.max_sessions, other.max_sessions);
        overlay(&mut self.output_dir, other.output_dir);
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(3)
    }

    pub fn initial_backoff_ms(&self) -> u64 {
        self.initial_backoff_ms.unwrap_or(1000)
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier.unwrap_or(2.0)
    }

    pub fn max_backoff_ms(&self) -> u64 {
        self.max_backoff_ms.unwrap_or(30_000)
    }

    /// `None` when attempts may run indefinitely.
    pub fn attempt_timeout_secs(&self) -> Option<u64> {
        match self.attempt_timeout_secs.unwrap_or(300) {
            0 => None,
            secs => Some(secs),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or(4)
    }

    pub fn session_concurrency(&self) -> usize {
        self.session_concurrency.unwrap_or(2)
    }

    pub fn use_extraction_prompt(&self) -> bool {
        self.use_extraction_prompt.unwrap_or(true)
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions.unwrap_or(0)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("output"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// [graph] / [logging]
// ─────────────────────────────────────────────────────────────────────────────

/// `[graph]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// SQLite database file.
    pub database: Option<PathBuf>,
}

impl GraphConfig {
    fn merge(&mut self, other: GraphConfig) {
        overlay(&mut self.database, other.database);
    }

    /// Configured database, else `<data dir>/sessiongraph/graph.db`.
    pub fn database(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join(APP_NAME))
                .unwrap_or_else(|| PathBuf::from("."))
                .join("graph.db")
        })
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for the rotating JSON log; defaults to `<config dir>/logs`.
    pub dir: Option<PathBuf>,
    /// Set to false to disable the file log.
    pub file: Option<bool>,
}

impl LoggingConfig {
    fn merge(&mut self, other: LoggingConfig) {
        overlay(&mut self.dir, other.dir);
        overlay(&mut self.file, other.file);
    }

    pub fn file_enabled(&self) -> bool {
        self.file.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = SessiongraphConfig::from_toml(
            r#"
            [llm]
            backend = "openai"
            model = "gpt-4o-mini"
            api_key = "sk-test"
            temperature = 0.0

            [extraction]
            max_attempts = 5
            attempt_timeout_secs = 0
            use_extraction_prompt = false

            [graph]
            database = "/tmp/graph.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.backend(), Backend::Openai);
        assert_eq!(config.llm.base_url(), DEFAULT_OPENAI_URL);
        assert_eq!(config.llm.max_tokens(), 4000);
        assert_eq!(config.extraction.max_attempts(), 5);
        assert_eq!(config.extraction.attempt_timeout_secs(), None);
        assert!(!config.extraction.use_extraction_prompt());
        assert_eq!(config.graph.database(), PathBuf::from("/tmp/graph.db"));
        config.validate().unwrap();
    }

    #[test]
    fn test_defaults() {
        let config = SessiongraphConfig::new();
        assert_eq!(config.llm.backend(), Backend::Ollama);
        assert_eq!(config.llm.model(), DEFAULT_MODEL);
        assert_eq!(config.llm.base_url(), DEFAULT_OLLAMA_URL);
        assert_eq!(config.llm.temperature(), 0.2);
        assert_eq!(config.extraction.attempt_timeout_secs(), Some(300));
        assert!(config.extraction.use_extraction_prompt());
        assert!(config.logging.file_enabled());
        assert!(config.graph.database().ends_with("graph.db"));
    }

    #[test]
    fn test_merge_overrides_only_set_fields() {
        let mut base = SessiongraphConfig::from_toml(
            "[llm]\nmodel = \"base-model\"\ntemperature = 0.5\n[extraction]\nconcurrency = 8\n",
        )
        .unwrap();
        let layer = SessiongraphConfig::from_toml("[llm]\nmodel = \"override\"\n").unwrap();
        base.merge(layer);

        assert_eq!(base.llm.model(), "override");
        assert_eq!(base.llm.temperature(), 0.5);
        assert_eq!(base.extraction.concurrency(), 8);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SessiongraphConfig::new();
        config.extraction.max_attempts = Some(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "extraction.max_attempts"
        ));

        let config = SessiongraphConfig::from_toml("[llm]\nbackend = \"openai\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config =
            SessiongraphConfig::from_toml("[llm]\nmodel = \"m\"\n[logging]\nfile = false\n")
                .unwrap();
        let back = SessiongraphConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(SessiongraphConfig::from_toml("[llm]\nbackend = \"bard\"\n").is_err());
    }
}
