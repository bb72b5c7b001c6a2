//! Configuration for sessiongraph.
//!
//! Layered TOML files merged with environment overrides. See
//! [`discovery`] for the resolution order.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadOptions, LoadedConfig, apply_env_overrides, load_config,
    load_config_file, load_config_with_options, save_config, user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::{
    Backend, DEFAULT_MODEL, DEFAULT_OLLAMA_URL, DEFAULT_OPENAI_URL, ExtractionSettings,
    GraphConfig, LlmConfig, LoggingConfig, SessiongraphConfig,
};
