//! Config file discovery and layered merging.
//!
//! Resolution order (later overrides earlier):
//! 1. `$SESSIONGRAPH_CONFIG_DIR/config.toml`, else the platform config dir
//!    (`~/.config/sessiongraph/config.toml` on Linux)
//! 2. `./sessiongraph.toml` (project-local)
//! 3. An explicit `--config <file>`
//! 4. Environment overrides (`OLLAMA_BASE_URL`, `USE_EXTRACTION_PROMPT`,
//!    `SESSIONGRAPH_MODEL`, `OPENAI_API_KEY`)

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::types::{APP_NAME, SessiongraphConfig};

/// Default config filename for project-local config.
const PROJECT_CONFIG_FILE: &str = "sessiongraph.toml";

/// Default config filename within the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Environment variable to override the config directory.
const CONFIG_DIR_ENV: &str = "SESSIONGRAPH_CONFIG_DIR";

/// Tracks where each config layer was loaded from.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSource {
    pub path: PathBuf,
    /// Whether the file was found and loaded.
    pub loaded: bool,
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SessiongraphConfig,
    /// Sources checked, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// Environment variables that overrode file values.
    pub env_overrides: Vec<String>,
    /// Problems that did not stop loading (malformed layers, plaintext keys).
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of sources that were actually loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Where to look for config layers.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions<'a> {
    /// Overrides `SESSIONGRAPH_CONFIG_DIR` and the platform default.
    pub config_dir: Option<&'a Path>,
    /// Directory holding `sessiongraph.toml`; defaults to the working dir.
    pub project_dir: Option<&'a Path>,
    /// File given with `--config`; must exist.
    pub explicit: Option<&'a Path>,
    /// Skip environment overrides.
    pub ignore_env: bool,
}

/// Discover and merge config layers, then apply environment overrides.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(LoadOptions {
        explicit,
        ..Default::default()
    })
}

/// Load configuration with explicit control over every layer.
pub fn load_config_with_options(options: LoadOptions<'_>) -> Result<LoadedConfig> {
    let mut config = SessiongraphConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    let user_path = match options.config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => user_config_path(),
    };
    if let Some(path) = user_path {
        sources.push(load_layer(&mut config, &path, &mut warnings));
    }

    let project_path = options
        .project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project_path, &mut warnings));

    // An explicitly requested file must load.
    if let Some(path) = options.explicit {
        config.merge(load_config_file(path)?);
        sources.push(ConfigSource {
            path: path.to_path_buf(),
            loaded: true,
        });
    }

    let env_overrides = if options.ignore_env {
        Vec::new()
    } else {
        apply_env_overrides(&mut config, |key| std::env::var(key).ok(), &mut warnings)
    };

    if config.llm.api_key.is_some() && !env_overrides.iter().any(|k| k == "OPENAI_API_KEY") {
        warnings.push(
            "llm.api_key is stored in plaintext; prefer the OPENAI_API_KEY environment variable"
                .to_string(),
        );
    }

    debug!(
        sources = ?sources.iter().filter(|s| s.loaded).map(|s| &s.path).collect::<Vec<_>>(),
        env_overrides = ?env_overrides,
        "Configuration loaded"
    );

    Ok(LoadedConfig {
        config,
        sources,
        env_overrides,
        warnings,
    })
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<SessiongraphConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    SessiongraphConfig::from_toml(&contents)
}

/// Save configuration to a file, creating parent directories.
pub fn save_config(config: &SessiongraphConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let contents = config.to_toml()?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })
}

/// User config directory: `SESSIONGRAPH_CONFIG_DIR`, else the platform default.
pub fn user_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

pub fn user_config_path() -> Option<PathBuf> {
    user_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// Apply environment overrides through `lookup`. Returns the variables used.
pub fn apply_env_overrides<F>(
    config: &mut SessiongraphConfig,
    lookup: F,
    warnings: &mut Vec<String>,
) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut applied = Vec::new();
    let mut read = |key: &str| {
        let value = lookup(key).filter(|v| !v.trim().is_empty())?;
        applied.push(key.to_string());
        Some(value.trim().to_string())
    };

    if let Some(url) = read("OLLAMA_BASE_URL") {
        config.llm.base_url = Some(url);
    }
    if let Some(model) = read("SESSIONGRAPH_MODEL") {
        config.llm.model = Some(model);
    }
    if let Some(raw) = read("USE_EXTRACTION_PROMPT") {
        match parse_bool(&raw) {
            Some(flag) => config.extraction.use_extraction_prompt = Some(flag),
            None => warnings.push(format!(
                "ignoring USE_EXTRACTION_PROMPT={raw:?}: expected true or false"
            )),
        }
    }
    if let Some(env) = config.llm.backend().api_key_env()
        && let Some(key) = read(env)
    {
        config.llm.api_key = Some(key);
    }

    applied
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Try to load a config file and merge it into the existing config.
///
/// Missing files are skipped; malformed ones are reported as warnings.
fn load_layer(
    config: &mut SessiongraphConfig,
    path: &Path,
    warnings: &mut Vec<String>,
) -> ConfigSource {
    if !path.is_file() {
        return ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            }
        }
        Err(e) => {
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            ConfigSource {
                path: path.to_path_buf(),
                loaded: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn options<'a>(user: &'a TempDir, project: &'a TempDir) -> LoadOptions<'a> {
        LoadOptions {
            config_dir: Some(user.path()),
            project_dir: Some(project.path()),
            explicit: None,
            ignore_env: true,
        }
    }

    #[test]
    fn test_no_files_gives_defaults() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();

        let loaded = load_config_with_options(options(&user, &project)).unwrap();
        assert_eq!(loaded.config, SessiongraphConfig::default());
        assert!(loaded.loaded_from().is_empty());
        assert_eq!(loaded.sources.len(), 2);
    }

    #[test]
    fn test_layers_merge_in_order() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        std::fs::write(
            user.path().join("config.toml"),
            "[llm]\nmodel = \"user-model\"\ntemperature = 0.7\n",
        )
        .unwrap();
        std::fs::write(
            project.path().join("sessiongraph.toml"),
            "[llm]\nmodel = \"project-model\"\n",
        )
        .unwrap();
        let explicit = project.path().join("run.toml");
        std::fs::write(&explicit, "[extraction]\nconcurrency = 1\n").unwrap();

        let loaded = load_config_with_options(LoadOptions {
            explicit: Some(&explicit),
            ..options(&user, &project)
        })
        .unwrap();

        assert_eq!(loaded.config.llm.model(), "project-model");
        assert_eq!(loaded.config.llm.temperature(), 0.7);
        assert_eq!(loaded.config.extraction.concurrency(), 1);
        assert_eq!(loaded.loaded_from().len(), 3);
    }

    #[test]
    fn test_malformed_layer_warns_but_continues() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        std::fs::write(user.path().join("config.toml"), "[llm\nbroken").unwrap();

        let loaded = load_config_with_options(options(&user, &project)).unwrap();
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.loaded_from().is_empty());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let missing = project.path().join("nope.toml");

        let result = load_config_with_options(LoadOptions {
            explicit: Some(&missing),
            ..options(&user, &project)
        });
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OLLAMA_BASE_URL", "http://gpu-box:11434"),
            ("SESSIONGRAPH_MODEL", "qwen2.5:7b"),
            ("USE_EXTRACTION_PROMPT", "FALSE"),
        ]);
        let mut config = SessiongraphConfig::new();
        let mut warnings = Vec::new();

        let applied = apply_env_overrides(
            &mut config,
            |key| env.get(key).map(|v| v.to_string()),
            &mut warnings,
        );

        assert_eq!(applied.len(), 3);
        assert_eq!(config.llm.base_url(), "http://gpu-box:11434");
        assert_eq!(config.llm.model(), "qwen2.5:7b");
        assert!(!config.extraction.use_extraction_prompt());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_env_invalid_bool_warns() {
        let mut config = SessiongraphConfig::new();
        let mut warnings = Vec::new();
        apply_env_overrides(
            &mut config,
            |key| (key == "USE_EXTRACTION_PROMPT").then(|| "maybe".to_string()),
            &mut warnings,
        );
        assert_eq!(warnings.len(), 1);
        assert!(config.extraction.use_extraction_prompt());
    }

    #[test]
    fn test_openai_key_from_env() {
        let mut config = SessiongraphConfig::from_toml("[llm]\nbackend = \"openai\"\n").unwrap();
        let mut warnings = Vec::new();
        apply_env_overrides(
            &mut config,
            |key| (key == "OPENAI_API_KEY").then(|| "sk-env".to_string()),
            &mut warnings,
        );
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-env"));
        config.validate().unwrap();
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = SessiongraphConfig::from_toml("[llm]\nmodel = \"saved\"\n").unwrap();

        save_config(&config, &path).unwrap();
        assert_eq!(load_config_file(&path).unwrap(), config);
    }
}
