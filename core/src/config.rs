//! Configuration
//!
//! Sources, lowest to highest precedence:
//! 1. Built-in defaults
//! 2. TOML file: `--config <path>`, `CADENCE_CONFIG_PATH`, or `./cadence.toml` if present
//! 3. `CADENCE_*` environment variables, `__` between section and key
//!    (e.g. `CADENCE_HISTORY__BACKEND=sqlite`); `.env` is loaded first
//! 4. Explicit builder overrides (CLI flags)

use crate::engine::Limits;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const ENV_PREFIX: &str = "CADENCE";
const DEFAULT_FILE: &str = "cadence";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub limits: LimitsConfig,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_steps: u64,
    pub max_depth: usize,
    pub max_collection_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    Jsonl,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub backend: HistoryBackend,
    /// Directory of `<session>.jsonl` files
    pub dir: PathBuf,
    pub database_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive
    pub filter: String,
}

impl From<&LimitsConfig> for Limits {
    fn from(config: &LimitsConfig) -> Self {
        Limits {
            max_steps: config.max_steps,
            max_depth: config.max_depth,
            max_collection_len: config.max_collection_len,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from file and environment with no overrides
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    pub fn limits(&self) -> Limits {
        Limits::from(&self.limits)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_steps == 0 {
            return Err(ConfigError::Invalid("limits.max_steps must be greater than 0".into()));
        }
        if self.limits.max_depth == 0 {
            return Err(ConfigError::Invalid("limits.max_depth must be greater than 0".into()));
        }
        if self.limits.max_collection_len == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_collection_len must be greater than 0".into(),
            ));
        }
        match self.history.backend {
            HistoryBackend::Sqlite if self.history.database_url.trim().is_empty() => Err(
                ConfigError::Invalid("history.database_url is required for the sqlite backend".into()),
            ),
            HistoryBackend::Jsonl if self.history.dir.as_os_str().is_empty() => Err(
                ConfigError::Invalid("history.dir is required for the jsonl backend".into()),
            ),
            _ => Ok(()),
        }
    }
}

/* ===================== Builder ===================== */

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    database_url: Option<String>,
    history_dir: Option<PathBuf>,
    backend: Option<HistoryBackend>,
}

impl ConfigBuilder {
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn database_url(mut self, url: Option<String>) -> Self {
        self.database_url = url;
        self
    }

    pub fn history_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.history_dir = dir;
        self
    }

    pub fn backend(mut self, backend: Option<HistoryBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Limits::default();
        let mut builder = config::Config::builder()
            .set_default("limits.max_steps", defaults.max_steps as i64)?
            .set_default("limits.max_depth", defaults.max_depth as i64)?
            .set_default("limits.max_collection_len", defaults.max_collection_len as i64)?
            .set_default("history.backend", "jsonl")?
            .set_default("history.dir", ".cadence/history")?
            .set_default("history.database_url", "sqlite://.cadence/history.db")?
            .set_default("logging.filter", "info")?;

        let explicit_path = self
            .config_path
            .or_else(|| std::env::var(format!("{}_CONFIG_PATH", ENV_PREFIX)).ok().map(PathBuf::from));
        builder = match explicit_path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_FILE).required(false)),
        };

        builder = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("history.database_url", self.database_url)?
            .set_override_option(
                "history.dir",
                self.history_dir.map(|dir| dir.to_string_lossy().into_owned()),
            )?
            .set_override_option(
                "history.backend",
                self.backend.map(|backend| match backend {
                    HistoryBackend::Jsonl => "jsonl",
                    HistoryBackend::Sqlite => "sqlite",
                }),
            )?;

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(backend = ?config.history.backend, "configuration loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_match_engine_limits() {
        let file = write_config("");
        let config = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .build()
            .unwrap();

        assert_eq!(config.limits(), Limits::default());
    }

    #[test]
    fn test_file_values_override_defaults() {
        let file = write_config(
            r#"
            [limits]
            max_steps = 500

            [history]
            backend = "sqlite"
            database_url = "sqlite::memory:"
            "#,
        );

        let config = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .build()
            .unwrap();

        assert_eq!(config.limits.max_steps, 500);
        assert_eq!(config.limits.max_depth, Limits::default().max_depth);
        assert_eq!(config.history.backend, HistoryBackend::Sqlite);
        assert_eq!(config.history.database_url, "sqlite::memory:");
    }

    #[test]
    fn test_builder_overrides_win_over_file() {
        let file = write_config("[history]\ndir = \"from-file\"\n");

        let config = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .history_dir(Some(PathBuf::from("from-flag")))
            .build()
            .unwrap();

        assert_eq!(config.history.dir, PathBuf::from("from-flag"));
    }

    #[test]
    fn test_zero_limit_is_rejected() {
        let file = write_config("[limits]\nmax_depth = 0\n");

        let result = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .build();

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Config::builder()
            .config_path(Some(PathBuf::from("/nonexistent/cadence.toml")))
            .build();

        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_config_renders_as_toml() {
        let file = write_config("");
        let config = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .build()
            .unwrap();

        let rendered = toml::to_string_pretty(&config).unwrap();
        assert!(rendered.contains("[limits]"));
        assert!(rendered.contains("backend = \"jsonl\""));
    }
}
