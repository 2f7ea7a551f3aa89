use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIG_FILE: &str = "memoria.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub subquery: SubqueryConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Defaults to `<data_dir>/workflow.db`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Completed turns loaded into the prompt context.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_max_clarifications")]
    pub max_clarifications: usize,
    #[serde(default = "default_retrieval_concurrency")]
    pub retrieval_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubqueryConfig {
    #[serde(default = "default_subquery_url")]
    pub base_url: String,
    #[serde(default = "default_subquery_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_url")]
    pub base_url: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_retention_cron")]
    pub cron: String,
    #[serde(default = "default_event_ttl_hours")]
    pub event_ttl_hours: u64,
    #[serde(default = "default_run_retention_days")]
    pub run_retention_days: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    17990
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_history_turns() -> usize {
    5
}
fn default_max_clarifications() -> usize {
    3
}
fn default_retrieval_concurrency() -> usize {
    4
}
fn default_subquery_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_subquery_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_retrieval_url() -> String {
    "http://127.0.0.1:8700/retrieve".to_string()
}
fn default_top_k() -> usize {
    8
}
fn default_retention_cron() -> String {
    "0 0 3 * * *".to_string()
}
fn default_event_ttl_hours() -> u64 {
    24
}
fn default_run_retention_days() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
            max_clarifications: default_max_clarifications(),
            retrieval_concurrency: default_retrieval_concurrency(),
        }
    }
}

impl Default for SubqueryConfig {
    fn default() -> Self {
        Self {
            base_url: default_subquery_url(),
            model: default_subquery_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_url: default_retrieval_url(),
            top_k: default_top_k(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cron: default_retention_cron(),
            event_ttl_hours: default_event_ttl_hours(),
            run_retention_days: default_run_retention_days(),
        }
    }
}

/// `MEMORIA_DATA_DIR`, else `~/.memoria`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MEMORIA_DATA_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".memoria")
}

impl EngineConfig {
    /// Reads `path`, or `<data_dir>/memoria.toml` when no path is given.
    /// A missing default file yields the built-in defaults; a missing
    /// explicit file is an error.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let (config_path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (data_dir().join(CONFIG_FILE), false),
        };
        if !explicit && !config_path.exists() {
            info!("No {} found, using defaults.", CONFIG_FILE);
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("reading {}", config_path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("parsing {}", config_path.display()))?;
        info!("Loaded configuration from {}", config_path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Applies `MEMORIA_*` overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MEMORIA_API_HOST").filter(|h| !h.trim().is_empty()) {
            self.server.host = host;
        }
        if let Some(port) = lookup("MEMORIA_API_PORT").and_then(|p| p.trim().parse().ok()) {
            self.server.port = port;
        }
        if let Some(level) = lookup("MEMORIA_LOG_LEVEL").filter(|l| !l.trim().is_empty()) {
            self.logging.level = level;
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage
            .db_path
            .clone()
            .unwrap_or_else(|| data_dir().join("workflow.db"))
    }

    pub fn subquery_api_key(&self) -> Option<String> {
        std::env::var(&self.subquery.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
