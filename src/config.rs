//! Configuration loader and validator for the field sync daemon.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub api: Api,
    pub technician: Technician,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub sync_interval_seconds: u64,
    pub max_backoff_seconds: u64,
}

/// Remote work-order API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Api {
    pub base_url: String,
    pub token: String,
    pub tenant_id: String,
}

/// Identity of the authenticated field technician.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Technician {
    pub user_id: String,
    pub role: String,
}

impl App {
    /// Expand a leading `~/` in `data_dir`.
    pub fn resolved_data_dir(&self) -> String {
        if let Some(rest) = self.data_dir.strip_prefix("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return format!("{}/{}", home.trim_end_matches('/'), rest);
            }
        }
        self.data_dir.clone()
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.sync_interval_seconds == 0 {
        return Err(ConfigError::Invalid(
            "app.sync_interval_seconds must be > 0",
        ));
    }

    if cfg.api.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("api.base_url must be non-empty"));
    }
    if cfg.api.token.trim().is_empty() {
        return Err(ConfigError::Invalid("api.token must be non-empty"));
    }
    if cfg.api.tenant_id.trim().is_empty() {
        return Err(ConfigError::Invalid("api.tenant_id must be non-empty"));
    }

    if cfg.technician.user_id.trim().is_empty() {
        return Err(ConfigError::Invalid("technician.user_id must be non-empty"));
    }
    if cfg.technician.role.trim().is_empty() {
        return Err(ConfigError::Invalid("technician.role must be non-empty"));
    }

    Ok(())
}

/// Example YAML used by tests and `--print-example`.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  sync_interval_seconds: 60
  max_backoff_seconds: 300

api:
  base_url: "https://api.aquaops.example/v1/"
  token: "YOUR_API_BEARER_TOKEN"
  tenant_id: "north-water"

technician:
  user_id: "tech-042"
  role: "field_technician"
"#
}
