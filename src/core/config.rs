use crate::core::rules::AllocationRule;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpFeedConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FeedConfig {
    /// Remote bank feed. Without it transactions come from the local ledger.
    pub http: Option<HttpFeedConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
    /// User to act as when `--user` is not given.
    pub user: Option<String>,
    pub data_path: Option<String>,
    #[serde(default)]
    pub feed: FeedConfig,
    /// Rules every newly added user starts with.
    #[serde(default)]
    pub default_rules: Vec<AllocationRule>,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            currency: default_currency(),
            user: None,
            data_path: None,
            feed: FeedConfig::default(),
            default_rules: Vec::new(),
        }
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("app", "flowbank", "flowbank")
        .context("Could not determine project directories")
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(
                "No config at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        Ok(project_dirs()?.data_dir().to_path_buf())
    }

    /// Directory holding the ledger keyspace.
    pub fn ledger_path(&self) -> Result<PathBuf> {
        Ok(self.default_data_path()?.join("ledger"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        for rule in &config.default_rules {
            rule.validate().with_context(|| {
                format!(
                    "Invalid default rule in config file: {}",
                    path.as_ref().display()
                )
            })?;
        }
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Picks the acting user: an explicit one wins over the configured one.
    pub fn resolve_user(&self, explicit: Option<&str>) -> Result<String> {
        explicit
            .map(str::to_string)
            .or_else(|| self.user.clone())
            .context("No user given. Pass --user or set `user` in the config file")
    }
}
