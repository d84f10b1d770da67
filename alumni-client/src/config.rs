use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Portal API used when nothing else is configured
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// Environment variable overriding the API base URL
pub const API_URL_ENV: &str = "ALUMNI_API_URL";

/// Client settings stored locally in `~/.alumni/config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Saved API base URL; None means "use the default"
    pub api_url: Option<String>,
    /// Deepest reply depth whose children may still be fetched
    pub max_depth: u32,
    /// Root comments per page
    pub page_limit: u32,
    /// Maximum number of cached query results
    pub cache_capacity: usize,
    /// Refetch like status after every successful toggle
    pub reconcile_likes: bool,
    /// How long a notice stays visible
    pub notice_ttl_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            max_depth: 3,
            page_limit: 10,
            cache_capacity: 64,
            reconcile_likes: false,
            notice_ttl_secs: 5,
        }
    }
}

/// Configuration manager for the .alumni directory
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager rooted at `~/.alumni`
    pub fn new() -> Result<Self> {
        let home_dir = dirs::home_dir().context("Could not determine home directory")?;
        Self::with_dir(home_dir.join(".alumni"))
    }

    /// Create a config manager rooted at an explicit directory
    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Result<Self> {
        let config_dir = config_dir.into();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).context("Failed to create .alumni directory")?;
        }

        Ok(Self { config_dir })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    /// Load client configuration, falling back to defaults when absent
    pub fn load(&self) -> Result<ClientConfig> {
        let config_file = self.config_file();

        if !config_file.exists() {
            return Ok(ClientConfig::default());
        }

        let json = fs::read_to_string(&config_file).context("Failed to read config file")?;
        let config: ClientConfig = serde_json::from_str(&json).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save client configuration
    pub fn save(&self, config: &ClientConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(self.config_file(), json).context("Failed to write config file")?;

        log::info!("Saved client config to {}", self.config_file().display());
        Ok(())
    }

    /// Determine the API URL to use based on priority:
    /// 1. CLI argument (highest priority)
    /// 2. Environment variable ALUMNI_API_URL
    /// 3. Saved configuration file
    /// 4. Built-in default (lowest priority)
    pub fn determine_api_url(&self, cli_override: Option<String>) -> Result<String> {
        if let Some(url) = cli_override {
            return Ok(url);
        }

        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                return Ok(url);
            }
        }

        if let Some(url) = self.load()?.api_url {
            return Ok(url);
        }

        Ok(DEFAULT_API_URL.to_string())
    }
}
