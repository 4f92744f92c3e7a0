//! Configuration loader and validator for the Readmoo→Notion sync.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::sync::SyncTarget;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub readmoo: Readmoo,
    pub notion: Notion,
    #[serde(default)]
    pub browser: Browser,
    #[serde(default)]
    pub scrape: Scrape,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_output_file")]
    pub output_file: String,
}

/// Readmoo account used to reach the highlights list.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Readmoo {
    pub email: String,
    pub password: String,
    /// Token for the Readwise export side action; export is skipped when empty.
    #[serde(default)]
    pub readwise_token: Option<String>,
}

impl std::fmt::Debug for Readmoo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Readmoo")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Notion API settings and sync target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notion {
    pub token: String,
    pub version: String,
    /// Create a new database under this page.
    #[serde(default)]
    pub page_id: Option<String>,
    /// Sync into this existing database.
    #[serde(default)]
    pub database_id: Option<String>,
}

/// WebDriver endpoint used to drive the browser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Browser {
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "default_headless")]
    pub headless: bool,
}

impl Default for Browser {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            headless: default_headless(),
        }
    }
}

/// Retry bounds and timeouts for the scraper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scrape {
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default = "default_max_session_attempts")]
    pub max_session_attempts: u32,
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

impl Default for Scrape {
    fn default() -> Self {
        Self {
            max_retry: default_max_retry(),
            max_session_attempts: default_max_session_attempts(),
            wait_timeout_ms: default_wait_timeout_ms(),
        }
    }
}

impl Scrape {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

fn default_output_file() -> String {
    "books-highlights.json".into()
}

fn default_webdriver_url() -> String {
    "http://localhost:4444".into()
}

fn default_headless() -> bool {
    true
}

fn default_max_retry() -> u32 {
    5
}

fn default_max_session_attempts() -> u32 {
    10
}

fn default_wait_timeout_ms() -> u64 {
    10_000
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn output_path(&self) -> PathBuf {
        Path::new(&self.app.data_dir).join(&self.app.output_file)
    }

    /// The configured Readwise token, if export is enabled.
    pub fn readwise_token(&self) -> Option<&str> {
        self.readmoo
            .readwise_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn sync_target(&self) -> SyncTarget {
        SyncTarget {
            page_id: non_blank(self.notion.page_id.as_deref()),
            database_id: non_blank(self.notion.database_id.as_deref()),
        }
    }

    /// Apply `NOTION_PAGE_ID`, `NOTION_DB_ID` and `READWISE_TOKEN` overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("NOTION_PAGE_ID") {
            self.notion.page_id = Some(v);
        }
        if let Some(v) = lookup("NOTION_DB_ID") {
            self.notion.database_id = Some(v);
        }
        if let Some(v) = lookup("READWISE_TOKEN") {
            self.readmoo.readwise_token = Some(v);
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
/// - Environment overrides are applied before validation.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env_overrides();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.output_file.trim().is_empty() {
        return Err(ConfigError::Invalid("app.output_file must be non-empty"));
    }

    if cfg.readmoo.email.trim().is_empty() {
        return Err(ConfigError::Invalid("readmoo.email must be non-empty"));
    }
    if cfg.readmoo.password.is_empty() {
        return Err(ConfigError::Invalid("readmoo.password must be non-empty"));
    }

    if cfg.notion.token.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.token must be non-empty"));
    }
    if cfg.notion.version.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.version must be non-empty"));
    }

    if cfg.browser.webdriver_url.trim().is_empty() {
        return Err(ConfigError::Invalid("browser.webdriver_url must be non-empty"));
    }

    if cfg.scrape.max_retry == 0 {
        return Err(ConfigError::Invalid("scrape.max_retry must be > 0"));
    }
    if cfg.scrape.max_session_attempts == 0 {
        return Err(ConfigError::Invalid("scrape.max_session_attempts must be > 0"));
    }
    if cfg.scrape.wait_timeout_ms == 0 {
        return Err(ConfigError::Invalid("scrape.wait_timeout_ms must be > 0"));
    }

    Ok(())
}

/// Returns the example YAML shipped with the binary.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  output_file: "books-highlights.json"

readmoo:
  email: "you@example.com"
  password: "YOUR_READMOO_PASSWORD"
  readwise_token: ""

notion:
  token: "YOUR_NOTION_INTEGRATION_TOKEN"
  version: "2022-06-28"
  page_id: "NOTION_PARENT_PAGE_ID"
  database_id: ""

browser:
  webdriver_url: "http://localhost:4444"
  headless: true

scrape:
  max_retry: 5
  max_session_attempts: 10
  wait_timeout_ms: 10000
"#
}
