//! Configuration loading and validation.
//!
//! A single human-owned `config.toml`. Secrets never live in the file: it
//! names the environment variables that hold them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::analytics::DEFAULT_CHATBASE_URL;
use crate::nlu::api_ai::DEFAULT_API_AI_URL;
use crate::worker::{LeaseSettings, RetryPolicy};

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Storage settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Drain worker retry settings.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// NLU service settings.
    #[serde(default)]
    pub nlu: NluConfig,

    /// Optional analytics reporting.
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Bots served by this process.
    #[serde(default)]
    pub bots: Vec<BotConfig>,
}

/// Storage configuration.
#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. Defaults to `~/.hg/hg.db`.
    pub database: Option<PathBuf>,
}

/// Drain worker configuration.
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// Total attempts per drain invocation, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause before retrying a failed invocation, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Drain lease lifetime between renewals, in seconds.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// How long a drain waits for a lease held elsewhere, in seconds.
    #[serde(default = "default_lease_wait_secs")]
    pub lease_wait_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            lease_ttl_secs: default_lease_ttl_secs(),
            lease_wait_secs: default_lease_wait_secs(),
        }
    }
}

impl WorkerConfig {
    /// The scheduler retry policy described by this section.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    /// Drain lease timing described by this section.
    pub fn lease_settings(&self) -> LeaseSettings {
        LeaseSettings {
            ttl: Duration::from_secs(self.lease_ttl_secs),
            wait: Duration::from_secs(self.lease_wait_secs),
            ..LeaseSettings::default()
        }
    }
}

/// NLU service configuration.
#[derive(Debug, Deserialize)]
pub struct NluConfig {
    /// API base URL.
    #[serde(default = "default_nlu_url")]
    pub base_url: String,

    /// Environment variable holding the client access token.
    #[serde(default = "default_nlu_token_env")]
    pub token_env: String,

    /// Agent language.
    #[serde(default = "default_language")]
    pub language: String,

    /// Request timeout in seconds.
    #[serde(default = "default_nlu_timeout")]
    pub timeout_secs: u64,
}

impl Default for NluConfig {
    fn default() -> Self {
        Self {
            base_url: default_nlu_url(),
            token_env: default_nlu_token_env(),
            language: default_language(),
            timeout_secs: default_nlu_timeout(),
        }
    }
}

impl NluConfig {
    /// Read the access token from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is unset or empty.
    pub fn token(&self) -> anyhow::Result<String> {
        read_secret(&self.token_env)
            .ok_or_else(|| anyhow::anyhow!("NLU token env var {} is not set", self.token_env))
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Analytics configuration. Reporting is enabled only when the key is set.
#[derive(Debug, Deserialize)]
pub struct AnalyticsConfig {
    /// Environment variable holding the Chatbase API key.
    #[serde(default = "default_analytics_key_env")]
    pub api_key_env: String,

    /// Bot version reported with each event.
    #[serde(default)]
    pub bot_version: Option<String>,

    /// API base URL.
    #[serde(default = "default_analytics_url")]
    pub base_url: String,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_analytics_key_env(),
            bot_version: None,
            base_url: default_analytics_url(),
        }
    }
}

impl AnalyticsConfig {
    /// The API key, if reporting is enabled.
    pub fn api_key(&self) -> Option<String> {
        read_secret(&self.api_key_env)
    }
}

/// Log output configuration.
#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Directory for rotated JSON logs. Console only when unset.
    pub dir: Option<PathBuf>,
}

/// One bot served by this process.
#[derive(Debug, Deserialize)]
pub struct BotConfig {
    /// Registry id (e.g. `NewsBot`).
    pub id: String,

    /// Queue namespace. Derived from `id` when unset.
    #[serde(default)]
    pub namespace: Option<String>,

    /// Environment variable holding the page access token.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
}

impl BotConfig {
    /// The page access token, if set.
    pub fn access_token(&self) -> Option<String> {
        read_secret(&self.access_token_env)
    }
}

// Default value functions for serde

fn default_max_attempts() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_lease_ttl_secs() -> u64 {
    30
}
fn default_lease_wait_secs() -> u64 {
    30
}
fn default_nlu_url() -> String {
    DEFAULT_API_AI_URL.to_owned()
}
fn default_nlu_token_env() -> String {
    "API_AI_CLIENT_ACCESS_TOKEN".to_owned()
}
fn default_language() -> String {
    "en".to_owned()
}
fn default_nlu_timeout() -> u64 {
    10
}
fn default_analytics_key_env() -> String {
    "CHATBASE_API_KEY".to_owned()
}
fn default_analytics_url() -> String {
    DEFAULT_CHATBASE_URL.to_owned()
}
fn default_access_token_env() -> String {
    "FB_ACCESS_TOKEN".to_owned()
}

fn read_secret(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violation.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker.max_attempts == 0 {
            anyhow::bail!("worker.max_attempts must be at least 1");
        }
        if self.worker.lease_ttl_secs == 0 {
            anyhow::bail!("worker.lease_ttl_secs must be at least 1");
        }
        let mut seen = HashSet::new();
        for bot in &self.bots {
            if bot.id.trim().is_empty() {
                anyhow::bail!("bot id must not be empty");
            }
            if !seen.insert(bot.id.as_str()) {
                anyhow::bail!("duplicate bot id {:?}", bot.id);
            }
        }
        url::Url::parse(&self.nlu.base_url)
            .map_err(|e| anyhow::anyhow!("invalid nlu.base_url {:?}: {e}", self.nlu.base_url))?;
        url::Url::parse(&self.analytics.base_url).map_err(|e| {
            anyhow::anyhow!("invalid analytics.base_url {:?}: {e}", self.analytics.base_url)
        })?;
        Ok(())
    }

    /// The database path, defaulting under the config directory.
    ///
    /// # Errors
    ///
    /// Returns an error if no path is set and the home directory is unknown.
    pub fn database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.store.database {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("hg.db")),
        }
    }
}

/// Load and validate the config from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Resolve the default config directory (`~/.hg/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".hg"))
}
