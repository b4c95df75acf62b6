use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Which navigation triggers the URL watcher installs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlWatchConfig {
    #[serde(default = "default_true")]
    pub initial_check: bool,
    #[serde(default = "default_true")]
    pub popstate: bool,
    #[serde(default = "default_true")]
    pub history: bool,
    #[serde(default = "default_true")]
    pub head_mutation: bool,
    /// Regex deciding `PageState::is_watch_page`.
    #[serde(default = "default_watch_url_pattern")]
    pub watch_url_pattern: String,
}

fn default_true() -> bool {
    true
}

fn default_watch_url_pattern() -> String {
    r"^https?://(www\.)?nicovideo\.jp/watch/[^/?#]+".to_string()
}

impl Default for UrlWatchConfig {
    fn default() -> Self {
        Self {
            initial_check: true,
            popstate: true,
            history: true,
            head_mutation: true,
            watch_url_pattern: default_watch_url_pattern(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipConfig {
    /// Quiet window before an ad-status flip restarts the stream pipeline.
    #[serde(default = "default_ad_restart_debounce_ms")]
    pub ad_restart_debounce_ms: u64,
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    #[serde(default = "default_wait_initial_interval_ms")]
    pub wait_initial_interval_ms: u64,
    #[serde(default = "default_wait_max_interval_ms")]
    pub wait_max_interval_ms: u64,
}

fn default_ad_restart_debounce_ms() -> u64 {
    500
}

fn default_wait_timeout_ms() -> u64 {
    10_000
}

fn default_wait_initial_interval_ms() -> u64 {
    100
}

fn default_wait_max_interval_ms() -> u64 {
    1_000
}

impl Default for PipConfig {
    fn default() -> Self {
        Self {
            ad_restart_debounce_ms: default_ad_restart_debounce_ms(),
            wait_timeout_ms: default_wait_timeout_ms(),
            wait_initial_interval_ms: default_wait_initial_interval_ms(),
            wait_max_interval_ms: default_wait_max_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fraction of the computed delay randomized away, in `[0, 1]`.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    #[serde(default = "default_retry_on_statuses")]
    pub retry_on_statuses: Vec<u16>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    2_000
}

fn default_jitter_ratio() -> f64 {
    0.2
}

fn default_retry_on_statuses() -> Vec<u16> {
    vec![408, 429, 500, 502, 503, 504]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
            retry_on_statuses: default_retry_on_statuses(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_ttl_ms() -> u64 {
    60_000
}

fn default_max_entries() -> usize {
    128
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_ms: default_ttl_ms(),
            max_entries: default_max_entries(),
        }
    }
}

/// Request policy for auxiliary lookups. Short timeouts, modest retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpPolicy {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub dedupe: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub cache: CachePolicy,
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl Default for HttpPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            dedupe: true,
            retry: RetryPolicy::default(),
            cache: CachePolicy::default(),
        }
    }
}

/// Flags read once at startup and shared read-only with every domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub debug_logging: bool,
    #[serde(default)]
    pub ad_auto_skip: bool,
    #[serde(default)]
    pub url_watch: UrlWatchConfig,
    #[serde(default)]
    pub pip: PipConfig,
    #[serde(default)]
    pub http: HttpPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            debug_mode: false,
            debug_logging: false,
            ad_auto_skip: false,
            url_watch: UrlWatchConfig::default(),
            pip: PipConfig::default(),
            http: HttpPolicy::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let retry = &self.http.retry;
        if retry.max_attempts == 0 {
            return Err(Error::Config("http.retry.maxAttempts must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&retry.jitter_ratio) {
            return Err(Error::Config(format!(
                "http.retry.jitterRatio must be within [0, 1], got {}",
                retry.jitter_ratio
            )));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(Error::Config(
                "http.retry.baseDelayMs must not exceed maxDelayMs".into(),
            ));
        }
        if self.pip.wait_initial_interval_ms == 0 {
            return Err(Error::Config("pip.waitInitialIntervalMs must be > 0".into()));
        }
        Ok(())
    }
}
