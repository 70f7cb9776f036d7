//! Outreach configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{OutreachError, Result};
use crate::traits::ChannelEndpoint;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutreachConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl OutreachConfig {
    /// Load config from the default path (~/.outreach/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default().with_env_overrides())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OutreachError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse a TOML document and apply env overrides.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| OutreachError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config.with_env_overrides())
    }

    /// Secrets left empty in the file may come from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        fill_from_env(&mut self.content.api_key, "OUTREACH_CONTENT_API_KEY");
        fill_from_env(&mut self.channels.api_key, "OUTREACH_CHANNELS_API_KEY");
        if self.gateway.api_token.as_deref().is_none_or(str::is_empty) {
            self.gateway.api_token = std::env::var("OUTREACH_API_TOKEN")
                .ok()
                .filter(|t| !t.is_empty());
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.queue.min_delay_ms > self.queue.max_delay_ms {
            return Err(OutreachError::Config(format!(
                "queue.min_delay_ms ({}) exceeds queue.max_delay_ms ({})",
                self.queue.min_delay_ms, self.queue.max_delay_ms
            )));
        }
        if self.queue.limit == 0 || self.queue.limit > self.queue.max_limit {
            return Err(OutreachError::Config(format!(
                "queue.limit must be between 1 and {}",
                self.queue.max_limit
            )));
        }
        if self.content.max_attempts == 0 {
            return Err(OutreachError::Config("content.max_attempts must be >= 1".into()));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the outreach home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".outreach")
    }
}

fn fill_from_env(slot: &mut String, var: &str) {
    if slot.is_empty() {
        if let Ok(v) = std::env::var(var) {
            *slot = v;
        }
    }
}

fn bool_true() -> bool { true }

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// When set, `/api/v1/*` requires `Authorization: Bearer <api_token>`.
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "bool_true")]
    pub cors: bool,
}

fn default_port() -> u16 { 3000 }
fn default_host() -> String { "127.0.0.1".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            api_token: None,
            cors: true,
        }
    }
}

/// SQLite database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// How long a connection waits on a locked database.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> String { "~/.outreach/outreach.db".into() }
fn default_busy_timeout_ms() -> u64 { 5000 }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Batch runner defaults. Request options override per invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    /// Same-day steps computed in the past fire this many minutes from now.
    #[serde(default = "default_same_day_grace_minutes")]
    pub same_day_grace_minutes: i64,
    /// Spacing between leads for untimed day-0 steps at automation start.
    #[serde(default = "default_automation_stagger_secs")]
    pub automation_stagger_secs: i64,
}

fn default_min_delay_ms() -> u64 { 5000 }
fn default_max_delay_ms() -> u64 { 10000 }
fn default_limit() -> usize { 50 }
fn default_max_limit() -> usize { 100 }
fn default_same_day_grace_minutes() -> i64 { 5 }
fn default_automation_stagger_secs() -> i64 { 120 }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            limit: default_limit(),
            max_limit: default_max_limit(),
            same_day_grace_minutes: default_same_day_grace_minutes(),
            automation_stagger_secs: default_automation_stagger_secs(),
        }
    }
}

/// External content-generation provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    #[serde(default = "default_content_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_content_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_tone")]
    pub default_tone: String,
    #[serde(default = "default_language")]
    pub default_language: String,
}

fn default_content_endpoint() -> String { "http://127.0.0.1:8787/generate-message".into() }
fn default_content_timeout() -> u64 { 60 }
fn default_retry_backoff_ms() -> u64 { 3000 }
fn default_max_attempts() -> u32 { 2 }
fn default_tone() -> String { "professional".into() }
fn default_language() -> String { "en".into() }

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            endpoint: default_content_endpoint(),
            api_key: String::new(),
            timeout_secs: default_content_timeout(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_attempts: default_max_attempts(),
            default_tone: default_tone(),
            default_language: default_language(),
        }
    }
}

/// Channel adapter service (LinkedIn, email, post lookup).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default = "default_channels_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_channels_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_latest_post_path")]
    pub latest_post_path: String,
    /// Per-endpoint path overrides, keyed by endpoint name (e.g. `email_send`).
    #[serde(default)]
    pub paths: std::collections::HashMap<String, String>,
}

fn default_channels_base_url() -> String { "http://127.0.0.1:8788".into() }
fn default_channels_timeout() -> u64 { 30 }
fn default_latest_post_path() -> String { "/linkedin/latest-post".into() }

impl ChannelsConfig {
    /// Path for an endpoint, honoring overrides.
    pub fn path_for(&self, endpoint: ChannelEndpoint) -> String {
        self.paths
            .get(endpoint.as_str())
            .cloned()
            .unwrap_or_else(|| endpoint.default_path().to_string())
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            base_url: default_channels_base_url(),
            api_key: String::new(),
            timeout_secs: default_channels_timeout(),
            latest_post_path: default_latest_post_path(),
            paths: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let cfg = OutreachConfig::parse("").unwrap();
        assert_eq!(cfg.gateway.port, 3000);
        assert_eq!(cfg.queue.min_delay_ms, 5000);
        assert_eq!(cfg.queue.max_delay_ms, 10000);
        assert_eq!(cfg.queue.limit, 50);
        assert_eq!(cfg.queue.max_limit, 100);
        assert_eq!(cfg.content.retry_backoff_ms, 3000);
        assert_eq!(cfg.content.max_attempts, 2);
    }

    #[test]
    fn test_partial_sections() {
        let cfg = OutreachConfig::parse(
            r#"
            [queue]
            min_delay_ms = 0
            max_delay_ms = 100

            [channels]
            base_url = "https://channels.internal"
            [channels.paths]
            email_send = "/v2/mail"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.queue.max_delay_ms, 100);
        assert_eq!(cfg.queue.limit, 50);
        assert_eq!(cfg.channels.path_for(ChannelEndpoint::EmailSend), "/v2/mail");
        assert_eq!(
            cfg.channels.path_for(ChannelEndpoint::LinkedinSendMessage),
            "/linkedin/send-message"
        );
    }

    #[test]
    fn test_inverted_delay_rejected() {
        let err = OutreachConfig::parse("[queue]\nmin_delay_ms = 10\nmax_delay_ms = 5\n").unwrap_err();
        assert!(err.to_string().contains("min_delay_ms"));
    }

    #[test]
    fn test_limit_above_max_rejected() {
        assert!(OutreachConfig::parse("[queue]\nlimit = 500\n").is_err());
    }
}
