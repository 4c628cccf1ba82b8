use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub mail: MailConfig,
    #[serde(default = "default_storage_config")]
    pub storage: StorageConfig,
    #[serde(default = "default_dispatcher_config")]
    pub dispatcher: DispatcherConfig,
    #[serde(default = "default_delivery_config")]
    pub delivery: DeliveryConfig,
    #[serde(default = "default_retry_config")]
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Long-poll timeout passed to getUpdates
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailConfig {
    /// Endpoint of the HTTP mail API (e.g. https://api.mailgun.net/v3/<domain>/messages)
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Address users must whitelist in their Kindle settings
    pub sender: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatcherConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    #[serde(default = "default_network_timeout_secs")]
    pub network_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
    /// Total time budget for one retried operation. 0 disables the ceiling,
    /// which is only accepted together with `max_attempts`.
    #[serde(default = "default_max_elapsed_secs")]
    pub max_elapsed_secs: u64,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_poll_timeout_secs() -> u32 {
    10
}

fn default_db_path() -> PathBuf {
    PathBuf::from("kindlebot.db")
}

fn default_max_workers() -> usize {
    8
}

fn default_max_payload_size() -> u64 {
    20 * 1024 * 1024
}

fn default_download_timeout_secs() -> u64 {
    30
}

fn default_network_timeout_secs() -> u64 {
    30
}

fn default_initial_interval_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_max_interval_secs() -> u64 {
    60
}

fn default_max_elapsed_secs() -> u64 {
    300
}

fn default_storage_config() -> StorageConfig {
    StorageConfig {
        database_path: default_db_path(),
    }
}

fn default_dispatcher_config() -> DispatcherConfig {
    DispatcherConfig {
        max_workers: default_max_workers(),
    }
}

fn default_delivery_config() -> DeliveryConfig {
    DeliveryConfig {
        max_payload_size: default_max_payload_size(),
        download_timeout_secs: default_download_timeout_secs(),
        network_timeout_secs: default_network_timeout_secs(),
    }
}

fn default_retry_config() -> RetryConfig {
    RetryConfig {
        initial_interval_ms: default_initial_interval_ms(),
        multiplier: default_multiplier(),
        max_interval_secs: default_max_interval_secs(),
        max_elapsed_secs: default_max_elapsed_secs(),
        max_attempts: None,
    }
}

impl DeliveryConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }
}

impl RetryConfig {
    /// Build the backoff policy shared by the fetch and transmit steps.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            multiplier: self.multiplier,
            max_interval: Duration::from_secs(self.max_interval_secs),
            max_elapsed: (self.max_elapsed_secs > 0)
                .then(|| Duration::from_secs(self.max_elapsed_secs)),
            max_attempts: self.max_attempts,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Secrets may live in the environment instead of the config file.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|v| !v.is_empty()) {
            self.telegram.bot_token = token;
        }
        if let Some(key) = lookup("MAIL_API_KEY").filter(|v| !v.is_empty()) {
            self.mail.api_key = key;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.is_empty() {
            anyhow::bail!("telegram.bot_token is required (or set TELEGRAM_BOT_TOKEN)");
        }
        if self.mail.api_url.is_empty() {
            anyhow::bail!("mail.api_url is required");
        }
        if self.mail.sender.is_empty() {
            anyhow::bail!("mail.sender is required");
        }
        if self.dispatcher.max_workers == 0 {
            anyhow::bail!("dispatcher.max_workers must be at least 1");
        }
        if self.delivery.max_payload_size == 0 {
            anyhow::bail!("delivery.max_payload_size must be greater than zero");
        }
        if self.retry.multiplier < 1.0 {
            anyhow::bail!("retry.multiplier must be at least 1.0");
        }
        if self.retry.max_elapsed_secs == 0 && self.retry.max_attempts.is_none() {
            anyhow::bail!("retry needs a finite bound: set max_elapsed_secs or max_attempts");
        }
        Ok(())
    }
}
