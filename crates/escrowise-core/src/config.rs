//! Escrowise configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EscrowiseError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscrowiseConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
}

impl EscrowiseConfig {
    /// Load config from the default path (~/.escrowise/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EscrowiseError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| EscrowiseError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Write config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| EscrowiseError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// SMTP credentials may come from `EMAIL_USERNAME` / `EMAIL_PASSWORD`
    /// so secrets stay out of the config file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(user) = lookup("EMAIL_USERNAME").filter(|v| !v.is_empty()) {
            if self.smtp.from_address.is_empty() {
                self.smtp.from_address = user.clone();
            }
            self.smtp.username = user;
        }
        if let Some(pass) = lookup("EMAIL_PASSWORD").filter(|v| !v.is_empty()) {
            self.smtp.password = pass;
        }
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Escrowise home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".escrowise")
    }
}

/// SQLite database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.escrowise/escrowise.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Admin API listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 3000 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Dispatcher behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between polls inside `serve`. 0 = rely on an external trigger.
    #[serde(default)]
    pub poll_interval_secs: u64,
    /// Upper bound on generate + deliver for a single report.
    #[serde(default = "default_report_timeout")]
    pub report_timeout_secs: u64,
    /// How long a dispatcher invocation holds its claim on a report row.
    #[serde(default = "default_claim_lease")]
    pub claim_lease_secs: u64,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

fn default_report_timeout() -> u64 { 120 }
fn default_claim_lease() -> u64 { 900 }
fn default_subject_prefix() -> String { "Escrowise Report".into() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 0,
            report_timeout_secs: default_report_timeout(),
            claim_lease_secs: default_claim_lease(),
            subject_prefix: default_subject_prefix(),
        }
    }
}

/// Outbound SMTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

fn default_smtp_host() -> String { "smtp.gmail.com".into() }
fn default_smtp_port() -> u16 { 587 }
fn default_from_name() -> String { "Escrowise".into() }

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            from_name: default_from_name(),
        }
    }
}
