//! TOML configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rebal_broker::ConnectOptions;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::policy::SessionPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub client_id: i32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    4002
}
fn default_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_delay")]
    pub delay_between_orders_ms: u64,
    #[serde(default)]
    pub max_orders_per_run: Option<usize>,
    #[serde(default)]
    pub session_policy: SessionPolicy,
    #[serde(default = "default_currency")]
    pub domestic_currency: String,
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            delay_between_orders_ms: default_delay(),
            max_orders_per_run: None,
            session_policy: SessionPolicy::default(),
            domestic_currency: default_currency(),
            ack_timeout_ms: default_ack_timeout(),
        }
    }
}

fn default_delay() -> u64 {
    250
}
fn default_currency() -> String {
    "USD".into()
}
fn default_ack_timeout() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_window")]
    pub observation_window_secs: u64,
    #[serde(default = "default_poll")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_refresh")]
    pub refresh_timeout_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            observation_window_secs: default_window(),
            poll_interval_ms: default_poll(),
            refresh_timeout_ms: default_refresh(),
        }
    }
}

fn default_window() -> u64 {
    30
}
fn default_poll() -> u64 {
    2000
}
fn default_refresh() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_audit_file")]
    pub audit_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            audit_file: default_audit_file(),
        }
    }
}

fn default_log_dir() -> String {
    "./logs".into()
}
fn default_audit_file() -> String {
    "audit.jsonl".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_max_runs")]
    pub max_runs: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_runs: default_max_runs(),
        }
    }
}

fn default_max_runs() -> usize {
    20
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config invariants.
    fn validate(&self) -> Result<()> {
        if self.connection.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.connection.port == 0 {
            return Err(Error::Config("port must be > 0".into()));
        }
        if self.connection.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be > 0".into()));
        }
        if self.execution.max_orders_per_run == Some(0) {
            return Err(Error::Config(
                "max_orders_per_run must be > 0 (omit it for no limit)".into(),
            ));
        }
        let currency = &self.execution.domestic_currency;
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::Config(format!(
                "domestic_currency must be a 3-letter code, got '{currency}'"
            )));
        }
        if self.execution.ack_timeout_ms == 0 {
            return Err(Error::Config("ack_timeout_ms must be > 0".into()));
        }
        if self.status.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be > 0".into()));
        }
        if self.registry.max_runs == 0 {
            return Err(Error::Config("max_runs must be > 0".into()));
        }
        Ok(())
    }

    /// Gateway address string.
    pub fn address(&self) -> String {
        format!("{}:{}", self.connection.host, self.connection.port)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            host: self.connection.host.clone(),
            port: self.connection.port,
            client_id: self.connection.client_id,
            timeout: Duration::from_secs(self.connection.timeout_secs),
        }
    }

    /// Full path to the audit log file.
    pub fn audit_path(&self) -> PathBuf {
        Path::new(&self.logging.dir).join(&self.logging.audit_file)
    }

    /// Directory for order lists and reports.
    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.logging.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_toml() -> &'static str {
        r#"
[connection]
host = "127.0.0.1"
port = 4002
client_id = 100
timeout_secs = 10

[execution]
delay_between_orders_ms = 250
max_orders_per_run = 50
session_policy = "next_open"
domestic_currency = "USD"
ack_timeout_ms = 500

[status]
observation_window_secs = 30
poll_interval_ms = 2000

[logging]
dir = "./logs"
audit_file = "audit.jsonl"

[registry]
max_runs = 20
"#
    }

    #[test]
    fn parse_example_config() {
        let config = Config::from_toml(example_toml()).unwrap();
        assert_eq!(config.connection.port, 4002);
        assert_eq!(config.connection.client_id, 100);
        assert_eq!(config.execution.max_orders_per_run, Some(50));
        assert_eq!(config.execution.session_policy, SessionPolicy::NextOpen);
        assert_eq!(config.status.refresh_timeout_ms, 5000);
        assert_eq!(config.registry.max_runs, 20);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_toml("[connection]\nclient_id = 1\n").unwrap();
        assert_eq!(config.address(), "127.0.0.1:4002");
        assert_eq!(config.execution.ack_timeout_ms, 500);
        assert_eq!(config.execution.session_policy, SessionPolicy::Regular);
        assert_eq!(config.execution.max_orders_per_run, None);
        assert_eq!(config.connect_options().timeout, Duration::from_secs(10));
    }

    #[test]
    fn validate_catches_bad_port() {
        let mut config = Config::from_toml(example_toml()).unwrap();
        config.connection.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_catches_zero_max_orders() {
        let mut config = Config::from_toml(example_toml()).unwrap();
        config.execution.max_orders_per_run = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_catches_bad_currency() {
        let toml = example_toml().replace("\"USD\"", "\"US\"");
        assert!(matches!(Config::from_toml(&toml), Err(Error::Config(_))));
    }

    #[test]
    fn unknown_session_policy_rejected() {
        let toml = example_toml().replace("\"next_open\"", "\"overnight\"");
        assert!(matches!(Config::from_toml(&toml), Err(Error::ConfigParse(_))));
    }

    #[test]
    fn audit_path() {
        let config = Config::from_toml(example_toml()).unwrap();
        assert_eq!(config.audit_path(), PathBuf::from("./logs/audit.jsonl"));
    }
}
