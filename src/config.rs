//! Session configuration.
//!
//! All options are supplied at session construction and immutable for the
//! lifetime of that session instance. Configuration can be parsed from a TOML
//! file or assembled from `PUMPLINK_*` environment variables; defaults mirror
//! the dashboard's production constants.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Connection and retry settings for one telemetry session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Broker endpoint host, e.g. `a1b2c3-ats.iot.us-east-1.amazonaws.com`
    pub endpoint: String,
    /// AWS region identifier, e.g. `us-east-1`
    pub region: String,
    /// Cognito identity pool id, e.g. `us-east-1:0000-...`
    pub identity_pool_id: String,
    /// Topics auto-(re)subscribed on every connect
    #[serde(default = "default_topics")]
    pub default_topics: Vec<String>,
    /// Minimum reconnect backoff in milliseconds
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Maximum reconnect backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// MQTT keepalive interval in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Minimum spacing between credential refreshes in milliseconds
    #[serde(default = "default_refresh_cooldown_ms")]
    pub refresh_cooldown_ms: u64,
}

fn default_topics() -> Vec<String> {
    vec!["pump/status".to_string()]
}

fn default_base_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_keepalive_secs() -> u64 {
    60
}

fn default_refresh_cooldown_ms() -> u64 {
    60_000
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SessionConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Assemble configuration from `PUMPLINK_*` environment variables.
    ///
    /// `PUMPLINK_IOT_ENDPOINT`, `PUMPLINK_AWS_REGION` and
    /// `PUMPLINK_IDENTITY_POOL_ID` are required; everything else falls back
    /// to defaults. `PUMPLINK_DEFAULT_TOPICS` is a comma-separated list.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = SessionConfig {
            endpoint: required_env("PUMPLINK_IOT_ENDPOINT")?,
            region: required_env("PUMPLINK_AWS_REGION")?,
            identity_pool_id: required_env("PUMPLINK_IDENTITY_POOL_ID")?,
            default_topics: match std::env::var("PUMPLINK_DEFAULT_TOPICS") {
                Ok(list) => list
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect(),
                Err(_) => default_topics(),
            },
            base_backoff_ms: optional_env_u64("PUMPLINK_BASE_BACKOFF_MS")?
                .unwrap_or_else(default_base_backoff_ms),
            max_backoff_ms: optional_env_u64("PUMPLINK_MAX_BACKOFF_MS")?
                .unwrap_or_else(default_max_backoff_ms),
            keepalive_secs: optional_env_u64("PUMPLINK_KEEPALIVE_SECS")?
                .unwrap_or_else(default_keepalive_secs),
            refresh_cooldown_ms: optional_env_u64("PUMPLINK_REFRESH_COOLDOWN_MS")?
                .unwrap_or_else(default_refresh_cooldown_ms),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "endpoint must not be empty".to_string(),
            ));
        }
        if self.region.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "region must not be empty".to_string(),
            ));
        }
        if self.identity_pool_id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "identity_pool_id must not be empty".to_string(),
            ));
        }
        if self.base_backoff_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "base_backoff_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_backoff_ms < self.base_backoff_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "max_backoff_ms ({}) must be >= base_backoff_ms ({})",
                self.max_backoff_ms, self.base_backoff_ms
            )));
        }
        if self.keepalive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "keepalive_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// MQTT keepalive as a `Duration`.
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    /// Credential refresh cooldown as a `Duration`.
    pub fn refresh_cooldown(&self) -> Duration {
        Duration::from_millis(self.refresh_cooldown_ms)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
endpoint = "test-ats.iot.us-east-1.amazonaws.com"
region = "us-east-1"
identity_pool_id = "us-east-1:11111111-2222-3333-4444-555555555555"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarNotFound(name.to_string()))
}

fn optional_env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidConfig(format!("{name} must be an integer: {raw}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_defaults_match_dashboard_constants() {
        let config = SessionConfig::test_config();
        assert_eq!(config.default_topics, vec!["pump/status".to_string()]);
        assert_eq!(config.base_backoff_ms, 1_000);
        assert_eq!(config.max_backoff_ms, 30_000);
        assert_eq!(config.keepalive_secs, 60);
        assert_eq!(config.refresh_cooldown_ms, 60_000);
    }

    #[test]
    fn test_full_toml_round_trip() {
        let toml_content = r#"
endpoint = "a1-ats.iot.eu-west-1.amazonaws.com"
region = "eu-west-1"
identity_pool_id = "eu-west-1:abc"
default_topics = ["pump/status", "pump/alerts"]
base_backoff_ms = 500
max_backoff_ms = 10000
keepalive_secs = 30
refresh_cooldown_ms = 30000
"#;
        let config: SessionConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.default_topics.len(), 2);
        assert_eq!(config.keepalive(), Duration::from_secs(30));
        assert_eq!(config.refresh_cooldown(), Duration::from_millis(30000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
endpoint = "a1-ats.iot.us-east-1.amazonaws.com"
region = "us-east-1"
identity_pool_id = "us-east-1:abc"
"#
        )
        .unwrap();

        let config = SessionConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.endpoint, "a1-ats.iot.us-east-1.amazonaws.com");
        assert_eq!(config.base_backoff_ms, 1_000);
    }

    #[test]
    fn test_load_from_missing_file() {
        let result = SessionConfig::load_from_file(Path::new("/nonexistent/pumplink.toml"));
        assert!(matches!(result, Err(ConfigError::FileRead(_))));
    }

    #[test]
    fn test_validate_rejects_empty_endpoint() {
        let mut config = SessionConfig::test_config();
        config.endpoint = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff_bounds() {
        let mut config = SessionConfig::test_config();
        config.base_backoff_ms = 5_000;
        config.max_backoff_ms = 1_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_backoff_ms"));
    }

    #[test]
    fn test_validate_rejects_zero_base_backoff() {
        let mut config = SessionConfig::test_config();
        config.base_backoff_ms = 0;
        assert!(config.validate().is_err());
    }
}
