use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_RELAY_URL: &str = "https://clawsend-relay-production.up.railway.app";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the relay (a path prefix is allowed)
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    /// Upper bound on every relay request, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum messages fetched per receive
    #[serde(default = "default_receive_limit")]
    pub receive_limit: u32,
    /// Delay between inbox polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_relay_url() -> String {
    DEFAULT_RELAY_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_receive_limit() -> u32 {
    50
}

fn default_poll_interval_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            timeout_secs: default_timeout_secs(),
            receive_limit: default_receive_limit(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl Config {
    /// Config pointing at a specific relay, everything else default
    pub fn with_relay(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            ..Self::default()
        }
    }

    /// Read a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        config.relay()?;
        Ok(config)
    }

    /// Read `config.toml` from a vault directory, falling back to defaults
    /// when the file does not exist.
    pub fn load_or_default(vault_dir: &Path) -> Result<Self, ConfigError> {
        let path = vault_dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// The relay base URL, parsed
    pub fn relay(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.relay_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", self.relay_url, e)))?;
        if url.cannot_be_a_base() {
            return Err(ConfigError::InvalidUrl(self.relay_url.clone()));
        }
        Ok(url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("invalid relay URL: {0}")]
    InvalidUrl(String),
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.relay_url, DEFAULT_RELAY_URL);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.receive_limit, 50);
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("timeout_secs = 5\n").unwrap();
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.relay_url, DEFAULT_RELAY_URL);
        assert_eq!(config.receive_limit, 50);
    }

    #[test]
    fn test_load_or_default() {
        let dir = TempDir::new().unwrap();
        assert_eq!(Config::load_or_default(dir.path()).unwrap(), Config::default());

        let config = Config {
            relay_url: "http://127.0.0.1:9999/relay".to_string(),
            receive_limit: 7,
            ..Config::default()
        };
        config.save(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(Config::load_or_default(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_invalid_relay_url() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "relay_url = \"not a url\"\n").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::InvalidUrl(_))
        ));
        assert!(Config::with_relay("mailto:someone@example.com")
            .relay()
            .is_err());
    }
}
