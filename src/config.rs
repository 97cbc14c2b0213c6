//! Configuration from `~/.config/rsshub/config.toml` plus environment overrides.
//!
//! The file is optional; a missing or empty file yields `Config::default()`.
//! Environment variables win over the file. Invalid environment values are
//! logged and ignored so a typo never prevents the aggregator from starting.
use serde::{Deserialize, Deserializer};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::aggregator::{validate_interval, Settings, DEFAULT_INTERVAL, DEFAULT_WORKERS};
use crate::control::DEFAULT_CONTROL_ADDR;
use crate::util::parse_duration;

pub const ENV_DATABASE: &str = "RSSHUB_DATABASE";
pub const ENV_CONTROL_ADDR: &str = "RSSHUB_CONTROL_ADDR";
pub const ENV_INTERVAL: &str = "CLI_APP_TIMER_INTERVAL";
pub const ENV_WORKERS: &str = "CLI_APP_WORKERS_COUNT";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid configuration value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file, or `:memory:`
    pub database: PathBuf,

    /// Loopback address of the control listener
    pub control_addr: SocketAddr,

    /// Fetch interval, e.g. `"3m"` or `"1h30m"`
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,

    /// Number of concurrent fetch workers
    pub workers: usize,

    /// Per-request HTTP timeout in seconds
    pub fetch_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_dir().join("rsshub.db"),
            control_addr: DEFAULT_CONTROL_ADDR,
            interval: DEFAULT_INTERVAL,
            workers: DEFAULT_WORKERS,
            fetch_timeout_secs: 30,
        }
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_duration(&text).map_err(serde::de::Error::custom)
}

/// `~/.config/rsshub`, or `./.rsshub` when HOME is unset
pub fn default_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".config").join("rsshub"),
        None => PathBuf::from(".rsshub"),
    }
}

/// Default location of the config file
pub fn default_config_path() -> PathBuf {
    default_dir().join("config.toml")
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 5] = [
        "database",
        "control_addr",
        "interval",
        "workers",
        "fetch_timeout_secs",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing or empty file → `Ok(Config::default())`
    /// - Invalid TOML or value type → `Err(ConfigError::Parse)`
    /// - Unknown keys → accepted and logged as a warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        if !config.control_addr.ip().is_loopback() {
            return Err(ConfigError::Invalid(format!(
                "control_addr {} is not a loopback address",
                config.control_addr
            )));
        }
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`, which maps variable names to values.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(ENV_DATABASE).filter(|v| !v.trim().is_empty()) {
            self.database = PathBuf::from(path);
        }

        if let Some(value) = lookup(ENV_CONTROL_ADDR) {
            match value.trim().parse::<SocketAddr>() {
                Ok(addr) if addr.ip().is_loopback() => self.control_addr = addr,
                Ok(_) => {
                    tracing::warn!(var = ENV_CONTROL_ADDR, value = %value, "Ignoring non-loopback address")
                }
                Err(e) => {
                    tracing::warn!(var = ENV_CONTROL_ADDR, value = %value, error = %e, "Ignoring invalid address")
                }
            }
        }

        if let Some(value) = lookup(ENV_INTERVAL) {
            match parse_duration(&value) {
                Ok(interval) if validate_interval(interval).is_ok() => self.interval = interval,
                Ok(_) => {
                    tracing::warn!(var = ENV_INTERVAL, value = %value, "Ignoring interval below the minimum")
                }
                Err(e) => {
                    tracing::warn!(var = ENV_INTERVAL, value = %value, error = %e, "Ignoring invalid interval")
                }
            }
        }

        if let Some(value) = lookup(ENV_WORKERS) {
            match value.trim().parse::<usize>() {
                Ok(workers) if workers > 0 => self.workers = workers,
                _ => {
                    tracing::warn!(var = ENV_WORKERS, value = %value, "Ignoring invalid worker count")
                }
            }
        }
    }

    /// Aggregator settings, validated.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        Settings::new(self.interval, self.workers).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    /// Control address in the form clients dial
    pub fn control_endpoint(&self) -> String {
        self.control_addr.to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("rsshub_config_test_{}", name));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.interval, Duration::from_secs(180));
        assert_eq!(config.workers, 3);
        assert_eq!(config.control_addr, DEFAULT_CONTROL_ADDR);
        assert_eq!(config.control_endpoint(), "127.0.0.1:7878");
        assert!(config.database.ends_with("rsshub.db"));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/rsshub_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.workers, 3);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = write_config("whitespace", "   \n  \n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.interval, DEFAULT_INTERVAL);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let (dir, path) = write_config(
            "full",
            r#"
database = "/var/lib/rsshub/feeds.db"
control_addr = "127.0.0.1:9000"
interval = "1h30m"
workers = 8
fetch_timeout_secs = 10
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database, PathBuf::from("/var/lib/rsshub/feeds.db"));
        assert_eq!(config.control_endpoint(), "127.0.0.1:9000");
        assert_eq!(config.interval, Duration::from_secs(5400));
        assert_eq!(config.workers, 8);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(10));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "workers = 5\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.workers, 5);
        assert_eq!(config.interval, DEFAULT_INTERVAL);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_values_return_error() {
        for (name, content) in [
            ("bad_toml", "this is not [valid toml"),
            ("bad_interval", "interval = \"soon\"\n"),
            ("bad_type", "workers = \"many\"\n"),
            ("bad_addr", "control_addr = \"nowhere\"\n"),
        ] {
            let (dir, path) = write_config(name, content);
            let err = Config::load(&path).unwrap_err();
            assert!(matches!(err, ConfigError::Parse(_)), "{}: {:?}", name, err);
            std::fs::remove_dir_all(&dir).ok();
        }
    }

    #[test]
    fn test_non_loopback_control_addr_in_file_rejected() {
        let (dir, path) = write_config("public_addr", "control_addr = \"0.0.0.0:7878\"\n");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{:?}", err);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_non_loopback_control_addr_env_ignored() {
        for value in ["0.0.0.0:7878", "10.0.0.5:7878", "[::]:7878"] {
            let mut config = Config::default();
            config.apply_overrides(env(&[(ENV_CONTROL_ADDR, value)]));
            assert_eq!(config.control_addr, DEFAULT_CONTROL_ADDR, "{}", value);
        }

        let mut config = Config::default();
        config.apply_overrides(env(&[(ENV_CONTROL_ADDR, "[::1]:7000")]));
        assert_eq!(config.control_endpoint(), "[::1]:7000");
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (dir, path) = write_config("unknown", "workers = 2\ntheme = \"dark\"\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.workers, 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::default();
        config.apply_overrides(env(&[
            (ENV_DATABASE, "/tmp/other.db"),
            (ENV_CONTROL_ADDR, "127.0.0.1:7000"),
            (ENV_INTERVAL, "45s"),
            (ENV_WORKERS, "6"),
        ]));

        assert_eq!(config.database, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.control_endpoint(), "127.0.0.1:7000");
        assert_eq!(config.interval, Duration::from_secs(45));
        assert_eq!(config.workers, 6);
    }

    #[test]
    fn test_invalid_env_values_ignored() {
        let mut config = Config::default();
        config.apply_overrides(env(&[
            (ENV_CONTROL_ADDR, "not-an-address"),
            (ENV_INTERVAL, "500ms"),
            (ENV_WORKERS, "0"),
        ]));

        assert_eq!(config.control_addr, DEFAULT_CONTROL_ADDR);
        assert_eq!(config.interval, DEFAULT_INTERVAL);
        assert_eq!(config.workers, DEFAULT_WORKERS);
    }

    #[test]
    fn test_settings_rejects_invalid_file_values() {
        let config = Config {
            workers: 0,
            ..Config::default()
        };
        assert!(matches!(config.settings(), Err(ConfigError::Invalid(_))));

        let config = Config {
            interval: Duration::from_millis(10),
            ..Config::default()
        };
        assert!(matches!(config.settings(), Err(ConfigError::Invalid(_))));
    }
}
