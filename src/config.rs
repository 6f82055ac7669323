//! Configuration file parser for ~/.config/upfeed/config.toml.
//!
//! The config file is optional. A missing or empty file yields
//! `Config::default()`; unknown keys are accepted and logged as warnings.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::fetcher::{DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_FEED_SIZE};
use crate::feed::FetchLimits;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Application configuration.
///
/// Every field is defaulted, so any subset of keys can be given.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-channel fetch timeout in seconds. 0 is treated as 1.
    pub fetch_timeout_secs: u64,

    /// Cap on channels fetched at the same time during a pass. Unset means
    /// every selected channel starts at once. 0 is treated as 1.
    pub max_concurrent_fetches: Option<usize>,

    /// Largest feed document accepted, in bytes.
    pub max_feed_size_bytes: usize,

    /// User-Agent header sent with every feed request.
    pub user_agent: String,

    /// Database file. Defaults to `upfeed.db` next to the config file.
    pub database_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT.as_secs(),
            max_concurrent_fetches: None,
            max_feed_size_bytes: DEFAULT_MAX_FEED_SIZE,
            user_agent: format!("upfeed/{}", env!("CARGO_PKG_VERSION")),
            database_path: None,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 5] = [
        "fetch_timeout_secs",
        "max_concurrent_fetches",
        "max_feed_size_bytes",
        "user_agent",
        "database_path",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
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
                // File deleted between metadata and read
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
        tracing::info!(
            path = %path.display(),
            timeout_secs = config.fetch_timeout_secs,
            max_concurrent = ?config.max_concurrent_fetches,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn fetch_limits(&self) -> FetchLimits {
        FetchLimits {
            timeout: Duration::from_secs(self.fetch_timeout_secs.max(1)),
            max_size: self.max_feed_size_bytes,
        }
    }

    pub fn max_concurrent(&self) -> Option<usize> {
        self.max_concurrent_fetches.map(|n| n.max(1))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("upfeed_config_test_{}", name));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.fetch_timeout_secs, 15);
        assert_eq!(config.max_concurrent_fetches, None);
        assert_eq!(config.max_concurrent(), None);
        assert_eq!(config.max_feed_size_bytes, 10 * 1024 * 1024);
        assert!(config.user_agent.starts_with("upfeed/"));
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/upfeed_test_nonexistent_config.toml");
        assert_eq!(Config::load(path).unwrap(), Config::default());
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = write_config("whitespace", "   \n  \n  ");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "fetch_timeout_secs = 30\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.fetch_timeout_secs, 30);
        assert_eq!(config.max_concurrent_fetches, None);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
fetch_timeout_secs = 5
max_concurrent_fetches = 3
max_feed_size_bytes = 2048
user_agent = "TestAgent/1.0"
database_path = "/var/lib/upfeed/feeds.db"
"#;
        let (dir, path) = write_config("full", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.fetch_timeout_secs, 5);
        assert_eq!(config.max_concurrent_fetches, Some(3));
        assert_eq!(config.max_concurrent(), Some(3));
        assert_eq!(config.max_feed_size_bytes, 2048);
        assert_eq!(config.user_agent, "TestAgent/1.0");
        assert_eq!(
            config.database_path.as_deref(),
            Some(Path::new("/var/lib/upfeed/feeds.db"))
        );

        let limits = config.fetch_limits();
        assert_eq!(limits.timeout, Duration::from_secs(5));
        assert_eq!(limits.max_size, 2048);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let (dir, path) = write_config("zero", "fetch_timeout_secs = 0\nmax_concurrent_fetches = 0\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.fetch_limits().timeout, Duration::from_secs(1));
        assert_eq!(config.max_concurrent(), Some(1));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = r#"
fetch_timeout_secs = 20
theme = "dark"
another_unknown = 42
"#;
        let (dir, path) = write_config("unknown", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.fetch_timeout_secs, 20);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (dir, path) = write_config("wrongtype", "max_concurrent_fetches = \"ten\"\n");
        assert!(Config::load(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
