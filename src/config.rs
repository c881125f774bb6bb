//! Configuration file parser for ~/.config/vesper/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde, but we log a warning for each one since
//! they are usually typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `proxy_base` from the file.
pub const PROXY_BASE_ENV: &str = "VESPER_PROXY_BASE";

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
// Configuration Structs
// ============================================================================

/// Tuning knobs for fetching, syncing and fleet refresh.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the fetch relay. Without it no feed can be fetched.
    pub proxy_base: Option<String>,

    /// Minimum gap between two non-forced fleet refreshes.
    pub refresh_all_min_interval_ms: u64,

    /// Number of feeds synced at once during a fleet refresh.
    pub concurrency: usize,

    /// Retries per candidate URL after the first attempt.
    pub max_fetch_retries: u32,

    /// Base delay for retries within one fetch. Per-feed failure backoff
    /// uses this value times 60.
    pub backoff_base_ms: u64,

    /// Upper bound for per-feed failure backoff.
    pub max_backoff_ms: u64,

    pub fetch_timeout_ms: u64,

    /// New articles beyond this many per sync are archived (stored as read).
    pub unread_limit: usize,

    pub snippet_length: usize,

    /// `Cache-Control: max-age` sent to the relay on non-forced fetches.
    pub cache_max_age_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_base: None,
            refresh_all_min_interval_ms: 180_000,
            concurrency: 3,
            max_fetch_retries: 2,
            backoff_base_ms: 500,
            max_backoff_ms: 900_000,
            fetch_timeout_ms: 10_000,
            unread_limit: 50,
            snippet_length: 150,
            cache_max_age_secs: 3600,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: &'static [&'static str] = &[
        "proxy_base",
        "refresh_all_min_interval_ms",
        "concurrency",
        "max_fetch_retries",
        "backoff_base_ms",
        "max_backoff_ms",
        "fetch_timeout_ms",
        "unread_limit",
        "snippet_length",
        "cache_max_age_secs",
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
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content)
    }

    /// Parse TOML text. Whitespace-only input yields the defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            proxy = config.proxy_base.is_some(),
            concurrency = config.concurrency,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Replace `proxy_base` with `value` when it is set and non-blank.
    pub fn with_proxy_override(mut self, value: Option<String>) -> Self {
        if let Some(base) = value.filter(|v| !v.trim().is_empty()) {
            tracing::debug!(env = PROXY_BASE_ENV, "Proxy base overridden from environment");
            self.proxy_base = Some(base.trim().to_string());
        }
        self
    }

    /// Applies `VESPER_PROXY_BASE` if present.
    pub fn with_env_overrides(self) -> Self {
        let value = std::env::var(PROXY_BASE_ENV).ok();
        self.with_proxy_override(value)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn refresh_all_min_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_all_min_interval_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_config(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("vesper_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.proxy_base, None);
        assert_eq!(config.refresh_all_min_interval(), Duration::from_secs(180));
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.max_fetch_retries, 2);
        assert_eq!(config.backoff_base(), Duration::from_millis(500));
        assert_eq!(config.max_backoff(), Duration::from_secs(900));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.unread_limit, 50);
        assert_eq!(config.snippet_length, 150);
        assert_eq!(config.cache_max_age_secs, 3600);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/vesper_test_nonexistent_config.toml");
        assert_eq!(Config::load(path).unwrap(), Config::default());
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let path = write_config("whitespace", "   \n  \n  ");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
        cleanup(&path);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let path = write_config(
            "partial",
            "proxy_base = \"https://relay.example.com\"\nconcurrency = 8\n",
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.proxy_base.as_deref(), Some("https://relay.example.com"));
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.unread_limit, 50);

        cleanup(&path);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let path = write_config("invalid", "this is not [valid toml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        cleanup(&path);
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::parse("unread_limit = 10\ntotally_fake_key = 1\n").unwrap();
        assert_eq!(config.unread_limit, 10);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        assert!(Config::parse("concurrency = \"many\"\n").is_err());
    }

    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("too_large", &"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        cleanup(&path);
    }

    #[test]
    fn test_proxy_override_replaces_file_value() {
        let config = Config::parse("proxy_base = \"https://file.example.com\"\n")
            .unwrap()
            .with_proxy_override(Some(" https://env.example.com ".to_string()));
        assert_eq!(config.proxy_base.as_deref(), Some("https://env.example.com"));
    }

    #[test]
    fn test_blank_proxy_override_ignored() {
        let config = Config::parse("proxy_base = \"https://file.example.com\"\n")
            .unwrap()
            .with_proxy_override(Some("   ".to_string()));
        assert_eq!(config.proxy_base.as_deref(), Some("https://file.example.com"));

        let config = Config::default().with_proxy_override(None);
        assert_eq!(config.proxy_base, None);
    }
}
