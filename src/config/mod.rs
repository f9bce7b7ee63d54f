//! Configuration management for reis-sync
//!
//! This module handles loading and validating configuration from environment variables
//! and TOML files.

use crate::models::Language;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Portal connection settings
    pub portal: PortalConfig,

    /// Student identifiers used to build portal URLs
    pub student: StudentConfig,

    /// Background sync settings
    pub sync: SyncConfig,

    /// Folder crawler settings
    pub crawler: CrawlerConfig,

    /// Message bridge settings
    pub bridge: BridgeConfig,

    /// Booking scheduler settings
    pub booking: BookingConfig,

    /// Local cache store settings
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Active UI language
    pub language: Language,
}

/// Portal connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Portal origin, e.g. `https://is.mendelu.cz`
    pub base_url: String,

    /// Session cookie (`name=value`) attached to every request
    pub session_cookie: Option<String>,

    /// User agent string
    pub user_agent: String,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Rate limit (requests per second)
    pub rate_limit: u32,

    /// Retry attempts for idempotent requests
    pub max_retries: u32,
}

/// Student identifiers
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StudentConfig {
    /// Numeric person id
    pub user_id: Option<String>,

    /// Study id (`studium`)
    pub studium: Option<String>,

    /// Period id (`obdobi`)
    pub obdobi: Option<String>,
}

/// Background sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval between full syncs in seconds
    pub interval_secs: u64,

    /// Maximum subject workloads in flight
    pub subject_concurrency: usize,

    /// Run a sync immediately on startup
    pub run_on_startup: bool,
}

/// Folder crawler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Maximum recursion depth below the root folder
    pub max_depth: u32,

    /// Delay between subfolder dispatches in milliseconds
    pub subfolder_delay_ms: u64,

    /// Concurrency limit for pagination pages
    pub page_concurrency: usize,
}

/// Message bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Correlated request timeout in milliseconds
    pub request_timeout_ms: u64,
}

/// Booking scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingConfig {
    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,
}

/// Local cache store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,

    /// Age in seconds after which a per-subject entry is refetched
    pub max_age_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://is.mendelu.cz"),
            session_cookie: None,
            user_agent: format!("reis-sync/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 30,
            rate_limit: 5,
            max_retries: 2,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            subject_concurrency: 3,
            run_on_startup: true,
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            subfolder_delay_ms: 200,
            page_concurrency: 3,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
        }
    }
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/reis-cache.db"),
            max_age_secs: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Unset or unparsable variables fall back to the defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let portal = PortalConfig {
            base_url: std::env::var("REIS_BASE_URL").unwrap_or(defaults.portal.base_url),
            session_cookie: std::env::var("REIS_SESSION_COOKIE").ok(),
            user_agent: std::env::var("REIS_USER_AGENT").unwrap_or(defaults.portal.user_agent),
            request_timeout_secs: env_parse("REIS_REQUEST_TIMEOUT")
                .unwrap_or(defaults.portal.request_timeout_secs),
            rate_limit: env_parse("REIS_RATE_LIMIT").unwrap_or(defaults.portal.rate_limit),
            max_retries: env_parse("REIS_MAX_RETRIES").unwrap_or(defaults.portal.max_retries),
        };

        let student = StudentConfig {
            user_id: std::env::var("REIS_USER_ID").ok(),
            studium: std::env::var("REIS_STUDIUM").ok(),
            obdobi: std::env::var("REIS_OBDOBI").ok(),
        };

        let sync = SyncConfig {
            interval_secs: env_parse("REIS_SYNC_INTERVAL").unwrap_or(defaults.sync.interval_secs),
            subject_concurrency: env_parse("REIS_SUBJECT_CONCURRENCY")
                .unwrap_or(defaults.sync.subject_concurrency),
            run_on_startup: env_parse("REIS_SYNC_ON_STARTUP")
                .unwrap_or(defaults.sync.run_on_startup),
        };

        let crawler = CrawlerConfig {
            max_depth: env_parse("REIS_CRAWL_MAX_DEPTH").unwrap_or(defaults.crawler.max_depth),
            subfolder_delay_ms: env_parse("REIS_CRAWL_SUBFOLDER_DELAY_MS")
                .unwrap_or(defaults.crawler.subfolder_delay_ms),
            page_concurrency: env_parse("REIS_CRAWL_PAGE_CONCURRENCY")
                .unwrap_or(defaults.crawler.page_concurrency),
        };

        let bridge = BridgeConfig {
            request_timeout_ms: env_parse("REIS_BRIDGE_TIMEOUT_MS")
                .unwrap_or(defaults.bridge.request_timeout_ms),
        };

        let booking = BookingConfig {
            poll_interval_ms: env_parse("REIS_BOOKING_POLL_MS")
                .unwrap_or(defaults.booking.poll_interval_ms),
        };

        let storage = StorageConfig {
            sqlite_path: std::env::var("REIS_SQLITE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.sqlite_path),
            max_age_secs: env_parse("REIS_CACHE_MAX_AGE").unwrap_or(defaults.storage.max_age_secs),
        };

        let logging = LoggingConfig {
            level: std::env::var("REIS_LOG_LEVEL").unwrap_or(defaults.logging.level),
            format: std::env::var("REIS_LOG_FORMAT").unwrap_or(defaults.logging.format),
        };

        let language = match std::env::var("REIS_LANG") {
            Ok(value) => value
                .parse::<Language>()
                .map_err(anyhow::Error::msg)
                .context("Invalid REIS_LANG")?,
            Err(_) => defaults.language,
        };

        Ok(Self {
            portal,
            student,
            sync,
            crawler,
            bridge,
            booking,
            storage,
            logging,
            language,
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.portal.base_url)
            .with_context(|| format!("Invalid portal base_url: {}", self.portal.base_url))?;

        if self.portal.rate_limit == 0 {
            anyhow::bail!("rate_limit must be greater than 0");
        }

        if self.sync.subject_concurrency == 0 {
            anyhow::bail!("subject_concurrency must be greater than 0");
        }

        if self.sync.interval_secs == 0 {
            anyhow::bail!("sync interval must be greater than 0");
        }

        if self.crawler.page_concurrency == 0 {
            anyhow::bail!("page_concurrency must be greater than 0");
        }

        if self.bridge.request_timeout_ms == 0 {
            anyhow::bail!("bridge request_timeout_ms must be greater than 0");
        }

        if self.booking.poll_interval_ms == 0 {
            anyhow::bail!("booking poll_interval_ms must be greater than 0");
        }

        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.portal.request_timeout_secs)
    }

    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    #[must_use]
    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge.request_timeout_ms)
    }

    #[must_use]
    pub fn subfolder_delay(&self) -> Duration {
        Duration::from_millis(self.crawler.subfolder_delay_ms)
    }

    #[must_use]
    pub fn booking_poll_interval(&self) -> Duration {
        Duration::from_millis(self.booking.poll_interval_ms)
    }

    #[must_use]
    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.storage.max_age_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_subject_concurrency() {
        let mut config = Config::default();
        config.sync.subject_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = Config::default();
        config.portal.base_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_conversions() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.sync_interval(), Duration::from_secs(300));
        assert_eq!(config.bridge_timeout(), Duration::from_millis(30_000));
        assert_eq!(config.subfolder_delay(), Duration::from_millis(200));
        assert_eq!(config.booking_poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            language = "en"

            [crawler]
            max_depth = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.language, Language::En);
        assert_eq!(config.crawler.max_depth, 4);
        assert_eq!(config.crawler.subfolder_delay_ms, 200);
        assert_eq!(config.sync.subject_concurrency, 3);
    }
}
