//! Configuration types for chapter-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Upper bound for the worker pool size
pub const MAX_DOWNLOAD_CONCURRENCY: usize = 10;

/// Download behavior configuration (concurrency, politeness, fetching)
///
/// Used as a nested sub-config within [`Config`]. `download_concurrency` and
/// `download_delay` are only the defaults: values saved through
/// [`crate::ChapterDownloader::update_settings`] take precedence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Number of worker slots (default: 3, clamped to 1..=10)
    #[serde(default = "default_concurrency")]
    pub download_concurrency: usize,

    /// Minimum delay between consecutive fetches of one worker slot (default: 1s)
    #[serde(default = "default_download_delay", with = "duration_ms")]
    pub download_delay: Duration,

    /// Upper bound for a single page fetch (default: 30s)
    #[serde(default = "default_fetch_timeout", with = "duration_ms")]
    pub fetch_timeout: Duration,

    /// User agent sent by the HTTP page fetcher
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Directory chapter bodies are written to (default: "./chapters")
    #[serde(default = "default_chapter_dir")]
    pub chapter_dir: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_concurrency: default_concurrency(),
            download_delay: default_download_delay(),
            fetch_timeout: default_fetch_timeout(),
            user_agent: default_user_agent(),
            chapter_dir: default_chapter_dir(),
        }
    }
}

/// Retry configuration for transient failures
///
/// Applies both to the chapter index fetch of a sync and to chapter jobs: a job
/// is started at most `1 + max_attempts` times.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 2 seconds)
    #[serde(default = "default_initial_delay", with = "duration_ms")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Data storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path used by [`crate::db::SqliteStore`] (default: "./chapter-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Main configuration for ChapterDownloader
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Reject settings the worker pool cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.download.download_concurrency == 0 {
            return Err(Error::Config {
                message: "download_concurrency must be at least 1".to_string(),
                key: Some("download_concurrency".to_string()),
            });
        }
        if self.download.fetch_timeout.is_zero() {
            return Err(Error::Config {
                message: "fetch_timeout must be greater than zero".to_string(),
                key: Some("fetch_timeout".to_string()),
            });
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: "backoff_multiplier must be at least 1.0".to_string(),
                key: Some("backoff_multiplier".to_string()),
            });
        }
        if self.persistence.event_buffer == 0 {
            return Err(Error::Config {
                message: "event_buffer must be at least 1".to_string(),
                key: Some("event_buffer".to_string()),
            });
        }
        Ok(())
    }

    /// Settings derived from this config, used until the store has its own
    pub fn default_settings(&self) -> DownloadSettings {
        DownloadSettings {
            download_concurrency: self.download.download_concurrency,
            download_delay: self.download.download_delay,
        }
        .clamped()
    }
}

/// User-tunable download settings, persisted in the story store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Worker slots
    #[serde(default = "default_concurrency")]
    pub download_concurrency: usize,

    /// Politeness delay per worker slot
    #[serde(default = "default_download_delay", with = "duration_ms")]
    pub download_delay: Duration,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            download_concurrency: default_concurrency(),
            download_delay: default_download_delay(),
        }
    }
}

impl DownloadSettings {
    /// Clamp concurrency into `1..=MAX_DOWNLOAD_CONCURRENCY`
    pub fn clamped(self) -> Self {
        Self {
            download_concurrency: self
                .download_concurrency
                .clamp(1, MAX_DOWNLOAD_CONCURRENCY),
            download_delay: self.download_delay,
        }
    }
}

// Default value functions
fn default_concurrency() -> usize {
    3
}

fn default_download_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("chapter-dl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_chapter_dir() -> PathBuf {
    PathBuf::from("chapters")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("chapter-dl.db")
}

fn default_event_buffer() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (milliseconds)
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
