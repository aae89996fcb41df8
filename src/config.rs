//! Configuration types for scrape-toolkit
//!
//! All configuration is plain data with serde support and sensible defaults.
//! Values are checked once by [`Config::validate`] (and again by each component
//! constructor), so invalid settings fail before any run starts.

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::utils::MAX_NAME_BYTES;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Transfer settings used by the downloader and the HTTP strategy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Per-attempt request timeout, covering the whole transfer (default: 30 seconds)
    #[serde(default = "default_timeout", with = "duration_ms")]
    pub timeout: Duration,

    /// TCP connect timeout (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Maximum bytes written to disk per write call (default: 8192)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Verify TLS certificates (default: true)
    #[serde(default = "default_true")]
    pub verify_ssl: bool,

    /// Refuse transfers whose declared size exceeds free disk space (default: true)
    #[serde(default = "default_true")]
    pub check_disk_space: bool,

    /// Retry and backoff policy
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            chunk_size: default_chunk_size(),
            user_agent: default_user_agent(),
            verify_ssl: true,
            check_disk_space: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl DownloadConfig {
    /// Check transfer settings and the nested retry policy
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::config("download.timeout", "timeout must be non-zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config(
                "download.connect_timeout",
                "connect_timeout must be non-zero",
            ));
        }
        if self.chunk_size == 0 {
            return Err(Error::config(
                "download.chunk_size",
                "chunk_size must be at least 1 byte",
            ));
        }
        self.retry.validate()
    }
}

/// Directory placement strategy for downloaded content
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathLayout {
    /// `root/<content type>` - all sources share one directory per type
    Flat,
    /// `root/<source>/<content type>`
    #[default]
    SourceThenType,
    /// `root/<content type>/<source>`
    TypeThenSource,
}

/// Storage placement settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for all downloads (default: "downloads")
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Placement strategy
    #[serde(default)]
    pub layout: PathLayout,

    /// Maximum length in UTF-8 bytes of any sanitized path segment (default: 100, at most 255)
    #[serde(default = "default_max_segment_len")]
    pub max_segment_len: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            layout: PathLayout::default(),
            max_segment_len: default_max_segment_len(),
        }
    }
}

impl StorageConfig {
    /// Check storage settings
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(Error::config("storage.root", "storage root must not be empty"));
        }
        if self.max_segment_len == 0 {
            return Err(Error::config(
                "storage.max_segment_len",
                "max_segment_len must be at least 1",
            ));
        }
        if self.max_segment_len > MAX_NAME_BYTES {
            return Err(Error::config(
                "storage.max_segment_len",
                format!(
                    "max_segment_len {} exceeds the {} byte file name limit",
                    self.max_segment_len, MAX_NAME_BYTES
                ),
            ));
        }
        Ok(())
    }
}

/// Orchestrator settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Fixed session id for runs; a fresh id is generated per run when `None`
    #[serde(default)]
    pub session_id: Option<String>,

    /// Capacity of the event broadcast channel (default: 256)
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl PipelineConfig {
    /// Check orchestrator settings
    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(Error::config(
                "pipeline.event_capacity",
                "event_capacity must be at least 1",
            ));
        }
        if matches!(&self.session_id, Some(id) if id.trim().is_empty()) {
            return Err(Error::config(
                "pipeline.session_id",
                "session_id must not be blank when set",
            ));
        }
        Ok(())
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Transfer and retry settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Storage placement
    #[serde(default)]
    pub storage: StorageConfig,

    /// Orchestrator settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.download.validate()?;
        self.storage.validate()?;
        self.pipeline.validate()
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_chunk_size() -> usize {
    8192
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_true() -> bool {
    true
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_max_segment_len() -> usize {
    100
}

fn default_event_capacity() -> usize {
    256
}

// Duration serialization helper (integer milliseconds)
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
