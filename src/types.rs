//! Core types for scrape-toolkit

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Category of downloaded content, used to pick a storage subdirectory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Full-size images
    Image,
    /// Thumbnails / previews
    Thumbnail,
    /// Video files
    Video,
    /// Documents (PDF, HTML snapshots, ...)
    Document,
    /// Audio files
    Audio,
    /// Compressed archives
    Archive,
    /// Anything else
    Other,
}

impl ContentType {
    /// Every variant, in declaration order
    pub const ALL: [ContentType; 7] = [
        ContentType::Image,
        ContentType::Thumbnail,
        ContentType::Video,
        ContentType::Document,
        ContentType::Audio,
        ContentType::Archive,
        ContentType::Other,
    ];

    /// Directory name used for this category
    pub fn dir_name(&self) -> &'static str {
        match self {
            ContentType::Image => "images",
            ContentType::Thumbnail => "thumbnails",
            ContentType::Video => "videos",
            ContentType::Document => "documents",
            ContentType::Audio => "audio",
            ContentType::Archive => "archives",
            ContentType::Other => "other",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Closed classification of a failed transfer attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Request or body read timed out
    Timeout,
    /// Connection-level failure
    Network,
    /// Non-2xx HTTP status
    Status(u16),
    /// Body shorter or longer than declared
    ContentLengthMismatch,
    /// Destination filesystem lacks space
    InsufficientSpace,
    /// Local write/rename failure
    Io,
    /// Locator not understood by the strategy
    InvalidSource,
    /// Cancelled between attempts
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network"),
            FailureKind::Status(code) => write!(f, "status {}", code),
            FailureKind::ContentLengthMismatch => write!(f, "content length mismatch"),
            FailureKind::InsufficientSpace => write!(f, "insufficient space"),
            FailureKind::Io => write!(f, "io"),
            FailureKind::InvalidSource => write!(f, "invalid source"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of one [`FileDownloader::download`](crate::download::FileDownloader::download) call
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    /// Whether the file is now complete at `destination_path`
    pub success: bool,
    /// Final destination of the file
    pub destination_path: PathBuf,
    /// Bytes written by the successful attempt (0 on failure)
    pub bytes_written: u64,
    /// Number of transfer attempts performed
    pub attempts_used: u32,
    /// Kind of the last failure, when the download failed
    pub final_failure: Option<FailureKind>,
    /// Content category requested by the caller, if any
    pub content_type: Option<ContentType>,
}

/// Streaming progress snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Bytes written so far in the current attempt
    pub bytes_so_far: u64,
    /// Total size if the server declared one
    pub total: Option<u64>,
}

impl Progress {
    /// Completion percentage, or `None` when the total is unknown
    pub fn percent(&self) -> Option<f32> {
        match self.total {
            Some(0) => Some(100.0),
            Some(total) => Some((self.bytes_so_far as f64 / total as f64 * 100.0) as f32),
            None => None,
        }
    }
}

/// Orchestrator run state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No run started yet
    #[default]
    Idle,
    /// Items are being pulled and processed
    Running,
    /// Input exhausted without an abort
    Completed,
    /// A stage aborted, initialization failed, or the run was cancelled
    Aborted,
}

/// Per-run item counts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Items pulled from the input
    pub total: u64,
    /// Items that survived every stage
    pub emitted: u64,
    /// Items vetoed by a stage
    pub dropped: u64,
}

/// Structured run events published by the orchestrator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A run started
    RunStarted {
        /// Session id of the run
        session_id: String,
        /// Number of configured stages
        stages: usize,
    },

    /// An item was dropped by a stage
    ItemDropped {
        /// Item name
        name: String,
        /// Stage that dropped it
        stage: String,
        /// Optional reason given by the stage
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// An item survived all stages and was handed to the consumer
    ItemEmitted {
        /// Item name
        name: String,
        /// Zero-based position among emitted items
        index: u64,
    },

    /// The run finished normally
    RunCompleted {
        /// Session id of the run
        session_id: String,
        /// Final counts
        stats: PipelineStats,
    },

    /// The run ended early
    RunAborted {
        /// Session id of the run
        session_id: String,
        /// Error message
        error: String,
        /// Counts at the time of the abort
        stats: PipelineStats,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_dir_names_are_distinct() {
        let mut names: Vec<_> = ContentType::ALL.iter().map(|c| c.dir_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ContentType::ALL.len());
    }

    #[test]
    fn progress_percent_unknown_total() {
        let p = Progress {
            bytes_so_far: 1024,
            total: None,
        };
        assert_eq!(p.percent(), None);

        let p = Progress {
            bytes_so_far: 50,
            total: Some(200),
        };
        assert_eq!(p.percent(), Some(25.0));
    }

    #[test]
    fn pipeline_event_serializes_with_tag() {
        let event = PipelineEvent::ItemDropped {
            name: "widget".into(),
            stage: "validate".into(),
            reason: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "item_dropped");
        assert!(json.get("reason").is_none());
    }
}
