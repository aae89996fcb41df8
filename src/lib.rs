//! # scrape-toolkit
//!
//! Building blocks for web scrapers that produce records and files.
//!
//! ## Design Philosophy
//!
//! scrape-toolkit is designed to be:
//! - **Library-first** - No CLI or crawler, purely a crate to embed in a scraper
//! - **Sensible defaults** - Every setting has a default and is validated up front
//! - **Lazy** - Item streams are pulled one at a time and may be unbounded
//! - **Event-driven** - Consumers subscribe to run events instead of polling
//!
//! ## Components
//!
//! - [`RetryPolicy`] - how many times and how long to wait between transfer attempts
//! - [`FileDownloader`] - retrying downloads that never leave a partial file behind
//! - [`StoragePathManager`] - deterministic placement of files under a root
//! - [`PipelineOrchestrator`] - ordered stages over a stream of [`ScrapedItem`]s
//!
//! ## Quick Start
//!
//! ```no_run
//! use futures::stream;
//! use scrape_toolkit::pipeline::{DownloadStage, NormalizeNameStage, ValidationStage};
//! use scrape_toolkit::{Config, ContentType, PipelineOrchestrator, ScrapedItem};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!
//!     let mut orchestrator = PipelineOrchestrator::with_config(
//!         vec![
//!             Box::new(ValidationStage::default()),
//!             Box::new(NormalizeNameStage),
//!             Box::new(DownloadStage::from_config(&config, ContentType::Image)?),
//!         ],
//!         config.pipeline.clone(),
//!     )?;
//!
//!     // Subscribe to events
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let items = stream::iter(vec![
//!         ScrapedItem::new("gallery", "Sunset")
//!             .with_metadata("download_url", "https://example.com/sunset.jpg"),
//!     ]);
//!     let run = orchestrator.execute(items).await;
//!     for item in run.into_result()? {
//!         println!("{} -> {:?}", item.name, item.local_path);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Downloads, transfer strategies and storage placement
pub mod download;
/// Error types
pub mod error;
/// Staged item pipeline
pub mod pipeline;
/// Retry policy with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, PathLayout, PipelineConfig, StorageConfig};
pub use download::{DownloadStrategy, FileDownloader, HttpDownloadStrategy, StoragePathManager};
pub use error::{Error, PipelineError, Result, TransferError};
pub use pipeline::{
    ItemSink, PipelineContext, PipelineOrchestrator, PipelineRun, PipelineStage, ScrapedItem,
    StageControl, StageResult,
};
pub use retry::{IsRetryable, RetryPolicy};
pub use types::{
    ContentType, DownloadResult, FailureKind, PipelineEvent, PipelineStats, Progress, RunState,
};
