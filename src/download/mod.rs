//! File downloads with retries and atomic placement
//!
//! - [`FileDownloader`] - retry/backoff loop over a pluggable strategy
//! - [`DownloadStrategy`] / [`HttpDownloadStrategy`] - one transfer attempt
//! - [`StagedFile`] - temp-file-then-rename destination handle
//! - [`StoragePathManager`] - deterministic placement under a root directory
//!
//! Two downloads racing for the same final path never produce a half-written
//! file, but the last rename wins. No locking is done to order them.

mod path;
mod staging;
mod strategy;

pub use path::StoragePathManager;
pub use staging::{StagedFile, TEMP_NAME_LEN, TEMP_SUFFIX};
pub use strategy::{DownloadStrategy, HttpDownloadStrategy, ProgressCallback};

use crate::config::DownloadConfig;
use crate::error::{Result, TransferError};
use crate::retry::RetryPolicy;
use crate::types::{ContentType, DownloadResult, FailureKind, Progress};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, info, warn};

/// Downloads a locator to a destination path, retrying transient failures
///
/// # Example
///
/// ```no_run
/// use scrape_toolkit::config::DownloadConfig;
/// use scrape_toolkit::download::FileDownloader;
/// use scrape_toolkit::types::ContentType;
/// use std::path::Path;
///
/// # async fn example() -> scrape_toolkit::Result<()> {
/// let downloader = FileDownloader::new(&DownloadConfig::default())?;
/// let result = downloader
///     .download(
///         "https://example.com/cover.jpg",
///         Path::new("downloads/cover.jpg"),
///         Some(ContentType::Image),
///     )
///     .await;
/// if !result.success {
///     eprintln!("failed after {} attempts: {:?}", result.attempts_used, result.final_failure);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FileDownloader {
    strategy: Arc<dyn DownloadStrategy>,
    retry: RetryPolicy,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for FileDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDownloader")
            .field("strategy", &self.strategy.name())
            .field("retry", &self.retry)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl FileDownloader {
    /// Downloader using the HTTP strategy
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or if the HTTP client cannot be built.
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let strategy = HttpDownloadStrategy::new(config)?;
        Self::with_strategy(config, Arc::new(strategy))
    }

    /// Downloader using a caller-provided strategy
    pub fn with_strategy(config: &DownloadConfig, strategy: Arc<dyn DownloadStrategy>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            strategy,
            retry: config.retry.clone(),
            progress: None,
        })
    }

    /// Observe streaming progress of every attempt
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Retry policy in use
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Download `source` to `destination`
    ///
    /// Never fails for expected transfer problems; those are reported in the
    /// returned [`DownloadResult`].
    pub async fn download(
        &self,
        source: &str,
        destination: &Path,
        content_type: Option<ContentType>,
    ) -> DownloadResult {
        self.download_with_cancel(source, destination, content_type, &CancellationToken::new())
            .await
    }

    /// Like [`FileDownloader::download`], but stops between attempts once `cancel` fires
    ///
    /// An attempt already streaming is allowed to finish. A cancelled download
    /// reports [`FailureKind::Cancelled`].
    pub async fn download_with_cancel(
        &self,
        source: &str,
        destination: &Path,
        content_type: Option<ContentType>,
        cancel: &CancellationToken,
    ) -> DownloadResult {
        let span = debug_span!(
            "download",
            url = source,
            destination = %destination.display(),
            strategy = self.strategy.name()
        );
        self.run_attempts(source, destination, content_type, cancel)
            .instrument(span)
            .await
    }

    async fn run_attempts(
        &self,
        source: &str,
        destination: &Path,
        content_type: Option<ContentType>,
        cancel: &CancellationToken,
    ) -> DownloadResult {
        let failed = |attempts_used: u32, kind: FailureKind| DownloadResult {
            success: false,
            destination_path: destination.to_path_buf(),
            bytes_written: 0,
            attempts_used,
            final_failure: Some(kind),
            content_type,
        };

        let max_attempts = self.retry.max_attempts;
        let mut attempt = 0;
        let mut last_failure = None;

        while attempt < max_attempts {
            if cancel.is_cancelled() {
                info!(attempts = attempt, "download cancelled");
                return failed(attempt, FailureKind::Cancelled);
            }
            attempt += 1;

            match self.attempt_once(source, destination).await {
                Ok(bytes_written) => {
                    if attempt > 1 {
                        info!(attempts = attempt, "download succeeded after retry");
                    }
                    debug!(bytes = bytes_written, "download complete");
                    return DownloadResult {
                        success: true,
                        destination_path: destination.to_path_buf(),
                        bytes_written,
                        attempts_used: attempt,
                        final_failure: None,
                        content_type,
                    };
                }
                Err(e) => {
                    let kind = e.kind();
                    last_failure = Some(kind);

                    if !self.retry.is_retryable(kind) {
                        error!(error = %e, attempt, "download failed with non-retryable error");
                        return failed(attempt, kind);
                    }
                    if attempt >= max_attempts {
                        break;
                    }

                    let delay = self.retry.sleep_duration(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "download attempt failed, retrying"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            info!(attempts = attempt, "download cancelled during backoff");
                            return failed(attempt, FailureKind::Cancelled);
                        }
                    }
                }
            }
        }

        let kind = last_failure.unwrap_or(FailureKind::Network);
        error!(attempts = attempt, failure = %kind, "download failed after all retry attempts exhausted");
        failed(attempt, kind)
    }

    async fn attempt_once(
        &self,
        source: &str,
        destination: &Path,
    ) -> std::result::Result<u64, TransferError> {
        let mut staged = StagedFile::create(destination).await?;
        match self
            .strategy
            .attempt(source, &mut staged, self.progress.as_ref())
            .await
        {
            Ok(_) => Ok(staged.commit().await?),
            Err(e) => {
                staged.discard().await;
                Err(e)
            }
        }
    }
}
