//! Transfer strategies
//!
//! A [`DownloadStrategy`] performs exactly one transfer attempt into a
//! [`StagedFile`]. Retrying, backoff and committing the staged file are the
//! downloader's job, so new transports only implement the single attempt.

use crate::config::DownloadConfig;
use crate::download::staging::StagedFile;
use crate::error::{Result, TransferError};
use crate::types::Progress;
use crate::utils::get_available_space;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Observer for streaming progress
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// One-attempt transfer capability
///
/// Implementations must stream into `destination` in bounded chunks and must not
/// touch the final destination path themselves.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use scrape_toolkit::download::{DownloadStrategy, ProgressCallback, StagedFile};
/// use scrape_toolkit::error::TransferError;
///
/// /// Serves a fixed payload, handy for dry runs
/// struct StaticStrategy(&'static [u8]);
///
/// #[async_trait]
/// impl DownloadStrategy for StaticStrategy {
///     async fn attempt(
///         &self,
///         _source: &str,
///         destination: &mut StagedFile,
///         _progress: Option<&ProgressCallback>,
///     ) -> Result<u64, TransferError> {
///         destination.write_all(self.0).await?;
///         Ok(self.0.len() as u64)
///     }
///
///     fn name(&self) -> &str {
///         "static"
///     }
/// }
/// ```
#[async_trait]
pub trait DownloadStrategy: Send + Sync {
    /// Transfer `source` into `destination` once, returning the bytes written
    ///
    /// # Errors
    ///
    /// Returns a [`TransferError`] describing why this attempt failed. The
    /// downloader decides whether the failure is worth another attempt.
    async fn attempt(
        &self,
        source: &str,
        destination: &mut StagedFile,
        progress: Option<&ProgressCallback>,
    ) -> std::result::Result<u64, TransferError>;

    /// Human-readable name for logging
    fn name(&self) -> &str;
}

/// HTTP(S) GET strategy backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpDownloadStrategy {
    client: reqwest::Client,
    chunk_size: usize,
    check_disk_space: bool,
}

impl HttpDownloadStrategy {
    /// Build a strategy with its own HTTP client
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) for invalid settings or
    /// [`Error::Network`](crate::Error::Network) if the client cannot be built.
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()?;

        Ok(Self {
            client,
            chunk_size: config.chunk_size,
            check_disk_space: config.check_disk_space,
        })
    }

    /// Reuse an existing client (shared cookies, proxies, connection pool)
    ///
    /// Timeouts and headers are whatever `client` was built with.
    pub fn with_client(client: reqwest::Client, config: &DownloadConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client,
            chunk_size: config.chunk_size,
            check_disk_space: config.check_disk_space,
        })
    }

    fn ensure_space(&self, dir: &Path, required: u64) -> std::result::Result<(), TransferError> {
        if !self.check_disk_space {
            return Ok(());
        }
        match get_available_space(dir) {
            Ok(available) if available < required => {
                Err(TransferError::InsufficientSpace { required, available })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                // Unknown free space is not a reason to refuse the transfer
                debug!(dir = %dir.display(), error = %e, "disk space check unavailable");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl DownloadStrategy for HttpDownloadStrategy {
    async fn attempt(
        &self,
        source: &str,
        destination: &mut StagedFile,
        progress: Option<&ProgressCallback>,
    ) -> std::result::Result<u64, TransferError> {
        let url = url::Url::parse(source)
            .map_err(|e| TransferError::InvalidSource(format!("{source}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransferError::InvalidSource(format!(
                "unsupported scheme '{}' in {}",
                url.scheme(),
                source
            )));
        }

        debug!(url = %url, "sending request");
        let mut response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = source, status = status.as_u16(), "non-success status");
            return Err(TransferError::Status(status.as_u16()));
        }

        let total = response.content_length();
        if let Some(required) = total
            && let Some(dir) = destination.temp_path().parent()
        {
            self.ensure_space(dir, required)?;
        }

        let start = destination.bytes_written();
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    let received = destination.bytes_written() - start;
                    if let Some(expected) = total
                        && received < expected
                        && !e.is_timeout()
                    {
                        debug!(url = source, error = %e, received, expected, "body ended early");
                        return Err(TransferError::ContentLengthMismatch {
                            expected,
                            actual: received,
                        });
                    }
                    return Err(e.into());
                }
            };
            for piece in chunk.chunks(self.chunk_size) {
                destination.write_all(piece).await?;
                if let Some(callback) = progress {
                    callback(Progress {
                        bytes_so_far: destination.bytes_written() - start,
                        total,
                    });
                }
            }
        }

        let received = destination.bytes_written() - start;
        if let Some(expected) = total
            && expected != received
        {
            return Err(TransferError::ContentLengthMismatch {
                expected,
                actual: received,
            });
        }

        debug!(url = source, bytes = received, "transfer finished");
        Ok(received)
    }

    fn name(&self) -> &str {
        "http"
    }
}
