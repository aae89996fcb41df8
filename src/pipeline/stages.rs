//! Built-in pipeline stages
//!
//! - [`ValidationStage`] - drops items with unusable names or detail URLs
//! - [`NormalizeNameStage`] - tidies names and records a matching key
//! - [`DownloadStage`] - materializes a referenced file on disk

use crate::config::Config;
use crate::download::{FileDownloader, StoragePathManager};
use crate::error::Result;
use crate::pipeline::{PipelineContext, PipelineStage, ScrapedItem, StageControl, StageResult};
use crate::types::{ContentType, FailureKind};
use crate::utils::{clean_name, filename_from_url, is_valid_url, normalize_whitespace};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Counter: files downloaded successfully
pub const DOWNLOADS_SUCCEEDED: &str = "downloads_succeeded";
/// Counter: downloads that ended in failure
pub const DOWNLOADS_FAILED: &str = "downloads_failed";
/// Counter: total bytes written by successful downloads
pub const BYTES_DOWNLOADED: &str = "bytes_downloaded";

/// Drops items whose name or detail URL cannot be used downstream
#[derive(Debug, Clone)]
pub struct ValidationStage {
    min_name_len: usize,
    max_name_len: usize,
    require_detail_url: bool,
}

impl Default for ValidationStage {
    fn default() -> Self {
        Self {
            min_name_len: 1,
            max_name_len: 200,
            require_detail_url: false,
        }
    }
}

impl ValidationStage {
    /// Accept names between 1 and 200 characters; detail URL optional
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds on the whitespace-normalized name length, in characters
    pub fn with_name_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_name_len = min;
        self.max_name_len = max;
        self
    }

    /// Drop items without a detail URL
    pub fn require_detail_url(mut self, required: bool) -> Self {
        self.require_detail_url = required;
        self
    }
}

#[async_trait]
impl PipelineStage for ValidationStage {
    fn name(&self) -> &str {
        "validation"
    }

    async fn process(&mut self, item: ScrapedItem, _ctx: &mut PipelineContext) -> StageResult {
        let len = normalize_whitespace(&item.name).chars().count();
        if len < self.min_name_len || len > self.max_name_len {
            return Err(StageControl::dropped(format!(
                "name length {} outside {}..={}",
                len, self.min_name_len, self.max_name_len
            )));
        }

        match &item.detail_url {
            Some(url) if !is_valid_url(url) => {
                Err(StageControl::dropped(format!("invalid detail URL: {url}")))
            }
            None if self.require_detail_url => Err(StageControl::dropped("missing detail URL")),
            _ => Ok(item),
        }
    }
}

/// Collapses whitespace in names and stores a `clean_name` metadata entry
#[derive(Debug, Clone, Default)]
pub struct NormalizeNameStage;

/// Metadata key written by [`NormalizeNameStage`]
pub const CLEAN_NAME_KEY: &str = "clean_name";

#[async_trait]
impl PipelineStage for NormalizeNameStage {
    fn name(&self) -> &str {
        "normalize_name"
    }

    async fn process(&mut self, mut item: ScrapedItem, _ctx: &mut PipelineContext) -> StageResult {
        item.name = normalize_whitespace(&item.name);
        let clean = clean_name(&item.name);
        item.add_metadata(CLEAN_NAME_KEY, clean);
        Ok(item)
    }
}

/// What [`DownloadStage`] does with an item whose download failed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    /// Pass the item on without a local path
    #[default]
    Keep,
    /// Drop the item
    Drop,
    /// Abort the run
    Abort,
}

/// Downloads the file an item points at and records its local path
///
/// The URL is read from a metadata key (default `download_url`), optionally
/// falling back to the item's detail URL. Items without a URL pass through
/// untouched. A cancelled download always aborts the run.
///
/// Within one run, two different URLs never share a destination: a later URL
/// whose file name is already taken gets a numbered name (`cover-1.jpg`).
#[derive(Debug)]
pub struct DownloadStage {
    downloader: FileDownloader,
    paths: StoragePathManager,
    content_type: ContentType,
    url_key: String,
    detail_url_fallback: bool,
    on_failure: OnFailure,
    claimed: HashMap<PathBuf, String>,
}

impl DownloadStage {
    /// Metadata key read by default
    pub const DEFAULT_URL_KEY: &'static str = "download_url";

    /// Stage storing files of `content_type`
    pub fn new(
        downloader: FileDownloader,
        paths: StoragePathManager,
        content_type: ContentType,
    ) -> Self {
        Self {
            downloader,
            paths,
            content_type,
            url_key: Self::DEFAULT_URL_KEY.to_string(),
            detail_url_fallback: false,
            on_failure: OnFailure::default(),
            claimed: HashMap::new(),
        }
    }

    /// Build the HTTP downloader and path manager from `config`
    ///
    /// # Errors
    ///
    /// Fails fast on invalid configuration or an uncreatable storage root.
    pub fn from_config(config: &Config, content_type: ContentType) -> Result<Self> {
        config.validate()?;
        let downloader = FileDownloader::new(&config.download)?;
        let paths = StoragePathManager::new(&config.storage)?;
        Ok(Self::new(downloader, paths, content_type))
    }

    /// Read the URL from a different metadata key
    pub fn with_url_key(mut self, key: impl Into<String>) -> Self {
        self.url_key = key.into();
        self
    }

    /// Use `detail_url` when the metadata key is absent
    pub fn with_detail_url_fallback(mut self, enabled: bool) -> Self {
        self.detail_url_fallback = enabled;
        self
    }

    /// Failure handling
    pub fn with_on_failure(mut self, on_failure: OnFailure) -> Self {
        self.on_failure = on_failure;
        self
    }

    fn source_url(&self, item: &ScrapedItem) -> Option<String> {
        item.metadata_str(&self.url_key)
            .map(str::to_owned)
            .or_else(|| {
                self.detail_url_fallback
                    .then(|| item.detail_url.clone())
                    .flatten()
            })
    }

    /// Destination for `url`, distinct from every other URL's in this run
    async fn claim_destination(
        &mut self,
        source: &str,
        filename: &str,
        url: &str,
    ) -> Result<PathBuf> {
        self.paths.get_content_dir(source, self.content_type).await?;
        let mut n = 0;
        loop {
            let path = self
                .paths
                .numbered_file_path(source, self.content_type, filename, n)?;
            match self.claimed.get(&path) {
                Some(owner) if owner != url => n += 1,
                _ => {
                    if n > 0 {
                        debug!(url, path = %path.display(), "file name taken, using numbered name");
                    }
                    self.claimed.insert(path.clone(), url.to_string());
                    return Ok(path);
                }
            }
        }
    }

    fn fail(&self, mut item: ScrapedItem, ctx: &mut PipelineContext, failure: String) -> StageResult {
        ctx.increment(DOWNLOADS_FAILED, 1);
        warn!(name = %item.name, source = %item.source, %failure, "download failed");
        match self.on_failure {
            OnFailure::Keep => {
                item.add_metadata("download_error", failure);
                Ok(item)
            }
            OnFailure::Drop => Err(StageControl::dropped(format!("download failed: {failure}"))),
            OnFailure::Abort => Err(StageControl::abort(format!(
                "download of '{}' failed: {}",
                item.name, failure
            ))),
        }
    }
}

#[async_trait]
impl PipelineStage for DownloadStage {
    fn name(&self) -> &str {
        "download"
    }

    async fn initialize(&mut self, _ctx: &mut PipelineContext) -> Result<()> {
        self.claimed.clear();
        Ok(())
    }

    async fn process(&mut self, mut item: ScrapedItem, ctx: &mut PipelineContext) -> StageResult {
        let Some(url) = self.source_url(&item) else {
            debug!(name = %item.name, "no download URL, passing through");
            return Ok(item);
        };

        let filename = filename_from_url(&url).unwrap_or_else(|| item.name.clone());
        let destination = match self.claim_destination(&item.source, &filename, &url).await {
            Ok(path) => path,
            Err(e) => return self.fail(item, ctx, e.to_string()),
        };

        let result = self
            .downloader
            .download_with_cancel(
                &url,
                &destination,
                Some(self.content_type),
                ctx.cancellation(),
            )
            .await;

        if result.success {
            ctx.increment(DOWNLOADS_SUCCEEDED, 1);
            ctx.increment(BYTES_DOWNLOADED, result.bytes_written);
            info!(
                name = %item.name,
                path = %result.destination_path.display(),
                bytes = result.bytes_written,
                attempts = result.attempts_used,
                "file downloaded"
            );
            item.add_metadata("download_attempts", result.attempts_used);
            item.local_path = Some(result.destination_path);
            return Ok(item);
        }

        match result.final_failure {
            Some(FailureKind::Cancelled) => Err(StageControl::abort("download cancelled")),
            Some(kind) => self.fail(item, ctx, kind.to_string()),
            None => self.fail(item, ctx, "unknown failure".to_string()),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DownloadConfig, PathLayout, StorageConfig};
    use crate::retry::RetryPolicy;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx() -> PipelineContext {
        PipelineContext::new("test")
    }

    fn download_stage(root: &std::path::Path) -> DownloadStage {
        let config = Config {
            download: DownloadConfig {
                retry: RetryPolicy::new(2, Duration::from_millis(5), 2.0, Duration::from_millis(10))
                    .unwrap(),
                ..Default::default()
            },
            storage: StorageConfig {
                root: root.to_path_buf(),
                layout: PathLayout::SourceThenType,
                max_segment_len: 100,
            },
            ..Default::default()
        };
        DownloadStage::from_config(&config, ContentType::Image).unwrap()
    }

    #[tokio::test]
    async fn validation_drops_bad_names() {
        let mut stage = ValidationStage::new().with_name_bounds(2, 10);
        let mut ctx = ctx();

        assert!(stage.process(ScrapedItem::new("s", "ok"), &mut ctx).await.is_ok());
        assert!(matches!(
            stage.process(ScrapedItem::new("s", "   "), &mut ctx).await,
            Err(StageControl::Drop { .. })
        ));
        assert!(matches!(
            stage.process(ScrapedItem::new("s", "far too long a name"), &mut ctx).await,
            Err(StageControl::Drop { .. })
        ));
    }

    #[tokio::test]
    async fn validation_checks_detail_url() {
        let mut stage = ValidationStage::new().require_detail_url(true);
        let mut ctx = ctx();

        let good = ScrapedItem::new("s", "n").with_detail_url("https://example.com/1");
        assert!(stage.process(good, &mut ctx).await.is_ok());

        let relative = ScrapedItem::new("s", "n").with_detail_url("/item/1");
        assert!(stage.process(relative, &mut ctx).await.is_err());

        let missing = ScrapedItem::new("s", "n");
        assert_eq!(
            stage.process(missing, &mut ctx).await.unwrap_err(),
            StageControl::dropped("missing detail URL")
        );
    }

    #[tokio::test]
    async fn normalize_sets_clean_name() {
        let mut stage = NormalizeNameStage;
        let item = stage
            .process(ScrapedItem::new("s", "  Big   Box (2024) "), &mut ctx())
            .await
            .unwrap();
        assert_eq!(item.name, "Big Box (2024)");
        assert_eq!(item.get_metadata(CLEAN_NAME_KEY), Some(&json!("big box 2024")));
    }

    #[tokio::test]
    async fn download_stage_materializes_file() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/cover.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpegdata".to_vec()))
            .mount(&mock_server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let mut stage = download_stage(temp_dir.path());
        let mut ctx = ctx();

        let item = ScrapedItem::new("shop", "Cover")
            .with_metadata("download_url", format!("{}/img/cover.jpg", mock_server.uri()));
        let item = stage.process(item, &mut ctx).await.unwrap();

        let expected = temp_dir.path().join("shop").join("images").join("cover.jpg");
        assert_eq!(item.local_path.as_deref(), Some(expected.as_path()));
        assert_eq!(std::fs::read(&expected).unwrap(), b"jpegdata");
        assert_eq!(ctx.counter(DOWNLOADS_SUCCEEDED), 1);
        assert_eq!(ctx.counter(BYTES_DOWNLOADED), 8);
    }

    #[tokio::test]
    async fn download_stage_keeps_same_basename_files_apart() {
        let mock_server = MockServer::start().await;
        for (route, body) in [("/a/cover.jpg", "AAAAAAAA"), ("/b/cover.jpg", "BBBBBBBB")] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(body.as_bytes().to_vec()))
                .mount(&mock_server)
                .await;
        }

        let temp_dir = TempDir::new().unwrap();
        let mut stage = download_stage(temp_dir.path());
        let mut ctx = ctx();
        stage.initialize(&mut ctx).await.unwrap();

        let item = |name: &str, route: &str| {
            ScrapedItem::new("shop", name)
                .with_metadata("download_url", format!("{}{}", mock_server.uri(), route))
        };
        let first = stage.process(item("A", "/a/cover.jpg"), &mut ctx).await.unwrap();
        let second = stage.process(item("B", "/b/cover.jpg"), &mut ctx).await.unwrap();
        let again = stage.process(item("A again", "/a/cover.jpg"), &mut ctx).await.unwrap();

        let dir = temp_dir.path().join("shop").join("images");
        assert_eq!(first.local_path, Some(dir.join("cover.jpg")));
        assert_eq!(second.local_path, Some(dir.join("cover-1.jpg")));
        assert_eq!(again.local_path, first.local_path, "same URL reuses its file");
        assert_eq!(std::fs::read(dir.join("cover.jpg")).unwrap(), b"AAAAAAAA");
        assert_eq!(std::fs::read(dir.join("cover-1.jpg")).unwrap(), b"BBBBBBBB");
    }

    #[tokio::test]
    async fn download_stage_passes_items_without_url() {
        let temp_dir = TempDir::new().unwrap();
        let mut stage = download_stage(temp_dir.path());
        let mut ctx = ctx();

        let item = ScrapedItem::new("shop", "No media").with_detail_url("https://example.com/x");
        let out = stage.process(item.clone(), &mut ctx).await.unwrap();
        assert_eq!(out, item);
        assert_eq!(ctx.counter(DOWNLOADS_FAILED), 0);
    }

    #[tokio::test]
    async fn download_stage_failure_policies() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.png"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&mock_server)
            .await;
        let url = format!("{}/gone.png", mock_server.uri());
        let temp_dir = TempDir::new().unwrap();
        let mut ctx = ctx();
        let item = ScrapedItem::new("shop", "Gone").with_metadata("download_url", url.as_str());

        let mut keep = download_stage(temp_dir.path());
        let kept = keep.process(item.clone(), &mut ctx).await.unwrap();
        assert!(kept.local_path.is_none());
        assert_eq!(kept.metadata_str("download_error"), Some("status 410"));

        let mut dropper = download_stage(temp_dir.path()).with_on_failure(OnFailure::Drop);
        assert!(matches!(
            dropper.process(item.clone(), &mut ctx).await,
            Err(StageControl::Drop { .. })
        ));

        let mut abort = download_stage(temp_dir.path()).with_on_failure(OnFailure::Abort);
        assert!(matches!(
            abort.process(item, &mut ctx).await,
            Err(StageControl::Abort { .. })
        ));

        assert_eq!(ctx.counter(DOWNLOADS_FAILED), 3);
        assert!(!temp_dir.path().join("shop").join("images").join("gone.png").exists());
    }

    #[tokio::test]
    async fn download_stage_detail_url_fallback_and_custom_key() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"<html/>".to_vec()))
            .mount(&mock_server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let mut stage = download_stage(temp_dir.path())
            .with_url_key("thumbnail")
            .with_detail_url_fallback(true);
        let mut ctx = ctx();

        let item = ScrapedItem::new("shop", "Page")
            .with_detail_url(format!("{}/page", mock_server.uri()));
        let item = stage.process(item, &mut ctx).await.unwrap();
        assert_eq!(
            item.local_path.unwrap(),
            temp_dir.path().join("shop").join("images").join("page")
        );
    }

    #[tokio::test]
    async fn download_stage_aborts_when_cancelled() {
        let temp_dir = TempDir::new().unwrap();
        let mut stage = download_stage(temp_dir.path());
        let mut ctx = ctx();
        ctx.cancellation().cancel();

        let item = ScrapedItem::new("shop", "x")
            .with_metadata("download_url", "http://127.0.0.1:9/x.bin");
        assert_eq!(
            stage.process(item, &mut ctx).await.unwrap_err(),
            StageControl::abort("download cancelled")
        );
    }
}
