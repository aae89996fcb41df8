//! Storage path placement
//!
//! [`StoragePathManager`] maps `(source, content type, filename)` to a location
//! under the configured root. Placement is a pure function of its inputs and the
//! configuration; only [`StoragePathManager::get_content_dir`] touches the disk.

use crate::config::{PathLayout, StorageConfig};
use crate::error::{Error, Result};
use crate::types::ContentType;
use crate::utils::{sanitize_filename, sanitize_segment};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Deterministic directory layout under a root directory
#[derive(Debug, Clone)]
pub struct StoragePathManager {
    root: PathBuf,
    layout: PathLayout,
    max_segment_len: usize,
}

impl StoragePathManager {
    /// Validate the configuration and create the root directory
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid settings and [`Error::Io`] if the root
    /// cannot be created.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.root)?;
        Ok(Self {
            root: config.root.clone(),
            layout: config.layout,
            max_segment_len: config.max_segment_len,
        })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Placement strategy in use
    pub fn layout(&self) -> PathLayout {
        self.layout
    }

    /// Directory for `source` and `content_type`, without touching the disk
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if `source` is blank.
    pub fn content_dir(&self, source: &str, content_type: ContentType) -> Result<PathBuf> {
        if source.trim().is_empty() {
            return Err(Error::InvalidPath {
                path: self.root.clone(),
                reason: "source must be a non-empty string".to_string(),
            });
        }

        let source = sanitize_segment(source, self.max_segment_len);
        let kind = content_type.dir_name();

        Ok(match self.layout {
            PathLayout::Flat => self.root.join(kind),
            PathLayout::SourceThenType => self.root.join(source).join(kind),
            PathLayout::TypeThenSource => self.root.join(kind).join(source),
        })
    }

    /// Directory for `source` and `content_type`, created if missing
    ///
    /// Creating an existing directory is not an error.
    pub async fn get_content_dir(&self, source: &str, content_type: ContentType) -> Result<PathBuf> {
        let dir = self.content_dir(source, content_type)?;
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "content directory ready");
        Ok(dir)
    }

    /// Full destination path for a file, with the file name sanitized
    pub fn file_path(
        &self,
        source: &str,
        content_type: ContentType,
        filename: &str,
    ) -> Result<PathBuf> {
        Ok(self
            .content_dir(source, content_type)?
            .join(sanitize_filename(filename, self.max_segment_len)))
    }

    /// Like [`StoragePathManager::file_path`], with `-{n}` before the extension
    ///
    /// `n == 0` gives the plain name. The stem is shortened so the suffix always
    /// survives the segment length bound.
    pub fn numbered_file_path(
        &self,
        source: &str,
        content_type: ContentType,
        filename: &str,
        n: u32,
    ) -> Result<PathBuf> {
        if n == 0 {
            return self.file_path(source, content_type, filename);
        }
        let suffix = format!("-{n}");
        let budget = self.max_segment_len.saturating_sub(suffix.len()).max(1);
        let name = sanitize_filename(filename, budget);
        let numbered = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!("{stem}{suffix}.{ext}"),
            _ => format!("{name}{suffix}"),
        };
        Ok(self.content_dir(source, content_type)?.join(numbered))
    }

    /// Like [`StoragePathManager::file_path`], with the content directory created
    pub async fn prepare_file_path(
        &self,
        source: &str,
        content_type: ContentType,
        filename: &str,
    ) -> Result<PathBuf> {
        let dir = self.get_content_dir(source, content_type).await?;
        Ok(dir.join(sanitize_filename(filename, self.max_segment_len)))
    }

    /// Forward-slash, lower-case form of `path`, relative to the root when under it
    ///
    /// Suitable as a stable key for storing file references.
    pub fn normalize_path(&self, path: &Path) -> String {
        if path.as_os_str().is_empty() {
            return String::new();
        }
        let relative = if path.is_absolute() || path.starts_with(&self.root) {
            path.strip_prefix(&self.root).unwrap_or(path)
        } else {
            path
        };
        relative.to_string_lossy().replace('\\', "/").to_lowercase()
    }

    /// Absolute location of a root-relative path
    ///
    /// Paths already under the root are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for `..` components or absolute paths
    /// outside the root.
    pub fn resolve_path(&self, relative: &str) -> Result<PathBuf> {
        if relative.is_empty() {
            return Ok(self.root.clone());
        }

        let candidate = Path::new(relative);
        if candidate.starts_with(&self.root) {
            return self.reject_traversal(candidate).map(|_| candidate.to_path_buf());
        }

        let trimmed = relative.trim_start_matches(['/', '\\']);
        let candidate = Path::new(trimmed);
        if candidate.is_absolute() {
            return Err(Error::InvalidPath {
                path: candidate.to_path_buf(),
                reason: "absolute path outside storage root".to_string(),
            });
        }
        self.reject_traversal(candidate)?;
        Ok(self.root.join(candidate))
    }

    fn reject_traversal(&self, path: &Path) -> Result<()> {
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(Error::InvalidPath {
                path: path.to_path_buf(),
                reason: "path traversal is not allowed".to_string(),
            });
        }
        Ok(())
    }
}
