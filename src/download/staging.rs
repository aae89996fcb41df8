//! Staged destination files
//!
//! Bytes are written to a hidden temporary file next to the final destination
//! and only become visible at the final path through a single rename. A staged
//! file that is dropped or discarded without [`StagedFile::commit`] removes its
//! temporary file.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Suffix of in-progress temporary files
pub const TEMP_SUFFIX: &str = ".part";

/// Byte length of every temporary file name (`.` + 16 hex digits + suffix)
pub const TEMP_NAME_LEN: usize = 1 + 16 + TEMP_SUFFIX.len();

/// An open, not-yet-visible destination for one transfer attempt
#[derive(Debug)]
pub struct StagedFile {
    temp_path: PathBuf,
    final_path: PathBuf,
    file: Option<File>,
    bytes_written: u64,
}

impl StagedFile {
    /// Create a fresh temporary file in the destination's directory
    ///
    /// The parent directory is created if missing. The temporary file lives on the
    /// same filesystem as `final_path`, so the later rename is atomic. Its name has
    /// a fixed length of [`TEMP_NAME_LEN`] bytes whatever the final name is.
    pub async fn create(final_path: &Path) -> io::Result<Self> {
        if final_path.file_name().is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("destination has no file name: {}", final_path.display()),
            ));
        }

        let parent = match final_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).await?;

        let temp_path = parent.join(format!(".{:016x}{}", rand::random::<u64>(), TEMP_SUFFIX));

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;

        debug!(temp = %temp_path.display(), "staged file created");

        Ok(Self {
            temp_path,
            final_path: final_path.to_path_buf(),
            file: Some(file),
            bytes_written: 0,
        })
    }

    /// Append bytes to the temporary file
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("staged file already closed"))?;
        file.write_all(buf).await?;
        self.bytes_written += buf.len() as u64;
        Ok(())
    }

    /// Bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Path of the hidden temporary file
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Path the file will occupy after commit
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Flush to disk and atomically move into the final path
    ///
    /// Replaces any existing file at the final path. Returns the number of bytes written.
    pub async fn commit(mut self) -> io::Result<u64> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }

        fs::rename(&self.temp_path, &self.final_path).await?;
        // Nothing left to clean up on drop
        self.temp_path = PathBuf::new();

        debug!(
            destination = %self.final_path.display(),
            bytes = self.bytes_written,
            "staged file committed"
        );
        Ok(self.bytes_written)
    }

    /// Close and delete the temporary file
    pub async fn discard(mut self) {
        self.file.take();
        if let Err(e) = fs::remove_file(&self.temp_path).await
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(temp = %self.temp_path.display(), error = %e, "failed to remove staged file");
        }
        self.temp_path = PathBuf::new();
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.temp_path.as_os_str().is_empty() {
            return;
        }
        self.file.take();
        let _ = std::fs::remove_file(&self.temp_path);
    }
}
