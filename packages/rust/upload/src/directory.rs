//! Local directory sink.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, instrument};

use duplexscan_shared::{DuplexScanError, Result};

use crate::UploadSink;

/// Give up finding a free name after this many suffixes.
const MAX_SUFFIX: u32 = 10_000;

/// Copies documents into `target_dir`, never overwriting existing files.
///
/// A name collision gets a `-1`, `-2`, ... suffix before the extension.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    target_dir: PathBuf,
}

impl DirectorySink {
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
        }
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Create a new, previously nonexistent file for `title`.
    async fn create_destination(&self, title: &str) -> Result<(PathBuf, tokio::fs::File)> {
        let base = Path::new(title);
        let stem = base
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DuplexScanError::validation(format!("unusable title '{title}'")))?;
        let ext = base.extension().and_then(|e| e.to_str());

        for n in 0..=MAX_SUFFIX {
            let name = match (n, ext) {
                (0, _) => title.to_string(),
                (n, Some(ext)) => format!("{stem}-{n}.{ext}"),
                (n, None) => format!("{stem}-{n}"),
            };
            let dest = self.target_dir.join(name);

            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&dest)
                .await
            {
                Ok(file) => return Ok((dest, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(DuplexScanError::io(&dest, e)),
            }
        }

        Err(DuplexScanError::Upload(format!(
            "no free name for '{title}' in {}",
            self.target_dir.display()
        )))
    }
}

#[async_trait]
impl UploadSink for DirectorySink {
    fn name(&self) -> &'static str {
        "directory"
    }

    #[instrument(skip_all, fields(path = %path.display(), title = %title))]
    async fn upload(&self, path: &Path, title: &str) -> Result<String> {
        let mut source = tokio::fs::File::open(path)
            .await
            .map_err(|e| DuplexScanError::io(path, e))?;

        tokio::fs::create_dir_all(&self.target_dir)
            .await
            .map_err(|e| DuplexScanError::io(&self.target_dir, e))?;

        let (dest, mut file) = self.create_destination(title).await?;
        if let Err(e) = tokio::io::copy(&mut source, &mut file).await {
            drop(file);
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(DuplexScanError::io(&dest, e));
        }

        debug!(dest = %dest.display(), "copied to directory sink");
        Ok(dest.to_string_lossy().into_owned())
    }
}
