//! Upload sinks: where finished documents are delivered.
//!
//! The pipeline only sees [`UploadSink`]. [`DriveSink`] uploads to Google
//! Drive; [`DirectorySink`] copies into a local directory (useful for NAS
//! shares and for tests).

pub mod directory;
pub mod drive;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use duplexscan_shared::{AppConfig, DuplexScanError, Result, SinkKind, expand_home};

pub use directory::DirectorySink;
pub use drive::{DriveFolder, DriveSink};

/// Destination for finished documents.
#[async_trait]
pub trait UploadSink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Deliver the file at `path` under the display name `title`.
    ///
    /// Returns an identifier for the stored copy (remote file id or
    /// destination path).
    async fn upload(&self, path: &Path, title: &str) -> Result<String>;
}

/// MIME type from the file extension. Scanners mostly produce PDFs, so
/// anything unrecognised is sent as one.
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("tif" | "tiff") => "image/tiff",
        Some("txt") => "text/plain",
        _ => "application/pdf",
    }
}

/// Build the sink selected by `[sink] kind`.
pub fn sink_from_config(config: &AppConfig) -> Result<Arc<dyn UploadSink>> {
    match config.sink.kind {
        SinkKind::Drive => Ok(Arc::new(DriveSink::from_config(config)?)),
        SinkKind::Directory => {
            if config.sink.target_dir.is_empty() {
                return Err(DuplexScanError::config(
                    "sink.target_dir must be set for the directory sink",
                ));
            }
            Ok(Arc::new(DirectorySink::new(expand_home(
                &config.sink.target_dir,
            ))))
        }
    }
}
