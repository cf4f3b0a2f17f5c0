//! Error types for duplexscan.
//!
//! Library crates use [`DuplexScanError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all duplexscan operations.
#[derive(Debug, thiserror::Error)]
pub enum DuplexScanError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error on a single path.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The watched source directory could not be read. Fatal for the watcher.
    #[error("cannot read scan directory {path:?}: {source}")]
    SourceDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Front and back scans split into a different number of pages.
    #[error(
        "different number of front and back pages: {front:?} ({front_pages}) and {back:?} ({back_pages})"
    )]
    PageCountMismatch {
        front: PathBuf,
        front_pages: usize,
        back: PathBuf,
        back_pages: usize,
    },

    /// An external page tool (splitter/joiner) failed.
    #[error("{program} failed: {message}")]
    Tool { program: String, message: String },

    /// The upload sink rejected or failed an upload.
    #[error("upload error: {0}")]
    Upload(String),

    /// Network/HTTP error talking to a remote sink.
    #[error("network error: {0}")]
    Network(String),

    /// Persisted state (watermark) could not be read or written.
    #[error("state error: {0}")]
    State(String),

    /// A pipeline stage task panicked or was aborted.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DuplexScanError>;

impl DuplexScanError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a tool failure for the given program.
    pub fn tool(program: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Tool {
            program: program.into(),
            message: msg.into(),
        }
    }

    /// Whether the pipeline is expected to absorb this error locally.
    ///
    /// Only a page-count mismatch is; it degrades to standalone delivery.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::PageCountMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DuplexScanError::config("scan_dir is not set");
        assert_eq!(err.to_string(), "config error: scan_dir is not set");

        let err = DuplexScanError::tool("pdfunite", "exit status 1");
        assert_eq!(err.to_string(), "pdfunite failed: exit status 1");
    }

    #[test]
    fn mismatch_names_both_files() {
        let err = DuplexScanError::PageCountMismatch {
            front: "/scans/duplex_a.pdf".into(),
            front_pages: 3,
            back: "/scans/duplex_b.pdf".into(),
            back_pages: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("duplex_a.pdf"));
        assert!(msg.contains("(3)"));
        assert!(msg.contains("duplex_b.pdf"));
        assert!(msg.contains("(2)"));
    }

    #[test]
    fn only_mismatch_is_recoverable() {
        let mismatch = DuplexScanError::PageCountMismatch {
            front: "a".into(),
            front_pages: 1,
            back: "b".into(),
            back_pages: 2,
        };
        assert!(mismatch.is_recoverable());
        assert!(!DuplexScanError::tool("pdfseparate", "boom").is_recoverable());
        assert!(!DuplexScanError::Upload("403".into()).is_recoverable());
    }
}
