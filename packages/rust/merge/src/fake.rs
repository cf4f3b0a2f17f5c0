//! Text-backed [`PageTool`] for tests.
//!
//! A "document" is a UTF-8 text file with one page per line, so page order
//! survives split and join and can be asserted on without poppler.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use duplexscan_shared::{DuplexScanError, Result};

use crate::tools::{PageTool, collect_pages};

#[derive(Debug, Clone, Copy, Default)]
pub struct TextPageTool;

impl TextPageTool {
    /// Write a document whose pages are `pages`.
    pub fn write_document(path: &Path, pages: &[&str]) -> std::io::Result<()> {
        std::fs::write(path, pages.join("\n"))
    }

    /// Read back the pages of a document.
    pub fn read_pages(path: &Path) -> std::io::Result<Vec<String>> {
        let content = std::fs::read_to_string(path)?;
        Ok(content.lines().map(str::to_string).collect())
    }
}

#[async_trait]
impl PageTool for TextPageTool {
    async fn split(&self, document: &Path, out_dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
        let content = tokio::fs::read_to_string(document)
            .await
            .map_err(|e| DuplexScanError::io(document, e))?;

        for (i, page) in content.lines().enumerate() {
            let path = out_dir.join(format!("{prefix}-{}.pdf", i + 1));
            tokio::fs::write(&path, page)
                .await
                .map_err(|e| DuplexScanError::io(&path, e))?;
        }

        collect_pages(out_dir, prefix).await
    }

    async fn join(&self, pages: &[PathBuf], output: &Path) -> Result<PathBuf> {
        let mut lines = Vec::with_capacity(pages.len());
        for page in pages {
            let text = tokio::fs::read_to_string(page)
                .await
                .map_err(|e| DuplexScanError::io(page, e))?;
            lines.push(text);
        }
        tokio::fs::write(output, lines.join("\n"))
            .await
            .map_err(|e| DuplexScanError::io(output, e))?;
        Ok(output.to_path_buf())
    }
}
