//! External page tools: single-page splitting and multi-page joining.
//!
//! The merge engine treats these as a capability. [`PopplerTool`] drives
//! `pdfseparate` / `pdfunite`; tests substitute their own implementation.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, instrument};

use duplexscan_shared::{DuplexScanError, Result, ToolsSection};

/// Split documents into single pages and join pages back into one document.
#[async_trait]
pub trait PageTool: Send + Sync {
    /// Split `document` into one file per page inside `out_dir`, named with
    /// `prefix`. Returns the page files in page order.
    async fn split(&self, document: &Path, out_dir: &Path, prefix: &str) -> Result<Vec<PathBuf>>;

    /// Join `pages`, in the given order, into `output`.
    async fn join(&self, pages: &[PathBuf], output: &Path) -> Result<PathBuf>;
}

// ---------------------------------------------------------------------------
// Poppler
// ---------------------------------------------------------------------------

/// `pdfseparate` / `pdfunite` from poppler-utils.
#[derive(Debug, Clone)]
pub struct PopplerTool {
    splitter: String,
    joiner: String,
    /// Non-zero splitter exit codes that still mean success (pdfseparate exits 99).
    splitter_ok_codes: Vec<i32>,
}

impl PopplerTool {
    pub fn new(splitter: impl Into<String>, joiner: impl Into<String>) -> Self {
        Self {
            splitter: splitter.into(),
            joiner: joiner.into(),
            splitter_ok_codes: vec![99],
        }
    }

    pub fn with_splitter_ok_codes(mut self, codes: Vec<i32>) -> Self {
        self.splitter_ok_codes = codes;
        self
    }
}

impl Default for PopplerTool {
    fn default() -> Self {
        Self::from(&ToolsSection::default())
    }
}

impl From<&ToolsSection> for PopplerTool {
    fn from(tools: &ToolsSection) -> Self {
        Self::new(&tools.splitter, &tools.joiner)
            .with_splitter_ok_codes(tools.splitter_ok_codes.clone())
    }
}

#[async_trait]
impl PageTool for PopplerTool {
    #[instrument(skip_all, fields(document = %document.display(), prefix = %prefix))]
    async fn split(&self, document: &Path, out_dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
        let pattern = out_dir.join(format!("{prefix}-%d.pdf"));
        let output = run(
            Command::new(&self.splitter).arg(document).arg(&pattern),
            &self.splitter,
        )
        .await?;

        if !exit_ok(&output.status, &self.splitter_ok_codes) {
            return Err(DuplexScanError::tool(
                &self.splitter,
                failure_message(document, &output),
            ));
        }

        let pages = collect_pages(out_dir, prefix).await?;
        debug!(pages = pages.len(), "document split");
        Ok(pages)
    }

    #[instrument(skip_all, fields(pages = pages.len(), output = %output.display()))]
    async fn join(&self, pages: &[PathBuf], output: &Path) -> Result<PathBuf> {
        let result = run(Command::new(&self.joiner).args(pages).arg(output), &self.joiner).await?;

        if !result.status.success() {
            return Err(DuplexScanError::tool(
                &self.joiner,
                failure_message(output, &result),
            ));
        }

        Ok(output.to_path_buf())
    }
}

async fn run(command: &mut Command, program: &str) -> Result<Output> {
    command.kill_on_drop(true).output().await.map_err(|e| {
        DuplexScanError::tool(program, format!("could not start: {e}. Is `{program}` installed?"))
    })
}

fn failure_message(subject: &Path, output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!(
        "{} ({}): {}",
        subject.display(),
        output.status,
        stderr.trim()
    )
}

/// Success, or one of the listed exit codes that the tool uses for success.
pub fn exit_ok(status: &ExitStatus, ok_codes: &[i32]) -> bool {
    status.success() || status.code().is_some_and(|code| ok_codes.contains(&code))
}

/// Find `<prefix>-<n>.pdf` files in `dir`, ordered by page number `n`.
///
/// Numeric ordering keeps page 10 after page 9.
pub async fn collect_pages(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let pattern = Regex::new(&format!(r"^{}-(\d+)\.pdf$", regex::escape(prefix)))
        .map_err(|e| DuplexScanError::validation(format!("bad page prefix '{prefix}': {e}")))?;

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| DuplexScanError::io(dir, e))?;
    let mut pages: Vec<(u64, PathBuf)> = Vec::new();

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DuplexScanError::io(dir, e))?
    {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(index) = pattern
            .captures(name)
            .and_then(|caps| caps[1].parse::<u64>().ok())
        {
            pages.push((index, entry.path()));
        }
    }

    pages.sort_by_key(|(index, _)| *index);
    Ok(pages.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ds-pages-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn pages_sorted_numerically() {
        let dir = temp_dir();
        for n in [10, 2, 1, 11, 3] {
            std::fs::write(dir.join(format!("front-{n}.pdf")), b"").unwrap();
        }
        std::fs::write(dir.join("back-1.pdf"), b"").unwrap();
        std::fs::write(dir.join("front-x.pdf"), b"").unwrap();
        std::fs::write(dir.join("out.pdf"), b"").unwrap();

        let pages = collect_pages(&dir, "front").await.unwrap();
        let names: Vec<_> = pages
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            names,
            vec!["front-1.pdf", "front-2.pdf", "front-3.pdf", "front-10.pdf", "front-11.pdf"]
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn prefix_is_matched_literally() {
        let dir = temp_dir();
        std::fs::write(dir.join("a.b-1.pdf"), b"").unwrap();
        std::fs::write(dir.join("axb-1.pdf"), b"").unwrap();

        let pages = collect_pages(&dir, "a.b").await.unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].ends_with("a.b-1.pdf"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn splitter_quirk_code_counts_as_success() {
        let quirk = std::process::Command::new("sh")
            .args(["-c", "exit 99"])
            .status()
            .unwrap();
        let failure = std::process::Command::new("sh")
            .args(["-c", "exit 1"])
            .status()
            .unwrap();
        let success = std::process::Command::new("sh")
            .args(["-c", "exit 0"])
            .status()
            .unwrap();

        assert!(exit_ok(&quirk, &[99]));
        assert!(!exit_ok(&quirk, &[]));
        assert!(!exit_ok(&failure, &[99]));
        assert!(exit_ok(&success, &[]));
    }

    #[tokio::test]
    async fn missing_binary_is_tool_error() {
        let dir = temp_dir();
        let tool = PopplerTool::new("ds-no-such-splitter", "ds-no-such-joiner");

        let err = tool
            .split(&dir.join("in.pdf"), &dir, "front")
            .await
            .unwrap_err();
        match err {
            DuplexScanError::Tool { program, message } => {
                assert_eq!(program, "ds-no-such-splitter");
                assert!(message.contains("installed"));
            }
            other => panic!("expected Tool error, got {other:?}"),
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn tool_from_config_section() {
        let section = ToolsSection {
            splitter: "/opt/poppler/pdfseparate".into(),
            joiner: "/opt/poppler/pdfunite".into(),
            splitter_ok_codes: vec![99, 98],
        };
        let tool = PopplerTool::from(&section);
        assert_eq!(tool.splitter, "/opt/poppler/pdfseparate");
        assert_eq!(tool.joiner, "/opt/poppler/pdfunite");
        assert_eq!(tool.splitter_ok_codes, vec![99, 98]);
    }
}
