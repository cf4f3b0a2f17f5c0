//! Duplex page interleaving.
//!
//! A single-sided scanner produces two documents for a double-sided stack:
//! the fronts in order, then (after the user flips the stack) the backs in
//! reverse order. [`MergeEngine`] splits both into pages, checks the counts
//! agree, interleaves them back into reading order and joins the result.

pub mod tools;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use duplexscan_shared::{DuplexScanError, Result};

pub use tools::{PageTool, PopplerTool, collect_pages, exit_ok};

/// Prefix for front-side page files inside a work directory.
const FRONT_PREFIX: &str = "front";

/// Prefix for back-side page files inside a work directory.
const BACK_PREFIX: &str = "back";

/// File name of the merged document inside a work directory.
pub const MERGED_FILE_NAME: &str = "out.pdf";

/// Interleaves a front scan with a reversed back scan.
#[derive(Clone)]
pub struct MergeEngine {
    tool: Arc<dyn PageTool>,
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine").finish_non_exhaustive()
    }
}

impl MergeEngine {
    pub fn new(tool: Arc<dyn PageTool>) -> Self {
        Self { tool }
    }

    /// Create a fresh, uniquely named work directory under `root`.
    pub async fn create_work_dir(root: &Path) -> Result<PathBuf> {
        let dir = root.join(Uuid::now_v7().to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DuplexScanError::io(&dir, e))?;
        Ok(dir)
    }

    /// Merge `front` and `back` into one document inside `work_dir`.
    ///
    /// Intermediate page files and the output are left in `work_dir`; the
    /// caller owns its lifetime. The inputs are never modified.
    ///
    /// Fails with [`DuplexScanError::PageCountMismatch`] if the two scans
    /// have a different number of pages.
    #[instrument(skip_all, fields(front = %front.display(), back = %back.display()))]
    pub async fn merge(&self, front: &Path, back: &Path, work_dir: &Path) -> Result<PathBuf> {
        let front_pages = self.tool.split(front, work_dir, FRONT_PREFIX).await?;
        let back_pages = self.tool.split(back, work_dir, BACK_PREFIX).await?;

        if front_pages.len() != back_pages.len() {
            return Err(DuplexScanError::PageCountMismatch {
                front: front.to_path_buf(),
                front_pages: front_pages.len(),
                back: back.to_path_buf(),
                back_pages: back_pages.len(),
            });
        }

        if front_pages.is_empty() {
            return Err(DuplexScanError::tool(
                "split",
                format!("no pages produced from {}", front.display()),
            ));
        }

        let ordered = interleave(&front_pages, &back_pages);
        let output = self
            .tool
            .join(&ordered, &work_dir.join(MERGED_FILE_NAME))
            .await?;

        info!(pages = ordered.len(), output = %output.display(), "duplex scans merged");
        Ok(output)
    }
}

/// Final reading order: front page `i` followed by back page `N-1-i`.
///
/// Both slices must have the same length.
pub fn interleave<T: Clone>(front: &[T], back: &[T]) -> Vec<T> {
    debug_assert_eq!(front.len(), back.len());
    front
        .iter()
        .zip(back.iter().rev())
        .flat_map(|(f, b)| [f.clone(), b.clone()])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::TextPageTool;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ds-merge-{tag}-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn engine() -> MergeEngine {
        MergeEngine::new(Arc::new(TextPageTool))
    }

    #[test]
    fn interleave_reverses_backs() {
        let front = ["f1", "f2", "f3"];
        // Back side scanned after flipping the stack: last page first
        let back = ["b3", "b2", "b1"];
        assert_eq!(
            interleave(&front, &back),
            vec!["f1", "b1", "f2", "b2", "f3", "b3"]
        );
    }

    #[test]
    fn interleave_matches_reading_order_for_any_length() {
        for n in 1..=12usize {
            let front: Vec<String> = (1..=n).map(|i| format!("front_{i}")).collect();
            let back: Vec<String> = (1..=n).rev().map(|i| format!("back_{i}")).collect();

            let merged = interleave(&front, &back);
            assert_eq!(merged.len(), 2 * n);
            // Order: front_1, back_N, front_2, back_{N-1}, ...
            for i in 0..n {
                assert_eq!(merged[2 * i], front[i]);
                assert_eq!(merged[2 * i + 1], back[n - 1 - i]);
            }
        }
    }

    #[tokio::test]
    async fn merges_three_page_scans() {
        let dir = temp_dir("three");
        let front = dir.join("duplex_front.pdf");
        let back = dir.join("duplex_back.pdf");
        TextPageTool::write_document(&front, &["page 1", "page 3", "page 5"]).unwrap();
        TextPageTool::write_document(&back, &["page 6", "page 4", "page 2"]).unwrap();

        let work = MergeEngine::create_work_dir(&dir.join("work")).await.unwrap();
        let output = engine().merge(&front, &back, &work).await.unwrap();

        assert_eq!(output, work.join(MERGED_FILE_NAME));
        let pages = TextPageTool::read_pages(&output).unwrap();
        assert_eq!(
            pages,
            vec!["page 1", "page 2", "page 3", "page 4", "page 5", "page 6"]
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn merges_more_than_nine_pages_in_order() {
        let dir = temp_dir("eleven");
        let front_pages: Vec<String> = (0..11).map(|i| format!("p{}", 2 * i + 1)).collect();
        let back_pages: Vec<String> = (0..11).rev().map(|i| format!("p{}", 2 * i + 2)).collect();
        let front = dir.join("f.pdf");
        let back = dir.join("b.pdf");
        std::fs::write(&front, front_pages.join("\n")).unwrap();
        std::fs::write(&back, back_pages.join("\n")).unwrap();

        let work = MergeEngine::create_work_dir(&dir).await.unwrap();
        let output = engine().merge(&front, &back, &work).await.unwrap();

        let expected: Vec<String> = (1..=22).map(|i| format!("p{i}")).collect();
        assert_eq!(TextPageTool::read_pages(&output).unwrap(), expected);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn page_count_mismatch_fails_without_joining() {
        let dir = temp_dir("mismatch");
        let front = dir.join("duplex_a.pdf");
        let back = dir.join("duplex_b.pdf");
        TextPageTool::write_document(&front, &["1", "3", "5"]).unwrap();
        TextPageTool::write_document(&back, &["4", "2"]).unwrap();

        let work = MergeEngine::create_work_dir(&dir.join("work")).await.unwrap();
        let err = engine().merge(&front, &back, &work).await.unwrap_err();

        match &err {
            DuplexScanError::PageCountMismatch {
                front_pages,
                back_pages,
                ..
            } => {
                assert_eq!(*front_pages, 3);
                assert_eq!(*back_pages, 2);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
        assert!(err.is_recoverable());
        assert!(!work.join(MERGED_FILE_NAME).exists());
        // Inputs untouched
        assert_eq!(TextPageTool::read_pages(&front).unwrap(), vec!["1", "3", "5"]);
        assert_eq!(TextPageTool::read_pages(&back).unwrap(), vec!["4", "2"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn work_dirs_are_unique() {
        let dir = temp_dir("unique");
        let a = MergeEngine::create_work_dir(&dir).await.unwrap();
        let b = MergeEngine::create_work_dir(&dir).await.unwrap();
        assert_ne!(a, b);
        assert!(a.is_dir() && b.is_dir());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
