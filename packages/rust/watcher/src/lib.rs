//! Directory polling with write-stability detection.
//!
//! The scanner driver writes documents incrementally, so a file that just
//! appeared may still be growing. The watcher lists the scan directory on a
//! fixed interval, picks out regular files newer than the watermark, and only
//! hands a file downstream once two consecutive modification-time
//! observations agree.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use duplexscan_shared::{DuplexScanError, Result, ScanItem, WatchConfig, Watermark, to_utc};

// ---------------------------------------------------------------------------
// PassOutcome
// ---------------------------------------------------------------------------

/// Result of one listing pass over the scan directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassOutcome {
    /// Items sent downstream during this pass.
    pub emitted: usize,
    /// Watermark to use for the next pass.
    pub watermark: Watermark,
    /// The pass stopped early (cancelled, or nobody is listening any more).
    pub interrupted: bool,
}

// ---------------------------------------------------------------------------
// StabilityWatcher
// ---------------------------------------------------------------------------

/// Polls a flat directory and emits each new file once its writes have settled.
#[derive(Debug, Clone)]
pub struct StabilityWatcher {
    config: WatchConfig,
}

impl StabilityWatcher {
    pub fn new(config: WatchConfig) -> Self {
        Self { config }
    }

    pub fn scan_dir(&self) -> &Path {
        &self.config.scan_dir
    }

    /// Poll forever, starting from `watermark`, until cancelled or the
    /// receiving side hangs up.
    ///
    /// A directory that cannot be read is fatal and ends the loop with
    /// [`DuplexScanError::SourceDir`].
    #[instrument(skip_all, fields(dir = %self.config.scan_dir.display()))]
    pub async fn run(
        &self,
        mut watermark: Watermark,
        tx: UnboundedSender<ScanItem>,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!(
            %watermark,
            interval_secs = self.config.scan_interval.as_secs_f64(),
            stability_secs = self.config.stability_poll.as_secs_f64(),
            "watching for new scans"
        );

        loop {
            let outcome = match self.scan_pass(watermark, &tx, &cancel).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "scan directory unavailable, stopping watcher");
                    return Err(e);
                }
            };
            watermark = outcome.watermark;

            if outcome.interrupted || tx.is_closed() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.scan_interval) => {}
            }
        }

        info!(%watermark, "watcher stopped");
        Ok(())
    }

    /// One listing pass: emit every stable new file in name order.
    ///
    /// Filtering uses the watermark as it was at the start of the pass; the
    /// returned watermark is the maximum over everything emitted, so a file
    /// listed early with a later mtime cannot hide a file listed after it.
    pub async fn scan_pass(
        &self,
        watermark: Watermark,
        tx: &UnboundedSender<ScanItem>,
        cancel: &CancellationToken,
    ) -> Result<PassOutcome> {
        let candidates = self.pending(watermark).await?;
        let mut high_water = watermark;
        let mut emitted = 0;

        for (path, _listed_mtime) in candidates {
            let modified = match self.wait_until_stable(&path, cancel).await {
                Ok(Some(modified)) => modified,
                Ok(None) => {
                    return Ok(PassOutcome {
                        emitted,
                        watermark: high_water,
                        interrupted: true,
                    });
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "file vanished while settling, skipping");
                    continue;
                }
            };

            high_water.advance(modified);
            let item = ScanItem::discovered(path, modified);
            info!(file = %item.file_name, "new scan is stable");

            if tx.send(item).is_err() {
                debug!("downstream closed, ending pass");
                return Ok(PassOutcome {
                    emitted,
                    watermark: high_water,
                    interrupted: true,
                });
            }
            emitted += 1;
        }

        Ok(PassOutcome {
            emitted,
            watermark: high_water,
            interrupted: false,
        })
    }

    /// Regular files in the scan directory modified strictly after
    /// `watermark`, sorted by file name. Subdirectories are ignored.
    pub async fn pending(&self, watermark: Watermark) -> Result<Vec<(PathBuf, DateTime<Utc>)>> {
        let dir = &self.config.scan_dir;
        let source_err = |source| DuplexScanError::SourceDir {
            path: dir.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(dir).await.map_err(source_err)?;
        let mut found = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(source_err)? {
            let path = entry.path();
            let meta = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "cannot stat entry, skipping");
                    continue;
                }
            };

            if meta.is_dir() {
                continue;
            }

            let modified = match meta.modified() {
                Ok(time) => to_utc(time),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "no modification time, skipping");
                    continue;
                }
            };

            if watermark.admits(modified) {
                found.push((path, modified));
            }
        }

        found.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));
        Ok(found)
    }

    /// Block until `path`'s modification time stops changing.
    ///
    /// Returns the settled time, or `None` if cancelled while waiting.
    pub async fn wait_until_stable(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<DateTime<Utc>>> {
        let mut last_seen: Option<DateTime<Utc>> = None;

        loop {
            let current = modification_time(path).await?;
            if last_seen == Some(current) {
                return Ok(Some(current));
            }
            if last_seen.is_some() {
                debug!(path = %path.display(), "still being written");
            }
            last_seen = Some(current);

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.config.stability_poll) => {}
            }
        }
    }
}

async fn modification_time(path: &Path) -> Result<DateTime<Utc>> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| DuplexScanError::io(path, e))?;
    let modified = meta.modified().map_err(|e| DuplexScanError::io(path, e))?;
    Ok(to_utc(modified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tokio::sync::mpsc;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ds-watch-{tag}-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn watcher(dir: &Path) -> StabilityWatcher {
        StabilityWatcher::new(WatchConfig {
            scan_dir: dir.to_path_buf(),
            scan_interval: Duration::from_millis(20),
            stability_poll: Duration::from_millis(20),
        })
    }

    /// Write a file and pin its mtime to `base + offset_secs`.
    fn write_at(dir: &Path, name: &str, offset_secs: u64) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, name.as_bytes()).unwrap();
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + offset_secs);
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(time).unwrap();
        path
    }

    fn names(items: &[ScanItem]) -> Vec<&str> {
        items.iter().map(|i| i.file_name.as_str()).collect()
    }

    async fn run_pass(w: &StabilityWatcher, mark: Watermark) -> (PassOutcome, Vec<ScanItem>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = w
            .scan_pass(mark, &tx, &CancellationToken::new())
            .await
            .unwrap();
        drop(tx);
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        (outcome, items)
    }

    #[tokio::test]
    async fn emits_new_files_in_name_order() {
        let dir = temp_dir("order");
        write_at(&dir, "c.pdf", 1);
        write_at(&dir, "a.pdf", 3);
        write_at(&dir, "b.pdf", 2);

        let (outcome, items) = run_pass(&watcher(&dir), Watermark::default()).await;

        assert_eq!(names(&items), vec!["a.pdf", "b.pdf", "c.pdf"]);
        assert_eq!(outcome.emitted, 3);
        assert!(!outcome.interrupted);
        assert!(items.iter().all(|i| !i.is_merged()));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn watermark_advances_to_pass_maximum() {
        let dir = temp_dir("max");
        // Earlier in the listing but later in time
        write_at(&dir, "a.pdf", 50);
        write_at(&dir, "b.pdf", 10);

        let (outcome, items) = run_pass(&watcher(&dir), Watermark::default()).await;

        assert_eq!(items.len(), 2);
        let newest = items.iter().map(|i| i.modified).max();
        assert_eq!(outcome.watermark.get(), newest);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn rescan_at_watermark_emits_nothing() {
        let dir = temp_dir("idem");
        write_at(&dir, "a.pdf", 1);
        write_at(&dir, "b.pdf", 2);
        let w = watcher(&dir);

        let (first, _) = run_pass(&w, Watermark::default()).await;
        let (second, items) = run_pass(&w, first.watermark).await;

        assert!(items.is_empty());
        assert_eq!(second.emitted, 0);
        assert_eq!(second.watermark, first.watermark);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn only_strictly_newer_files_are_emitted() {
        let dir = temp_dir("newer");
        let old = write_at(&dir, "old.pdf", 5);
        write_at(&dir, "same.pdf", 5);
        write_at(&dir, "new.pdf", 6);

        let old_mtime = to_utc(std::fs::metadata(&old).unwrap().modified().unwrap());
        let (_, items) = run_pass(&watcher(&dir), Watermark::at(old_mtime)).await;

        assert_eq!(names(&items), vec!["new.pdf"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn subdirectories_are_ignored() {
        let dir = temp_dir("subdir");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        write_at(&dir, "doc.pdf", 1);

        let (_, items) = run_pass(&watcher(&dir), Watermark::default()).await;
        assert_eq!(names(&items), vec!["doc.pdf"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn unreadable_directory_is_fatal() {
        let dir = std::env::temp_dir().join(format!("ds-missing-{}", uuid::Uuid::now_v7()));
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = watcher(&dir)
            .run(Watermark::default(), tx, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DuplexScanError::SourceDir { .. }));
    }

    #[tokio::test]
    async fn waits_for_writes_to_settle() {
        let dir = temp_dir("settle");
        let path = write_at(&dir, "growing.pdf", 1);
        let w = StabilityWatcher::new(WatchConfig {
            scan_dir: dir.clone(),
            scan_interval: Duration::from_millis(20),
            stability_poll: Duration::from_millis(150),
        });

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            for offset in 2..5u64 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let time = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + offset);
                let file = std::fs::File::options().write(true).open(&writer_path).unwrap();
                file.set_modified(time).unwrap();
            }
        });

        let settled = w
            .wait_until_stable(&path, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        writer.await.unwrap();

        let final_mtime = to_utc(std::fs::metadata(&path).unwrap().modified().unwrap());
        assert_eq!(settled, final_mtime);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn cancellation_stops_run() {
        let dir = temp_dir("cancel");
        write_at(&dir, "a.pdf", 1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let w = watcher(&dir);
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move { w.run(Watermark::default(), tx, task_cancel).await });

        let first = rx.recv().await.expect("one item");
        assert_eq!(first.file_name, "a.pdf");
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("watcher halts")
            .unwrap();
        assert!(result.is_ok());
        // Sender dropped once the watcher halts
        assert!(rx.recv().await.is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
