//! Core domain types for the scan intake pipeline.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ScanItem
// ---------------------------------------------------------------------------

/// Where a [`ScanItem`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOrigin {
    /// A file found in the watched directory.
    Discovered,
    /// A document produced by interleaving a front and a back scan.
    Merged {
        /// Working directory owned exclusively by this item.
        work_dir: PathBuf,
        /// File name of the front-side scan.
        front: String,
        /// File name of the back-side scan.
        back: String,
    },
}

/// One document travelling through the pipeline.
///
/// Owned by exactly one stage at a time; ownership moves at channel handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanItem {
    /// Absolute path to the document on disk.
    pub path: PathBuf,
    /// File name component of `path`.
    pub file_name: String,
    /// Display name to upload under instead of `file_name`.
    pub preferred_title: Option<String>,
    /// Raw discovery or synthetic merge result.
    pub origin: ItemOrigin,
    /// Effective modification time, used to advance the watermark.
    pub modified: DateTime<Utc>,
}

impl ScanItem {
    /// A raw file found by the watcher.
    pub fn discovered(path: impl Into<PathBuf>, modified: DateTime<Utc>) -> Self {
        let path = path.into();
        let file_name = file_name_of(&path);
        Self {
            path,
            file_name,
            preferred_title: None,
            origin: ItemOrigin::Discovered,
            modified,
        }
    }

    /// A merged document built from `front` and `back`, living in `work_dir`.
    ///
    /// The effective modification time is the later of the two sources, so a
    /// merge never advances the watermark past what was actually scanned.
    pub fn merged(
        path: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        front: &ScanItem,
        back: &ScanItem,
        title: String,
    ) -> Self {
        let path = path.into();
        let file_name = file_name_of(&path);
        Self {
            path,
            file_name,
            preferred_title: Some(title),
            origin: ItemOrigin::Merged {
                work_dir: work_dir.into(),
                front: front.file_name.clone(),
                back: back.file_name.clone(),
            },
            modified: front.modified.max(back.modified),
        }
    }

    /// Title used by the upload sink.
    pub fn upload_title(&self) -> &str {
        self.preferred_title.as_deref().unwrap_or(&self.file_name)
    }

    /// Directory to remove once this item has been uploaded, if any.
    pub fn cleanup_path(&self) -> Option<&Path> {
        match &self.origin {
            ItemOrigin::Discovered => None,
            ItemOrigin::Merged { work_dir, .. } => Some(work_dir),
        }
    }

    pub fn is_merged(&self) -> bool {
        matches!(self.origin, ItemOrigin::Merged { .. })
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Watermark
// ---------------------------------------------------------------------------

/// Latest modification time already handed to the pipeline.
///
/// Unset means nothing has been processed yet and every file is new.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark(pub Option<DateTime<Utc>>);

impl Watermark {
    pub fn at(time: DateTime<Utc>) -> Self {
        Self(Some(time))
    }

    /// Whether a file modified at `modified` is newer than the watermark.
    pub fn admits(&self, modified: DateTime<Utc>) -> bool {
        match self.0 {
            None => true,
            Some(mark) => modified > mark,
        }
    }

    /// Move forward to `modified` if it is later. Never moves backwards.
    /// Returns true when the watermark changed.
    pub fn advance(&mut self, modified: DateTime<Utc>) -> bool {
        if self.admits(modified) {
            self.0 = Some(modified);
            true
        } else {
            false
        }
    }

    pub fn get(&self) -> Option<DateTime<Utc>> {
        self.0
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(t) => write!(f, "{}", t.to_rfc3339()),
            None => write!(f, "unset"),
        }
    }
}

/// Convert a filesystem timestamp to UTC.
pub fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}
