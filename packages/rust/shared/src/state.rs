//! Persisted pipeline state: the "last processed" watermark.
//!
//! Kept in its own JSON file, apart from the hand-edited TOML config.
//! Only the upload dispatcher writes it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DuplexScanError, Result};
use crate::types::Watermark;

/// On-disk layout of the state file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanState {
    /// Latest modification time of any uploaded document.
    #[serde(default)]
    pub last_processed: Watermark,
}

/// Reads and writes [`ScanState`] at a fixed path.
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted watermark. A missing or empty file means unset.
    pub fn load(&self) -> Result<Watermark> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = ?self.path, "state file not found, watermark unset");
                return Ok(Watermark::default());
            }
            Err(e) => return Err(DuplexScanError::io(&self.path, e)),
        };

        if content.trim().is_empty() {
            return Ok(Watermark::default());
        }

        let state: ScanState = serde_json::from_str(&content).map_err(|e| {
            DuplexScanError::State(format!("failed to parse {}: {e}", self.path.display()))
        })?;
        Ok(state.last_processed)
    }

    /// Persist `watermark`, replacing the file via rename so readers never see a partial write.
    pub fn save(&self, watermark: Watermark) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| DuplexScanError::io(dir, e))?;
        }

        let state = ScanState {
            last_processed: watermark,
        };
        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| DuplexScanError::State(e.to_string()))?;

        let tmp = self.path.with_extension(format!("tmp-{}", Uuid::now_v7()));
        std::fs::write(&tmp, json).map_err(|e| DuplexScanError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            DuplexScanError::io(&self.path, e)
        })?;

        tracing::debug!(path = ?self.path, %watermark, "watermark persisted");
        Ok(())
    }
}
