//! Upload dispatch: hands each finished document to the sink, one at a time,
//! and owns the persisted watermark.

use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, instrument, warn};

use duplexscan_shared::{Result, ScanItem, Watermark, WatermarkStore};
use duplexscan_upload::UploadSink;

/// An item the sink accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub item: ScanItem,
    /// Identifier the sink assigned (Drive file id, destination path, ...).
    pub remote_id: String,
}

/// Counters from one dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub uploaded: usize,
    pub failed: usize,
    /// Watermark after the last successful upload.
    pub watermark: Watermark,
}

/// The upload stage. Sole writer of the watermark.
pub struct UploadDispatcher {
    sink: Arc<dyn UploadSink>,
    store: WatermarkStore,
    watermark: Watermark,
    halt_on_error: bool,
}

impl std::fmt::Debug for UploadDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadDispatcher")
            .field("sink", &self.sink.name())
            .field("store", &self.store)
            .field("watermark", &self.watermark)
            .field("halt_on_error", &self.halt_on_error)
            .finish()
    }
}

impl UploadDispatcher {
    pub fn new(sink: Arc<dyn UploadSink>, store: WatermarkStore, watermark: Watermark) -> Self {
        Self {
            sink,
            store,
            watermark,
            halt_on_error: false,
        }
    }

    /// Stop on the first failed upload instead of skipping the item.
    pub fn halt_on_error(mut self, halt: bool) -> Self {
        self.halt_on_error = halt;
        self
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// Upload every item from `rx` in arrival order, forwarding accepted
    /// items to `tx`.
    ///
    /// A failed item is logged and not forwarded, so its work directory is
    /// left in place. With `halt_on_error` the first failure is returned
    /// instead.
    #[instrument(skip_all, fields(sink = self.sink.name()))]
    pub async fn run(
        mut self,
        mut rx: UnboundedReceiver<ScanItem>,
        tx: UnboundedSender<Delivery>,
    ) -> Result<DispatchStats> {
        let mut stats = DispatchStats {
            watermark: self.watermark,
            ..Default::default()
        };

        while let Some(item) = rx.recv().await {
            match self.dispatch(item).await {
                Ok(delivery) => {
                    stats.uploaded += 1;
                    stats.watermark = self.watermark;
                    if tx.send(delivery).is_err() {
                        debug!("cleanup stage gone");
                    }
                }
                Err(e) if self.halt_on_error => return Err(e),
                Err(_) => stats.failed += 1,
            }
        }

        debug!(uploaded = stats.uploaded, failed = stats.failed, "dispatcher stopped");
        Ok(stats)
    }

    /// Upload one item and, on success, advance and persist the watermark.
    pub async fn dispatch(&mut self, item: ScanItem) -> Result<Delivery> {
        let title = item.upload_title().to_string();

        let remote_id = match self.sink.upload(&item.path, &title).await {
            Ok(id) => id,
            Err(e) => {
                error!(
                    path = %item.path.display(),
                    title = %title,
                    error = %e,
                    "upload failed"
                );
                return Err(e);
            }
        };

        info!(file = %item.file_name, title = %title, remote_id = %remote_id, "uploaded");

        if self.watermark.advance(item.modified) {
            // Losing this write only means a re-upload after restart.
            if let Err(e) = self.store.save(self.watermark) {
                warn!(error = %e, watermark = %self.watermark, "could not persist watermark");
            }
        }

        Ok(Delivery { item, remote_id })
    }
}
