//! Post-upload cleanup of merge work directories.

use std::path::Path;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, instrument, warn};

use crate::dispatch::Delivery;

/// Removes a merged item's work directory once its upload has completed,
/// then passes the delivery on to the completion stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupCoordinator;

impl CleanupCoordinator {
    #[instrument(skip_all)]
    pub async fn run(self, mut rx: UnboundedReceiver<Delivery>, tx: UnboundedSender<Delivery>) {
        while let Some(delivery) = rx.recv().await {
            if let Some(dir) = delivery.item.cleanup_path() {
                remove(dir).await;
            }
            if tx.send(delivery).is_err() {
                debug!("completion stream gone");
            }
        }
        debug!("cleanup stopped");
    }
}

async fn remove(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(dir = %dir.display(), "work directory removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "could not remove work directory"),
    }
}
