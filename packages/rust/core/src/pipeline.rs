//! End-to-end intake pipeline: watcher → pairing → dispatcher → cleanup.
//!
//! Each stage runs on its own task; stages are connected by unbounded
//! channels and shut down in order as each input closes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use duplexscan_merge::{MergeEngine, PageTool};
use duplexscan_shared::{DuplexScanError, PipelineConfig, Result, Watermark, WatermarkStore};
use duplexscan_upload::UploadSink;
use duplexscan_watcher::StabilityWatcher;

use crate::cleanup::CleanupCoordinator;
use crate::dispatch::{Delivery, UploadDispatcher};
use crate::pairing::PairingMachine;

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Items uploaded and cleaned up.
    pub delivered: usize,
    /// How many of those were merged duplex documents.
    pub merged: usize,
    /// Items the sink rejected.
    pub failed_uploads: usize,
    /// Watermark at shutdown.
    pub watermark: Watermark,
    /// Total elapsed time.
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once per item, after upload and cleanup.
    fn delivered(&self, delivery: &Delivery);
    /// Called when the pipeline completes.
    fn done(&self, summary: &PipelineSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn delivered(&self, _delivery: &Delivery) {}
    fn done(&self, _summary: &PipelineSummary) {}
}

/// Run the pipeline until `cancel` fires or a fatal error occurs.
///
/// Cancelling stops the watcher at its next wait; everything already
/// discovered still goes through pairing, upload and cleanup before this
/// returns. A fatal watcher or (with `halt_on_upload_error`) dispatcher error
/// is returned after the remaining stages have drained.
#[instrument(skip_all, fields(dir = %config.watch.scan_dir.display()))]
pub async fn run_pipeline(
    config: &PipelineConfig,
    tool: Arc<dyn PageTool>,
    sink: Arc<dyn UploadSink>,
    store: WatermarkStore,
    cancel: CancellationToken,
    progress: &dyn ProgressReporter,
) -> Result<PipelineSummary> {
    let start = Instant::now();

    progress.phase("Loading state");
    let watermark = store.load()?;
    info!(%watermark, sink = sink.name(), "starting pipeline");

    // Stages stop through this token so a failing dispatcher can wind the
    // watcher down without cancelling the caller's token.
    let stop = cancel.child_token();

    let (scan_tx, scan_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = mpsc::unbounded_channel();
    let (uploaded_tx, uploaded_rx) = mpsc::unbounded_channel();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    let watcher = StabilityWatcher::new(config.watch.clone());
    let watcher_stop = stop.clone();
    let watcher_task =
        tokio::spawn(async move { watcher.run(watermark, scan_tx, watcher_stop).await });

    let pairing = PairingMachine::new(config.pairing.clone(), MergeEngine::new(tool));
    let pairing_task = tokio::spawn(pairing.run(scan_rx, ready_tx));

    let dispatcher = UploadDispatcher::new(sink, store, watermark)
        .halt_on_error(config.halt_on_upload_error);
    let dispatch_task = tokio::spawn(dispatcher.run(ready_rx, uploaded_tx));

    let cleanup_task = tokio::spawn(CleanupCoordinator.run(uploaded_rx, done_tx));

    progress.phase(&format!("Watching {}", config.watch.scan_dir.display()));

    let mut summary = PipelineSummary {
        watermark,
        ..Default::default()
    };
    while let Some(delivery) = done_rx.recv().await {
        summary.delivered += 1;
        if delivery.item.is_merged() {
            summary.merged += 1;
        }
        info!(
            file = %delivery.item.file_name,
            title = %delivery.item.upload_title(),
            remote_id = %delivery.remote_id,
            "delivered"
        );
        progress.delivered(&delivery);
    }

    // Downstream is finished; make sure the upstream stages are too.
    stop.cancel();

    let dispatched = join("dispatcher", dispatch_task).await?;
    join("cleanup", cleanup_task).await?;
    join("pairing", pairing_task).await?;
    let watched = join("watcher", watcher_task).await?;

    watched?;
    let stats = dispatched?;

    summary.failed_uploads = stats.failed;
    summary.watermark = stats.watermark;
    summary.elapsed = start.elapsed();

    info!(
        delivered = summary.delivered,
        merged = summary.merged,
        failed = summary.failed_uploads,
        watermark = %summary.watermark,
        "pipeline stopped"
    );
    progress.done(&summary);

    Ok(summary)
}

async fn join<T>(stage: &str, handle: JoinHandle<T>) -> Result<T> {
    handle
        .await
        .map_err(|e| DuplexScanError::Pipeline(format!("{stage} task failed: {e}")))
}
