//! Duplex pairing: turns a stream of discovered scans into a stream of
//! finished documents.
//!
//! A duplex-eligible item (file name starts with the configured prefix) is
//! held as a pending front until the next item arrives or the pairing window
//! runs out. Two consecutive duplex items are merged into one document; any
//! other sequence degrades to standalone delivery.

use std::path::Path;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, instrument, warn};

use duplexscan_merge::MergeEngine;
use duplexscan_shared::{DuplexScanError, PairingConfig, ScanItem};

/// Where the machine is between items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingState {
    /// No pending front.
    Idle,
    /// Holding a front scan until its back arrives or `deadline` passes.
    AwaitingBack { front: ScanItem, deadline: Instant },
}

/// Input to [`PairingMachine::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    Arrived(ScanItem),
    WindowElapsed,
    InputClosed,
}

/// The pairing stage.
#[derive(Debug)]
pub struct PairingMachine {
    config: PairingConfig,
    engine: MergeEngine,
    state: PairingState,
}

impl PairingMachine {
    pub fn new(config: PairingConfig, engine: MergeEngine) -> Self {
        Self {
            config,
            engine,
            state: PairingState::Idle,
        }
    }

    pub fn state(&self) -> &PairingState {
        &self.state
    }

    /// Consume `rx` until it closes, forwarding finished items to `tx`.
    ///
    /// A front still pending when the input closes is released standalone
    /// before `tx` is dropped.
    #[instrument(skip_all, fields(prefix = %self.config.prefix))]
    pub async fn run(mut self, mut rx: UnboundedReceiver<ScanItem>, tx: UnboundedSender<ScanItem>) {
        if self.config.prefix.is_empty() {
            info!("no duplex prefix configured, every scan is delivered standalone");
        }

        loop {
            let event = match &self.state {
                PairingState::Idle => match rx.recv().await {
                    Some(item) => PairingEvent::Arrived(item),
                    None => PairingEvent::InputClosed,
                },
                PairingState::AwaitingBack { deadline, .. } => {
                    let deadline = *deadline;
                    tokio::select! {
                        biased;
                        item = rx.recv() => match item {
                            Some(item) => PairingEvent::Arrived(item),
                            None => PairingEvent::InputClosed,
                        },
                        _ = sleep_until(deadline) => PairingEvent::WindowElapsed,
                    }
                }
            };

            let closing = event == PairingEvent::InputClosed;
            for item in self.step(event).await {
                if tx.send(item).is_err() {
                    debug!("dispatcher gone, stopping pairing");
                    self.discard_pending();
                    return;
                }
            }
            if closing {
                break;
            }
        }

        debug!("pairing stopped");
    }

    /// Apply one event and return the items to emit, in order.
    pub async fn step(&mut self, event: PairingEvent) -> Vec<ScanItem> {
        let state = std::mem::replace(&mut self.state, PairingState::Idle);

        match (state, event) {
            (PairingState::Idle, PairingEvent::Arrived(item)) => {
                if self.config.is_duplex(&item.file_name) {
                    info!(file = %item.file_name, "holding front side, waiting for back side");
                    self.hold(item);
                    Vec::new()
                } else {
                    vec![item]
                }
            }

            (PairingState::AwaitingBack { front, .. }, PairingEvent::Arrived(item)) => {
                if self.config.is_duplex(&item.file_name) {
                    self.pair(front, item).await
                } else {
                    warn!(
                        front = %front.file_name,
                        next = %item.file_name,
                        "expected a back side but got a regular scan, delivering both as is"
                    );
                    vec![front, item]
                }
            }

            (PairingState::AwaitingBack { front, .. }, PairingEvent::WindowElapsed) => {
                warn!(
                    front = %front.file_name,
                    window_secs = self.config.window.as_secs(),
                    "no back side within the pairing window, delivering front alone"
                );
                vec![front]
            }

            (PairingState::AwaitingBack { front, .. }, PairingEvent::InputClosed) => {
                info!(front = %front.file_name, "input closed, releasing pending front");
                vec![front]
            }

            (PairingState::Idle, PairingEvent::WindowElapsed | PairingEvent::InputClosed) => {
                Vec::new()
            }
        }
    }

    fn hold(&mut self, front: ScanItem) {
        self.state = PairingState::AwaitingBack {
            front,
            deadline: Instant::now() + self.config.window,
        };
    }

    async fn pair(&mut self, front: ScanItem, back: ScanItem) -> Vec<ScanItem> {
        let work_dir = match MergeEngine::create_work_dir(&self.config.work_root).await {
            Ok(dir) => dir,
            Err(e) => {
                error!(
                    front = %front.path.display(),
                    back = %back.path.display(),
                    error = %e,
                    "cannot create merge work directory, delivering both unmerged"
                );
                return vec![front, back];
            }
        };

        match self.engine.merge(&front.path, &back.path, &work_dir).await {
            Ok(output) => {
                let title = format!("{}{}", self.config.merged_title_prefix, front.file_name);
                info!(
                    front = %front.file_name,
                    back = %back.file_name,
                    title = %title,
                    "duplex pair merged"
                );
                vec![ScanItem::merged(output, work_dir, &front, &back, title)]
            }
            Err(e @ DuplexScanError::PageCountMismatch { .. }) => {
                warn!(
                    error = %e,
                    "not a duplex pair, delivering front alone and holding the newer scan"
                );
                remove_work_dir(&work_dir).await;
                self.hold(back);
                vec![front]
            }
            Err(e) => {
                error!(
                    front = %front.path.display(),
                    back = %back.path.display(),
                    error = %e,
                    "merge failed, delivering both unmerged"
                );
                remove_work_dir(&work_dir).await;
                vec![front, back]
            }
        }
    }

    fn discard_pending(&mut self) {
        if let PairingState::AwaitingBack { front, .. } =
            std::mem::replace(&mut self.state, PairingState::Idle)
        {
            warn!(front = %front.file_name, "dropping pending front, nobody left to deliver it");
        }
    }
}

async fn remove_work_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        warn!(dir = %dir.display(), error = %e, "could not remove merge work directory");
    }
}
