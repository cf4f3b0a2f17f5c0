//! Core intake pipeline for duplexscan.
//!
//! Wires the stages together: [`StabilityWatcher`](duplexscan_watcher::StabilityWatcher)
//! discovers scans, [`PairingMachine`] merges duplex pairs, [`UploadDispatcher`]
//! delivers finished documents and [`CleanupCoordinator`] removes work
//! directories afterwards.

pub mod cleanup;
pub mod dispatch;
pub mod pairing;
pub mod pipeline;

pub use cleanup::CleanupCoordinator;
pub use dispatch::{Delivery, DispatchStats, UploadDispatcher};
pub use pairing::{PairingEvent, PairingMachine, PairingState};
pub use pipeline::{PipelineSummary, ProgressReporter, SilentProgress, run_pipeline};
