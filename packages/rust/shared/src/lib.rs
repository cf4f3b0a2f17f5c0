//! Shared types, error model, and configuration for duplexscan.
//!
//! This crate is the foundation depended on by all other duplexscan crates.
//! It provides:
//! - [`DuplexScanError`], the unified error type
//! - Domain types ([`ScanItem`], [`Watermark`])
//! - Configuration ([`AppConfig`], runtime configs, config loading)
//! - Watermark persistence ([`WatermarkStore`])

pub mod config;
pub mod error;
pub mod state;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DriveSection, DuplexSection, PairingConfig, PipelineConfig, PipelineSection,
    SinkKind, SinkSection, StateSection, ToolsSection, WatchConfig, WatchSection,
    config_dir, config_file_path, drive_access_token, expand_home, init_config, init_config_at,
    load_config, load_config_from, state_file_path, validate_config,
};
pub use error::{DuplexScanError, Result};
pub use state::{ScanState, WatermarkStore};
pub use types::{ItemOrigin, ScanItem, Watermark, to_utc};
