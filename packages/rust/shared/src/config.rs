//! Application configuration for duplexscan.
//!
//! User config lives at `~/.duplexscan/duplexscan.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DuplexScanError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "duplexscan.toml";

/// Default persisted state file name.
const STATE_FILE_NAME: &str = "state.json";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".duplexscan";

// ---------------------------------------------------------------------------
// Config structs (matching duplexscan.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub watch: WatchSection,

    #[serde(default)]
    pub duplex: DuplexSection,

    #[serde(default)]
    pub tools: ToolsSection,

    #[serde(default)]
    pub sink: SinkSection,

    #[serde(default)]
    pub drive: DriveSection,

    #[serde(default)]
    pub state: StateSection,

    #[serde(default)]
    pub pipeline: PipelineSection,
}

/// `[watch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSection {
    /// Flat directory the scanner deposits documents into.
    #[serde(default)]
    pub scan_dir: String,

    /// Seconds between directory listings.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Seconds between modification-time checks while waiting for a write to settle.
    #[serde(default = "default_stability_poll")]
    pub stability_poll_secs: u64,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            scan_dir: String::new(),
            scan_interval_secs: default_scan_interval(),
            stability_poll_secs: default_stability_poll(),
        }
    }
}

fn default_scan_interval() -> u64 {
    5
}
fn default_stability_poll() -> u64 {
    10
}

/// `[duplex]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplexSection {
    /// File name prefix marking a scan as one side of a duplex pair.
    /// Empty disables pairing.
    #[serde(default)]
    pub prefix: String,

    /// Root under which per-merge working directories are created.
    #[serde(default)]
    pub work_dir: String,

    /// How long a front scan waits for its back side.
    #[serde(default = "default_pairing_window")]
    pub pairing_window_secs: u64,

    /// Prepended to the front file name to title a merged document.
    #[serde(default = "default_merged_title_prefix")]
    pub merged_title_prefix: String,
}

impl Default for DuplexSection {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            work_dir: String::new(),
            pairing_window_secs: default_pairing_window(),
            merged_title_prefix: default_merged_title_prefix(),
        }
    }
}

fn default_pairing_window() -> u64 {
    15 * 60
}
fn default_merged_title_prefix() -> String {
    "merged_".into()
}

/// `[tools]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsSection {
    /// Single-page splitter binary.
    #[serde(default = "default_splitter")]
    pub splitter: String,

    /// Multi-page joiner binary.
    #[serde(default = "default_joiner")]
    pub joiner: String,

    /// Non-zero splitter exit codes that still mean success.
    #[serde(default = "default_splitter_ok_codes")]
    pub splitter_ok_codes: Vec<i32>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            splitter: default_splitter(),
            joiner: default_joiner(),
            splitter_ok_codes: default_splitter_ok_codes(),
        }
    }
}

fn default_splitter() -> String {
    "pdfseparate".into()
}
fn default_joiner() -> String {
    "pdfunite".into()
}
fn default_splitter_ok_codes() -> Vec<i32> {
    vec![99]
}

/// Which upload sink finished documents go to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    #[default]
    Drive,
    Directory,
}

/// `[sink]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinkSection {
    #[serde(default)]
    pub kind: SinkKind,

    /// Destination for the directory sink.
    #[serde(default)]
    pub target_dir: String,
}

/// `[drive]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveSection {
    /// Name of the env var holding the OAuth access token (never store the token itself).
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    /// Folder id uploads are placed in. `root` means no folder.
    #[serde(default = "default_parent_folder")]
    pub parent_folder_id: String,

    /// API origin, overridable for testing.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Per-request timeout for uploads.
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,
}

impl Default for DriveSection {
    fn default() -> Self {
        Self {
            access_token_env: default_access_token_env(),
            parent_folder_id: default_parent_folder(),
            api_base: default_api_base(),
            timeout_secs: default_upload_timeout(),
        }
    }
}

fn default_access_token_env() -> String {
    "DUPLEXSCAN_DRIVE_TOKEN".into()
}
fn default_parent_folder() -> String {
    "root".into()
}
fn default_api_base() -> String {
    "https://www.googleapis.com".into()
}
fn default_upload_timeout() -> u64 {
    300
}

/// `[state]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSection {
    /// Where the watermark is persisted. Empty means `~/.duplexscan/state.json`.
    #[serde(default)]
    pub file: String,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Stop the whole pipeline on the first failed upload.
    #[serde(default)]
    pub halt_on_upload_error: bool,
}

// ---------------------------------------------------------------------------
// Runtime configs (derived from the file config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime settings for the stability watcher.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub scan_dir: PathBuf,
    pub scan_interval: Duration,
    pub stability_poll: Duration,
}

impl From<&AppConfig> for WatchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            scan_dir: expand_home(&config.watch.scan_dir),
            scan_interval: Duration::from_secs(config.watch.scan_interval_secs),
            stability_poll: Duration::from_secs(config.watch.stability_poll_secs),
        }
    }
}

/// Runtime settings for the pairing state machine.
#[derive(Debug, Clone)]
pub struct PairingConfig {
    /// Duplex prefix; empty disables pairing.
    pub prefix: String,
    pub work_root: PathBuf,
    pub window: Duration,
    pub merged_title_prefix: String,
}

impl PairingConfig {
    /// Whether a file name marks one side of a duplex scan.
    pub fn is_duplex(&self, file_name: &str) -> bool {
        !self.prefix.is_empty() && file_name.starts_with(&self.prefix)
    }
}

impl From<&AppConfig> for PairingConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            prefix: config.duplex.prefix.clone(),
            work_root: expand_home(&config.duplex.work_dir),
            window: Duration::from_secs(config.duplex.pairing_window_secs),
            merged_title_prefix: config.duplex.merged_title_prefix.clone(),
        }
    }
}

/// Runtime settings for the whole pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub watch: WatchConfig,
    pub pairing: PairingConfig,
    pub halt_on_upload_error: bool,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            watch: WatchConfig::from(config),
            pairing: PairingConfig::from(config),
            halt_on_upload_error: config.pipeline.halt_on_upload_error,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.duplexscan/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DuplexScanError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.duplexscan/duplexscan.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve where the watermark is persisted.
pub fn state_file_path(config: &AppConfig) -> Result<PathBuf> {
    if config.state.file.is_empty() {
        Ok(config_dir()?.join(STATE_FILE_NAME))
    } else {
        Ok(expand_home(&config.state.file))
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
///
/// An empty file is treated as a fresh default config.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DuplexScanError::io(path, e))?;

    if content.trim().is_empty() {
        return Ok(AppConfig::default());
    }

    toml::from_str(&content)
        .map_err(|e| DuplexScanError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Write a default config file at `path`, creating parent directories.
/// Refuses to overwrite an existing file.
pub fn init_config_at(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(DuplexScanError::config(format!(
            "{} already exists",
            path.display()
        )));
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| DuplexScanError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| DuplexScanError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| DuplexScanError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let path = config_file_path()?;
    init_config_at(&path)?;
    Ok(path)
}

/// Check that everything needed to run the pipeline is configured.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.watch.scan_dir.is_empty() {
        return Err(DuplexScanError::config(
            "watch.scan_dir must be set: the directory scanned for new documents",
        ));
    }

    if !config.duplex.prefix.is_empty() && config.duplex.work_dir.is_empty() {
        return Err(DuplexScanError::config(
            "duplex.work_dir must be set when duplex.prefix is set: merged documents are built there",
        ));
    }

    if config.watch.scan_interval_secs == 0 || config.watch.stability_poll_secs == 0 {
        return Err(DuplexScanError::config(
            "watch.scan_interval_secs and watch.stability_poll_secs must be positive",
        ));
    }

    match config.sink.kind {
        SinkKind::Directory => {
            if config.sink.target_dir.is_empty() {
                return Err(DuplexScanError::config(
                    "sink.target_dir must be set for the directory sink",
                ));
            }
        }
        SinkKind::Drive => {
            if config.drive.parent_folder_id.is_empty() {
                return Err(DuplexScanError::config(
                    "drive.parent_folder_id must be set. Use 'root' for no folder, \
                     or pick an id from `duplexscan folders`",
                ));
            }
            Url::parse(&config.drive.api_base).map_err(|e| {
                DuplexScanError::config(format!(
                    "drive.api_base '{}' is not a valid URL: {e}",
                    config.drive.api_base
                ))
            })?;
            drive_access_token(config)?;
        }
    }

    Ok(())
}

/// Read the Drive access token from the env var named in config.
pub fn drive_access_token(config: &AppConfig) -> Result<String> {
    let var_name = &config.drive.access_token_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(DuplexScanError::config(format!(
            "Drive access token not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runnable() -> AppConfig {
        let mut config = AppConfig::default();
        config.watch.scan_dir = "/srv/scans".into();
        config.sink.kind = SinkKind::Directory;
        config.sink.target_dir = "/srv/out".into();
        config
    }

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("scan_dir"));
        assert!(toml_str.contains("pdfseparate"));
        assert!(toml_str.contains("DUPLEXSCAN_DRIVE_TOKEN"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.watch.scan_interval_secs, 5);
        assert_eq!(parsed.watch.stability_poll_secs, 10);
        assert_eq!(parsed.duplex.pairing_window_secs, 900);
        assert_eq!(parsed.tools.splitter_ok_codes, vec![99]);
        assert_eq!(parsed.sink.kind, SinkKind::Drive);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[watch]
scan_dir = "/srv/scans"

[duplex]
prefix = "duplex_"
work_dir = "/tmp/duplexscan"

[sink]
kind = "directory"
target_dir = "/srv/out"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.duplex.prefix, "duplex_");
        assert_eq!(config.duplex.merged_title_prefix, "merged_");
        assert_eq!(config.tools.joiner, "pdfunite");
        assert_eq!(config.sink.kind, SinkKind::Directory);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_file_is_default_config() {
        let dir = std::env::temp_dir().join(format!("ds-config-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE_NAME);
        std::fs::write(&path, "").unwrap();

        let config = load_config_from(&path).unwrap();
        assert!(config.watch.scan_dir.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn init_config_refuses_to_overwrite() {
        let dir = std::env::temp_dir().join(format!("ds-init-{}", uuid::Uuid::now_v7()));
        let path = dir.join("nested").join(CONFIG_FILE_NAME);

        init_config_at(&path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.drive.parent_folder_id, "root");
        assert!(init_config_at(&path).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn runtime_configs_from_app_config() {
        let mut app = runnable();
        app.duplex.prefix = "duplex_".into();
        app.duplex.work_dir = "/tmp/ds".into();

        let pipeline = PipelineConfig::from(&app);
        assert_eq!(pipeline.watch.scan_dir, PathBuf::from("/srv/scans"));
        assert_eq!(pipeline.watch.scan_interval, Duration::from_secs(5));
        assert_eq!(pipeline.watch.stability_poll, Duration::from_secs(10));
        assert_eq!(pipeline.pairing.window, Duration::from_secs(900));
        assert_eq!(pipeline.pairing.work_root, PathBuf::from("/tmp/ds"));
        assert!(!pipeline.halt_on_upload_error);
    }

    #[test]
    fn duplex_eligibility_follows_prefix() {
        let mut app = runnable();
        let pairing = PairingConfig::from(&app);
        assert!(!pairing.is_duplex("duplex_front.pdf"));
        assert!(!pairing.is_duplex(""));

        app.duplex.prefix = "duplex_".into();
        let pairing = PairingConfig::from(&app);
        assert!(pairing.is_duplex("duplex_front.pdf"));
        assert!(!pairing.is_duplex("plain.pdf"));
        assert!(!pairing.is_duplex("my_duplex_front.pdf"));
    }

    #[test]
    fn validation_requires_scan_dir() {
        let mut config = runnable();
        config.watch.scan_dir.clear();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("scan_dir"));
    }

    #[test]
    fn validation_requires_work_dir_with_prefix() {
        let mut config = runnable();
        config.duplex.prefix = "duplex_".into();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("work_dir"));

        config.duplex.work_dir = "/tmp/ds".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn validation_requires_target_dir_for_directory_sink() {
        let mut config = runnable();
        config.sink.target_dir.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn drive_token_validation() {
        let mut config = runnable();
        config.sink.kind = SinkKind::Drive;
        // Use a unique env var name to avoid interfering with other tests
        config.drive.access_token_env = "DS_TEST_NONEXISTENT_TOKEN_12345".into();
        let result = validate_config(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("access token not found"));
    }

    #[test]
    fn state_file_defaults_under_config_dir() {
        let mut config = AppConfig::default();
        if let Ok(path) = state_file_path(&config) {
            assert!(path.ends_with(".duplexscan/state.json"));
        }
        config.state.file = "/var/lib/duplexscan/state.json".into();
        assert_eq!(
            state_file_path(&config).unwrap(),
            PathBuf::from("/var/lib/duplexscan/state.json")
        );
    }
}
