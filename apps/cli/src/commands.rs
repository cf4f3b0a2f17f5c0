//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use duplexscan_core::{Delivery, PipelineSummary, ProgressReporter, run_pipeline};
use duplexscan_merge::{MergeEngine, PopplerTool};
use duplexscan_shared::{
    AppConfig, PipelineConfig, ScanState, WatchConfig, Watermark, WatermarkStore, config_file_path,
    init_config_at, load_config, load_config_from, state_file_path, validate_config,
};
use duplexscan_upload::{DriveSink, sink_from_config};
use duplexscan_watcher::StabilityWatcher;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// duplexscan: duplex output from a single-sided scanner.
#[derive(Parser)]
#[command(
    name = "duplexscan",
    version,
    about = "Watch a scan directory, merge front/back duplex scans and upload the results.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.duplexscan/duplexscan.toml).
    #[arg(long, global = true, env = "DUPLEXSCAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Watch the scan directory and process new scans until Ctrl-C.
    Run {
        /// Directory the scanner writes to (overrides watch.scan_dir).
        #[arg(long)]
        scan_dir: Option<String>,

        /// File name prefix marking duplex scans; empty disables pairing.
        #[arg(long)]
        duplex_prefix: Option<String>,

        /// Seconds a front scan waits for its back scan.
        #[arg(long)]
        pairing_window_secs: Option<u64>,
    },

    /// Merge one front/back pair by hand.
    Merge {
        /// Front-side scan (pages in order).
        front: PathBuf,

        /// Back-side scan (pages in reverse order).
        back: PathBuf,

        /// Where to write the merged document.
        #[arg(short, long)]
        out: PathBuf,

        /// Scratch directory for page files (defaults to the system temp dir).
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },

    /// Show the watched directory, the watermark and pending scans.
    Status,

    /// List Google Drive folders, to pick drive.parent_folder_id.
    Folders,

    /// Inspect or reset the persisted watermark.
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Watermark state subcommands.
#[derive(Subcommand)]
pub(crate) enum StateAction {
    /// Print the persisted state.
    Show,
    /// Forget the watermark; every file in the scan directory becomes new.
    Reset,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
    /// Check that the configuration is complete enough to run.
    Validate,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "duplexscan=info",
        1 => "duplexscan=debug",
        _ => "duplexscan=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Run {
            scan_dir,
            duplex_prefix,
            pairing_window_secs,
        } => {
            let mut config = load(config_path)?;
            apply_overrides(&mut config, scan_dir, duplex_prefix, pairing_window_secs);
            cmd_run(config).await
        }
        Command::Merge {
            front,
            back,
            out,
            work_dir,
        } => cmd_merge(&load(config_path)?, &front, &back, &out, work_dir).await,
        Command::Status => cmd_status(&load(config_path)?).await,
        Command::Folders => cmd_folders(&load(config_path)?).await,
        Command::State { action } => {
            let config = load(config_path)?;
            match action {
                StateAction::Show => cmd_state_show(&config),
                StateAction::Reset => cmd_state_reset(&config),
            }
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(&load(config_path)?),
            ConfigAction::Validate => cmd_config_validate(&load(config_path)?),
        },
    }
}

/// Load config from `--config` if given, else the default location.
fn load(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

fn apply_overrides(
    config: &mut AppConfig,
    scan_dir: Option<String>,
    duplex_prefix: Option<String>,
    pairing_window_secs: Option<u64>,
) {
    if let Some(dir) = scan_dir {
        config.watch.scan_dir = dir;
    }
    if let Some(prefix) = duplex_prefix {
        config.duplex.prefix = prefix;
    }
    if let Some(secs) = pairing_window_secs {
        config.duplex.pairing_window_secs = secs;
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config: AppConfig) -> Result<()> {
    validate_config(&config)?;

    let pipeline = PipelineConfig::from(&config);
    let tool = Arc::new(PopplerTool::from(&config.tools));
    let sink = sink_from_config(&config)?;
    let store = WatermarkStore::new(state_file_path(&config)?);

    if !pipeline.watch.scan_dir.is_dir() {
        return Err(eyre!(
            "scan directory '{}' does not exist",
            pipeline.watch.scan_dir.display()
        ));
    }

    info!(
        dir = %pipeline.watch.scan_dir.display(),
        prefix = %pipeline.pairing.prefix,
        sink = sink.name(),
        "starting duplexscan"
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received, finishing in-flight scans");
                    cancel.cancel();
                }
                Err(e) => warn!(error = %e, "cannot listen for Ctrl-C"),
            }
        });
    }

    let reporter = CliProgress::new();
    let summary = run_pipeline(&pipeline, tool, sink, store, cancel, &reporter).await?;

    println!();
    println!("  Stopped.");
    println!("  Delivered:  {}", summary.delivered);
    println!("  Merged:     {}", summary.merged);
    println!("  Failed:     {}", summary.failed_uploads);
    println!("  Watermark:  {}", summary.watermark);
    println!("  Time:       {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_merge(
    config: &AppConfig,
    front: &Path,
    back: &Path,
    out: &Path,
    work_dir: Option<PathBuf>,
) -> Result<()> {
    for input in [front, back] {
        if !input.is_file() {
            return Err(eyre!("'{}' is not a file", input.display()));
        }
    }
    if out.exists() {
        return Err(eyre!("'{}' already exists, refusing to overwrite", out.display()));
    }

    let root = work_dir.unwrap_or_else(|| std::env::temp_dir().join("duplexscan"));
    let work = MergeEngine::create_work_dir(&root).await?;
    let engine = MergeEngine::new(Arc::new(PopplerTool::from(&config.tools)));

    let result = match engine.merge(front, back, &work).await {
        Ok(merged) => tokio::fs::copy(&merged, out)
            .await
            .map(|_| ())
            .map_err(|e| eyre!("cannot write '{}': {e}", out.display())),
        Err(e) => Err(e.into()),
    };

    if let Err(e) = tokio::fs::remove_dir_all(&work).await {
        warn!(dir = %work.display(), error = %e, "could not remove work directory");
    }
    result?;

    println!("Merged into {}", out.display());
    Ok(())
}

async fn cmd_status(config: &AppConfig) -> Result<()> {
    let watch = WatchConfig::from(config);
    if watch.scan_dir.as_os_str().is_empty() {
        return Err(eyre!("watch.scan_dir is not set. Run `duplexscan config init` and edit it"));
    }

    let store = WatermarkStore::new(state_file_path(config)?);
    let watermark = store.load()?;
    let pending = StabilityWatcher::new(watch.clone()).pending(watermark).await?;

    println!();
    println!("  Scan dir:   {}", watch.scan_dir.display());
    println!("  Prefix:     {}", display_or(&config.duplex.prefix, "(pairing disabled)"));
    println!("  State:      {}", store.path().display());
    println!("  Watermark:  {watermark}");
    println!("  Pending:    {}", pending.len());
    for (path, modified) in &pending {
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        println!("    {name}  ({})", modified.to_rfc3339());
    }
    println!();

    Ok(())
}

async fn cmd_folders(config: &AppConfig) -> Result<()> {
    let drive = DriveSink::from_config(config)?;
    let folders = drive.list_folders().await?;

    if folders.is_empty() {
        println!("No folders found. Use parent_folder_id = \"root\" to upload to My Drive.");
        return Ok(());
    }

    let width = folders.iter().map(|f| f.id.len()).max().unwrap_or(0);
    for folder in &folders {
        println!("{:<width$}  {}", folder.id, folder.name);
    }
    Ok(())
}

fn cmd_state_show(config: &AppConfig) -> Result<()> {
    let store = WatermarkStore::new(state_file_path(config)?);
    let state = ScanState {
        last_processed: store.load()?,
    };

    println!("// {}", store.path().display());
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

fn cmd_state_reset(config: &AppConfig) -> Result<()> {
    let store = WatermarkStore::new(state_file_path(config)?);
    let previous = store.load()?;
    store.save(Watermark::default())?;

    println!("Watermark reset (was {previous}).");
    Ok(())
}

fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };
    init_config_at(&path)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

fn cmd_config_validate(config: &AppConfig) -> Result<()> {
    validate_config(config)?;
    println!("Config OK.");
    Ok(())
}

fn display_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn delivered(&self, delivery: &Delivery) {
        self.spinner.println(format!(
            "  Uploaded {} as {} ({})",
            delivery.item.file_name,
            delivery.item.upload_title(),
            delivery.remote_id
        ));
    }

    fn done(&self, _summary: &PipelineSummary) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_override_config() {
        let cli = Cli::parse_from([
            "duplexscan",
            "run",
            "--scan-dir",
            "/srv/scans",
            "--duplex-prefix",
            "",
            "--pairing-window-secs",
            "60",
        ]);
        let Command::Run {
            scan_dir,
            duplex_prefix,
            pairing_window_secs,
        } = cli.command
        else {
            panic!("expected run");
        };

        let mut config = AppConfig::default();
        config.duplex.prefix = "duplex_".into();
        apply_overrides(&mut config, scan_dir, duplex_prefix, pairing_window_secs);

        assert_eq!(config.watch.scan_dir, "/srv/scans");
        assert_eq!(config.duplex.prefix, "");
        assert_eq!(config.duplex.pairing_window_secs, 60);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["duplexscan", "state", "show", "--config", "/tmp/d.toml", "-vv"]);
        assert_eq!(cli.config.as_deref(), Some(Path::new("/tmp/d.toml")));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Command::State {
                action: StateAction::Show
            }
        ));
    }
}
