//! duplexscan CLI: duplex scanning for single-sided scanners.
//!
//! Watches the scanner's output directory, merges front/back scan pairs
//! into one correctly ordered document and uploads the results.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
