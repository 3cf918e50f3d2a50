//! Medic Control - diagnose and fix a connected Android device
//!
//! Captures the device state over adb/fastboot, ranks what is wrong and
//! applies the remedy that has worked best so far.

use anyhow::Result;
use clap::Parser;
use medic_common::error::EXIT_SUCCESS;
use medicctl::cli::Cli;
use medicctl::{commands, shutdown};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    medic_common::logging::init(cli.verbose);

    let cancel = CancellationToken::new();
    let watcher = shutdown::cancel_on_signal(cancel.clone())?;

    let code = commands::run(&cli, cancel.clone()).await;
    cancel.cancel();
    watcher.await?;

    if code != EXIT_SUCCESS {
        std::process::exit(code);
    }
    Ok(())
}
