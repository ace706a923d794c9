//! pyqt-tools - Qt Designer bundle with PyQt5 plugins
//!
//! Main entry point for the command line.
//!
//! # Execution Flow
//!
//! 1. Parse arguments
//! 2. Initialize logging (`build` also writes logs/pyqt-tools.<date>)
//! 3. Run the command on a current-thread tokio runtime
//! 4. Exit with the command's exit code; launchers pass through the child's code

use anyhow::{Context, Result};
use clap::Parser;
use pyqt_tools::cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let guard = cli.init_logging()?;

    // Child processes are awaited one at a time, so one thread is enough
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let code = runtime.block_on(cli.run())?;
    drop(runtime);
    drop(guard);

    std::process::exit(code)
}
