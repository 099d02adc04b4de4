//! l2fwd-launcher - mount hugetlbfs and run the DPDK L2 forwarder.
//!
//! Runs two steps in order and stops at the first failure:
//! - Hugepage mount preparation
//! - Forwarder launch and supervision
//!
//! The forwarder's exit code becomes the launcher's exit code unless
//! `--ignore-child-status` is given. Launcher failures exit with 1.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info};

use l2fwd_launcher::cli::Cli;
use l2fwd_launcher::config::LauncherConfig;
use l2fwd_launcher::error::print_error;
use l2fwd_launcher::privilege::Elevation;
use l2fwd_launcher::{logging, pipeline, SystemHost, SystemRunner, VERSION};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::from(1);
    }

    info!(version = VERSION, "l2fwd-launcher starting");

    match run(cli).await {
        Ok(exit_code) => ExitCode::from(exit_code as u8),
        Err(e) => {
            error!(error = %e, "l2fwd-launcher failed");
            let mut source = e.source();
            while let Some(cause) = source {
                error!(cause = %cause, "caused by");
                source = cause.source();
            }
            print_error(&e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = LauncherConfig::load(cli.config.as_deref())?.apply(cli.overrides());
    config.validate().context("invalid configuration")?;
    debug!(config = ?config, "configuration loaded");

    let elevation = Elevation::resolve(config.elevate, config.non_interactive);
    info!(elevation = ?elevation, "privilege elevation resolved");

    let host = SystemHost::new(elevation.clone());
    let runner = SystemRunner::new(elevation);

    let outcome = pipeline::run(&config, &host, &runner).await?;
    let exit_code = outcome.exit_code(config.ignore_child_status);

    info!(
        mount = ?outcome.mount,
        exit_code,
        "l2fwd-launcher exiting"
    );
    Ok(exit_code)
}
