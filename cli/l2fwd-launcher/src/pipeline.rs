//! Prepare-then-launch orchestration.

use std::path::Path;

use tracing::info;

use crate::config::LauncherConfig;
use crate::devices::{self, PCI_DEVICES_DIR};
use crate::error::RunError;
use crate::host::HostOps;
use crate::launch::{self, ChildExit, LaunchSpec, ProcessRunner};
use crate::mount::{self, MountOutcome};

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub mount: MountOutcome,
    /// `None` on a dry run.
    pub child: Option<ChildExit>,
}

impl RunOutcome {
    /// Exit code for the launcher process.
    pub fn exit_code(&self, ignore_child_status: bool) -> i32 {
        match self.child {
            Some(child) if !ignore_child_status => child.exit_code(),
            _ => 0,
        }
    }
}

/// Prepare the hugepage mount, then run the forwarder.
///
/// The runner is never called when preparation fails.
pub async fn run(
    config: &LauncherConfig,
    host: &dyn HostOps,
    runner: &dyn ProcessRunner,
) -> Result<RunOutcome, RunError> {
    if config.check_devices {
        devices::check_devices(Path::new(PCI_DEVICES_DIR), &config.devices);
    }

    let spec = LaunchSpec::from_config(&config.forwarder);

    if config.dry_run {
        let mount = mount::plan_hugepage_mount(host, &config.mount).await?;
        info!(command = %spec.command_line(), "dry run: would launch forwarder");
        return Ok(RunOutcome { mount, child: None });
    }

    let mount = mount::ensure_hugepage_mount(host, &config.mount).await?;
    let child = launch::launch(runner, &spec).await?;

    Ok(RunOutcome {
        mount,
        child: Some(child),
    })
}
