//! Hugepage mount preparation.
//!
//! Makes sure the hugetlbfs mount the forwarder allocates from exists before
//! it starts. Already-mounted targets are left alone, so repeated runs never
//! stack mounts.

use tracing::{info, warn};

use crate::config::MountTarget;
use crate::error::EnvError;
use crate::host::{HostOps, MountState};

/// What the preparer found or did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOutcome {
    /// Something was already mounted at the target path.
    AlreadyMounted { fstype: String },
    /// The directory was created (if needed) and the mount performed.
    Mounted,
    /// Not mounted; dry run left it that way.
    WouldMount,
}

/// Ensure `target.path` is a mount point, mounting `target.fstype` there if not.
pub async fn ensure_hugepage_mount(
    host: &dyn HostOps,
    target: &MountTarget,
) -> Result<MountOutcome, EnvError> {
    validate_target(target)?;

    if let Some(outcome) = check_existing(host, target).await {
        return Ok(outcome);
    }

    host.create_dir_all(&target.path).await?;
    host.mount(target).await?;

    info!(
        path = %target.path.display(),
        fstype = %target.fstype,
        "hugepage filesystem mounted"
    );

    Ok(MountOutcome::Mounted)
}

/// Report what [`ensure_hugepage_mount`] would do without touching the host.
pub async fn plan_hugepage_mount(
    host: &dyn HostOps,
    target: &MountTarget,
) -> Result<MountOutcome, EnvError> {
    validate_target(target)?;

    if let Some(outcome) = check_existing(host, target).await {
        return Ok(outcome);
    }

    info!(
        path = %target.path.display(),
        fstype = %target.fstype,
        "dry run: would create directory and mount"
    );
    Ok(MountOutcome::WouldMount)
}

fn validate_target(target: &MountTarget) -> Result<(), EnvError> {
    if target.path.as_os_str().is_empty() {
        return Err(EnvError::InvalidTarget("mount path is empty".to_string()));
    }
    if target.fstype.is_empty() {
        return Err(EnvError::InvalidTarget(
            "filesystem type is empty".to_string(),
        ));
    }
    Ok(())
}

async fn check_existing(host: &dyn HostOps, target: &MountTarget) -> Option<MountOutcome> {
    match host.mount_state(&target.path).await {
        MountState::Mounted { fstype } => {
            if fstype != target.fstype {
                warn!(
                    path = %target.path.display(),
                    found = %fstype,
                    expected = %target.fstype,
                    "mount point has unexpected filesystem type"
                );
            } else {
                info!(path = %target.path.display(), "hugepage mount already present");
            }
            Some(MountOutcome::AlreadyMounted { fstype })
        }
        MountState::NotMounted => None,
    }
}
