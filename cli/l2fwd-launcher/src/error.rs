//! Error types for the launcher.

use std::io;
use std::path::PathBuf;

use colored::Colorize;
use thiserror::Error;

/// Host preparation errors.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Elevation was refused or is unavailable.
    #[error("privilege_denied: {operation}: {detail}")]
    PrivilegeDenied { operation: String, detail: String },

    /// Directory creation or the mount itself failed.
    #[error("mount_failed: {}: {detail}", path.display())]
    MountFailed { path: PathBuf, detail: String },

    /// Mount target is missing a path or filesystem type.
    #[error("invalid_target: {0}")]
    InvalidTarget(String),
}

impl EnvError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            EnvError::PrivilegeDenied { .. } => "privilege_denied",
            EnvError::MountFailed { .. } => "mount_failed",
            EnvError::InvalidTarget(_) => "invalid_target",
        }
    }

    pub(crate) fn denied(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::PrivilegeDenied {
            operation: operation.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn mount_failed(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::MountFailed {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

/// Forwarder launch errors.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The executable is not on PATH (or the given path does not exist).
    #[error("executable_not_found: {name}")]
    ExecutableNotFound { name: String },

    /// The OS refused to start the process.
    #[error("spawn_failed: {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Waiting on the child failed.
    #[error("wait_failed: {0}")]
    Wait(#[source] io::Error),
}

impl LaunchError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            LaunchError::ExecutableNotFound { .. } => "executable_not_found",
            LaunchError::SpawnFailed { .. } => "spawn_failed",
            LaunchError::Wait(_) => "wait_failed",
        }
    }
}

/// Failure of a prepare-then-launch run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

impl RunError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            RunError::Env(e) => e.reason_code(),
            RunError::Launch(e) => e.reason_code(),
        }
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(hint) = hint_for(err) {
        eprintln!("\n{}", format!("Hint: {hint}").yellow());
    }
}

fn hint_for(err: &anyhow::Error) -> Option<&'static str> {
    let run_err = err.downcast_ref::<RunError>()?;
    match run_err {
        RunError::Env(EnvError::PrivilegeDenied { .. }) => Some(
            "Run as root, or allow sudo for mkdir/mount. Use --elevate never only when already privileged.",
        ),
        RunError::Env(EnvError::MountFailed { .. }) => {
            Some("Check that the kernel supports hugetlbfs and that hugepages are reserved.")
        }
        RunError::Launch(LaunchError::ExecutableNotFound { .. }) => {
            Some("Install DPDK examples or point --executable at the forwarder binary.")
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        let err = EnvError::denied("mount", "sudo: a password is required");
        assert_eq!(err.reason_code(), "privilege_denied");

        let err = EnvError::mount_failed("/mnt/huge", "EBUSY");
        assert_eq!(err.reason_code(), "mount_failed");
        assert!(err.to_string().contains("/mnt/huge"));

        let err: RunError = LaunchError::ExecutableNotFound {
            name: "dpdk-l2fwd".to_string(),
        }
        .into();
        assert_eq!(err.reason_code(), "executable_not_found");
        assert!(err.to_string().contains("dpdk-l2fwd"));
    }

    #[test]
    fn test_hint_lookup() {
        let err = anyhow::Error::new(RunError::from(EnvError::denied("mkdir", "refused")));
        assert!(hint_for(&err).is_some());

        let err = anyhow::anyhow!("config file missing");
        assert!(hint_for(&err).is_none());
    }
}
