//! Host operations interface and mock implementation.
//!
//! The preparer only talks to the host through [`HostOps`]:
//! - Mount table lookups
//! - Mountpoint directory creation
//! - The hugetlbfs mount itself
//!
//! [`SystemHost`] performs them for real (directly as root, or via sudo).
//! [`MockHost`] records calls for tests and needs no privileges.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use nix::mount::{mount, MsFlags};
use tracing::debug;

use crate::config::MountTarget;
use crate::error::EnvError;
use crate::mountinfo;
use crate::privilege::{is_sudo_denial, Elevation};

/// Whether something is mounted at a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountState {
    NotMounted,
    Mounted { fstype: String },
}

/// Host operations needed to prepare the hugepage mount.
#[async_trait]
pub trait HostOps: Send + Sync {
    /// Check whether `path` is currently a mount point.
    async fn mount_state(&self, path: &Path) -> MountState;

    /// Create `path` and its parents. An existing directory is not an error.
    async fn create_dir_all(&self, path: &Path) -> Result<(), EnvError>;

    /// Mount `target.fstype` at `target.path`.
    async fn mount(&self, target: &MountTarget) -> Result<(), EnvError>;
}

/// Real host backed by `/proc/self/mounts`, mkdir and mount.
#[derive(Debug, Clone)]
pub struct SystemHost {
    elevation: Elevation,
}

impl SystemHost {
    pub fn new(elevation: Elevation) -> Self {
        Self { elevation }
    }

    /// Run an external command under sudo, mapping failures to [`EnvError`].
    async fn run_elevated(
        &self,
        operation: &str,
        path: &Path,
        program: &str,
        args: &[String],
    ) -> Result<(), EnvError> {
        let argv = self.elevation.argv(program, args);
        debug!(argv = ?argv, "running privileged command");

        let output = self
            .elevation
            .command(program, args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match (e.kind(), &self.elevation) {
                (io::ErrorKind::NotFound, Elevation::Sudo { program: sudo, .. }) => {
                    EnvError::denied(operation, format!("{sudo} not found"))
                }
                (io::ErrorKind::PermissionDenied, _) => {
                    EnvError::denied(operation, format!("cannot execute {}: {e}", argv[0]))
                }
                _ => EnvError::mount_failed(path, format!("failed to run {}: {e}", argv[0])),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if !self.elevation.is_direct() && is_sudo_denial(stderr) {
            return Err(EnvError::denied(operation, stderr));
        }

        Err(EnvError::mount_failed(
            path,
            format!("{program} exited with {}: {stderr}", output.status),
        ))
    }
}

#[async_trait]
impl HostOps for SystemHost {
    async fn mount_state(&self, path: &Path) -> MountState {
        match mountinfo::lookup(path) {
            Some(entry) => MountState::Mounted {
                fstype: entry.fstype,
            },
            None => MountState::NotMounted,
        }
    }

    async fn create_dir_all(&self, path: &Path) -> Result<(), EnvError> {
        if self.elevation.is_direct() {
            // Without elevation every failure, EPERM included, is MountFailed.
            return std::fs::create_dir_all(path).map_err(|e| {
                EnvError::mount_failed(path, format!("failed to create mountpoint: {e}"))
            });
        }

        let args = vec!["-p".to_string(), path.to_string_lossy().into_owned()];
        self.run_elevated("mkdir", path, "mkdir", &args).await
    }

    async fn mount(&self, target: &MountTarget) -> Result<(), EnvError> {
        if self.elevation.is_direct() {
            return mount(
                Some(target.source.as_str()),
                target.path.as_path(),
                Some(target.fstype.as_str()),
                MsFlags::empty(),
                None::<&str>,
            )
            .map_err(|errno| {
                EnvError::mount_failed(
                    &target.path,
                    format!("{} mount failed: {errno}", target.fstype),
                )
            });
        }

        let args = vec![
            "-t".to_string(),
            target.fstype.clone(),
            target.source.clone(),
            target.path.to_string_lossy().into_owned(),
        ];
        self.run_elevated("mount", &target.path, "mount", &args).await
    }
}

/// How [`MockHost`] fails its mount calls.
#[derive(Debug, Clone)]
enum MockFailure {
    Mount(String),
    Privilege(String),
}

#[derive(Debug, Default)]
struct MockHostState {
    mounted: HashMap<PathBuf, String>,
    created_dirs: Vec<PathBuf>,
    mount_calls: Vec<MountTarget>,
}

/// Mock host for testing.
#[derive(Debug, Default)]
pub struct MockHost {
    state: Mutex<MockHostState>,
    failure: Option<MockFailure>,
}

impl MockHost {
    /// Create a mock host with an empty mount table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock host where `path` is already mounted.
    pub fn with_mounted(path: impl Into<PathBuf>, fstype: &str) -> Self {
        let host = Self::new();
        host.state
            .lock()
            .unwrap()
            .mounted
            .insert(path.into(), fstype.to_string());
        host
    }

    /// Create a mock host whose mount calls fail.
    pub fn failing_mount(detail: &str) -> Self {
        Self {
            failure: Some(MockFailure::Mount(detail.to_string())),
            ..Self::default()
        }
    }

    /// Create a mock host that refuses elevation.
    pub fn denying_privilege(detail: &str) -> Self {
        Self {
            failure: Some(MockFailure::Privilege(detail.to_string())),
            ..Self::default()
        }
    }

    /// Mount calls received so far.
    pub fn mount_calls(&self) -> Vec<MountTarget> {
        self.state.lock().unwrap().mount_calls.clone()
    }

    /// Directories created so far.
    pub fn created_dirs(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().created_dirs.clone()
    }
}

#[async_trait]
impl HostOps for MockHost {
    async fn mount_state(&self, path: &Path) -> MountState {
        match self.state.lock().unwrap().mounted.get(path) {
            Some(fstype) => MountState::Mounted {
                fstype: fstype.clone(),
            },
            None => MountState::NotMounted,
        }
    }

    async fn create_dir_all(&self, path: &Path) -> Result<(), EnvError> {
        if let Some(MockFailure::Privilege(detail)) = &self.failure {
            return Err(EnvError::denied("mkdir", detail.clone()));
        }

        debug!(path = %path.display(), "[MOCK] creating directory");
        let mut state = self.state.lock().unwrap();
        if !state.created_dirs.iter().any(|dir| dir == path) {
            state.created_dirs.push(path.to_path_buf());
        }
        Ok(())
    }

    async fn mount(&self, target: &MountTarget) -> Result<(), EnvError> {
        let mut state = self.state.lock().unwrap();
        state.mount_calls.push(target.clone());

        match &self.failure {
            Some(MockFailure::Mount(detail)) => {
                Err(EnvError::mount_failed(&target.path, detail.clone()))
            }
            Some(MockFailure::Privilege(detail)) => Err(EnvError::denied("mount", detail.clone())),
            None => {
                debug!(path = %target.path.display(), "[MOCK] mounted");
                state
                    .mounted
                    .insert(target.path.clone(), target.fstype.clone());
                Ok(())
            }
        }
    }
}
