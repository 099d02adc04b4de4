//! l2fwd launcher library
//!
//! Prepares a host for the DPDK L2 forwarder and starts it:
//!
//! 1. **Environment preparation** ([`mount`]): make sure `/mnt/huge` is a
//!    hugetlbfs mount, creating and mounting it if needed.
//! 2. **Launch** ([`launch`]): run `dpdk-l2fwd` with a fixed EAL/application
//!    argument vector and wait for it, forwarding termination signals.
//!
//! Host access goes through [`host::HostOps`] and process execution through
//! [`launch::ProcessRunner`]; both ship a mock so the whole pipeline runs in
//! tests without root.

pub mod cli;
pub mod config;
pub mod devices;
pub mod error;
pub mod host;
pub mod launch;
pub mod logging;
pub mod mount;
pub mod mountinfo;
pub mod pipeline;
pub mod privilege;

// Re-export commonly used types
pub use config::{ForwarderConfig, LauncherConfig, MountTarget};
pub use error::{EnvError, LaunchError, RunError};
pub use host::{HostOps, MockHost, SystemHost};
pub use launch::{ChildExit, LaunchSpec, MockRunner, ProcessRunner, SystemRunner};
pub use mount::{ensure_hugepage_mount, MountOutcome};
pub use pipeline::{run, RunOutcome};

/// Launcher version (semver).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
