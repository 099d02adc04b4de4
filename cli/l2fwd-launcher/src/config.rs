//! Launcher configuration.
//!
//! Built-in defaults reproduce the classic two-port l2fwd setup. A TOML file
//! may replace any of them, and CLI flags / environment variables override
//! the file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Default hugepage mount point.
pub const DEFAULT_MOUNT_PATH: &str = "/mnt/huge";

/// Default hugepage filesystem type.
pub const DEFAULT_FSTYPE: &str = "hugetlbfs";

/// Mount source for pseudo filesystems.
pub const DEFAULT_MOUNT_SOURCE: &str = "nodev";

/// Default forwarder executable, looked up on PATH.
pub const DEFAULT_EXECUTABLE: &str = "dpdk-l2fwd";

/// NICs expected to be bound to a DPDK-compatible driver.
pub const DEFAULT_DEVICES: &[&str] = &["0000:00:08.0", "0000:00:09.0"];

/// How privileged operations are performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ElevateMode {
    /// Direct when running as root, sudo otherwise.
    #[default]
    Auto,
    /// Always go through sudo.
    Sudo,
    /// Never elevate; operations run with the current credentials.
    Never,
}

/// Hugepage mount target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MountTarget {
    /// Mount point.
    pub path: PathBuf,

    /// Filesystem type.
    pub fstype: String,

    /// Mount source (hugetlbfs ignores it).
    pub source: String,
}

impl Default for MountTarget {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_MOUNT_PATH),
            fstype: DEFAULT_FSTYPE.to_string(),
            source: DEFAULT_MOUNT_SOURCE.to_string(),
        }
    }
}

/// Forwarder invocation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForwarderConfig {
    /// Executable name or path.
    pub executable: String,

    /// EAL core list (`-l`).
    pub cores: String,

    /// Memory channels (`-n`).
    pub memory_channels: u32,

    /// Enabled ports bitmask (`-p`).
    pub port_mask: u64,

    /// RX queues per lcore (`-q`).
    pub queues: u32,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            executable: DEFAULT_EXECUTABLE.to_string(),
            cores: "0-1".to_string(),
            memory_channels: 4,
            port_mask: 0x3,
            queues: 1,
        }
    }
}

/// Complete launcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LauncherConfig {
    pub mount: MountTarget,

    pub forwarder: ForwarderConfig,

    /// Privilege elevation mode.
    pub elevate: ElevateMode,

    /// Pass `-n` to sudo so it fails instead of prompting.
    pub non_interactive: bool,

    /// Exit 0 after any successful launch, whatever the child returned.
    pub ignore_child_status: bool,

    /// Log whether the configured devices are present.
    pub check_devices: bool,

    /// PCI addresses of the forwarding NICs.
    pub devices: Vec<String>,

    /// Report the plan without mounting or spawning.
    pub dry_run: bool,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            mount: MountTarget::default(),
            forwarder: ForwarderConfig::default(),
            elevate: ElevateMode::default(),
            non_interactive: false,
            ignore_child_status: false,
            check_devices: false,
            devices: DEFAULT_DEVICES.iter().map(|d| d.to_string()).collect(),
            dry_run: false,
        }
    }
}

/// Values supplied on the command line or through the environment.
///
/// `None` / `false` leaves the file or default value untouched.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub mount_path: Option<PathBuf>,
    pub fstype: Option<String>,
    pub executable: Option<String>,
    pub cores: Option<String>,
    pub memory_channels: Option<u32>,
    pub port_mask: Option<u64>,
    pub queues: Option<u32>,
    pub elevate: Option<ElevateMode>,
    pub non_interactive: bool,
    pub ignore_child_status: bool,
    pub check_devices: bool,
    pub dry_run: bool,
}

impl LauncherConfig {
    /// Load config from a TOML file, or return defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        Self::from_toml(&contents).with_context(|| format!("Failed to parse config from {:?}", path))
    }

    /// Parse config from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("invalid config TOML")
    }

    /// Apply command-line / environment overrides.
    pub fn apply(mut self, overrides: Overrides) -> Self {
        if let Some(path) = overrides.mount_path {
            self.mount.path = path;
        }
        if let Some(fstype) = overrides.fstype {
            self.mount.fstype = fstype;
        }
        if let Some(executable) = overrides.executable {
            self.forwarder.executable = executable;
        }
        if let Some(cores) = overrides.cores {
            self.forwarder.cores = cores;
        }
        if let Some(channels) = overrides.memory_channels {
            self.forwarder.memory_channels = channels;
        }
        if let Some(mask) = overrides.port_mask {
            self.forwarder.port_mask = mask;
        }
        if let Some(queues) = overrides.queues {
            self.forwarder.queues = queues;
        }
        if let Some(elevate) = overrides.elevate {
            self.elevate = elevate;
        }
        self.non_interactive |= overrides.non_interactive;
        self.ignore_child_status |= overrides.ignore_child_status;
        self.check_devices |= overrides.check_devices;
        self.dry_run |= overrides.dry_run;
        self
    }

    /// Reject values the forwarder could never start with.
    pub fn validate(&self) -> Result<()> {
        if self.mount.path.as_os_str().is_empty() {
            bail!("mount.path must not be empty");
        }
        if !self.mount.path.is_absolute() {
            bail!(
                "mount.path must be absolute, got {}",
                self.mount.path.display()
            );
        }
        if self.mount.fstype.trim().is_empty() {
            bail!("mount.fstype must not be empty");
        }
        if self.forwarder.executable.trim().is_empty() {
            bail!("forwarder.executable must not be empty");
        }
        if self.forwarder.cores.trim().is_empty() {
            bail!("forwarder.cores must not be empty");
        }
        if self.forwarder.memory_channels == 0 {
            bail!("forwarder.memory_channels must be at least 1");
        }
        if self.forwarder.queues == 0 {
            bail!("forwarder.queues must be at least 1");
        }
        if self.forwarder.port_mask == 0 {
            bail!("forwarder.port_mask must enable at least one port");
        }
        Ok(())
    }
}

/// Parse a port bitmask given as `0x`-prefixed hex or plain decimal.
pub fn parse_port_mask(raw: &str) -> Result<u64, String> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|e| format!("invalid port mask '{raw}': {e}"))
}
