//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{parse_port_mask, ElevateMode, Overrides};
use crate::logging::LogFormat;

/// Mount hugetlbfs and launch the DPDK L2 forwarder.
///
/// With no options, ensures /mnt/huge is mounted and runs
/// `dpdk-l2fwd -l 0-1 -n 4 -- -p 0x3 -q 1`.
#[derive(Debug, Parser)]
#[command(name = "l2fwd-launcher")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML config file.
    #[arg(short, long, env = "L2FWD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Hugepage mount point.
    #[arg(long, env = "L2FWD_MOUNT_PATH")]
    pub mount_path: Option<PathBuf>,

    /// Hugepage filesystem type.
    #[arg(long, env = "L2FWD_FSTYPE")]
    pub fstype: Option<String>,

    /// Forwarder executable (name on PATH or path).
    #[arg(long, env = "L2FWD_EXECUTABLE")]
    pub executable: Option<String>,

    /// EAL core list, e.g. 0-1.
    #[arg(long, env = "L2FWD_CORES")]
    pub cores: Option<String>,

    /// Number of memory channels.
    #[arg(long, env = "L2FWD_MEMORY_CHANNELS")]
    pub memory_channels: Option<u32>,

    /// Enabled ports bitmask, hex (0x3) or decimal.
    #[arg(long, env = "L2FWD_PORT_MASK", value_parser = parse_port_mask)]
    pub port_mask: Option<u64>,

    /// RX queues per lcore.
    #[arg(long, env = "L2FWD_QUEUES")]
    pub queues: Option<u32>,

    /// How to obtain root for mkdir, mount and the forwarder.
    #[arg(long, env = "L2FWD_ELEVATE", value_enum)]
    pub elevate: Option<ElevateMode>,

    /// Make sudo fail instead of prompting for a password.
    #[arg(long, env = "L2FWD_NON_INTERACTIVE")]
    pub non_interactive: bool,

    /// Log whether the configured NICs are present in sysfs.
    #[arg(long)]
    pub check_devices: bool,

    /// Exit 0 after a successful launch regardless of the forwarder's status.
    #[arg(long)]
    pub ignore_child_status: bool,

    /// Show what would be done without mounting or launching.
    #[arg(long)]
    pub dry_run: bool,

    /// Log output format.
    #[arg(long, env = "L2FWD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Config values given on the command line or via environment.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            mount_path: self.mount_path.clone(),
            fstype: self.fstype.clone(),
            executable: self.executable.clone(),
            cores: self.cores.clone(),
            memory_channels: self.memory_channels,
            port_mask: self.port_mask,
            queues: self.queues,
            elevate: self.elevate,
            non_interactive: self.non_interactive,
            ignore_child_status: self.ignore_child_status,
            check_devices: self.check_devices,
            dry_run: self.dry_run,
        }
    }
}
