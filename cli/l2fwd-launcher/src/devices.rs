//! Forwarding NIC presence check.
//!
//! Read-only: looks the configured PCI addresses up in sysfs and logs what it
//! finds. Nothing is bound or unbound here; use `dpdk-devbind.py -s` to see
//! and change driver bindings.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

/// sysfs directory listing PCI devices.
pub const PCI_DEVICES_DIR: &str = "/sys/bus/pci/devices";

/// What sysfs reports for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub address: String,
    pub present: bool,
    /// Name of the bound kernel driver, if any.
    pub driver: Option<String>,
}

/// Look each address up under `sysfs_root` and log the result.
pub fn check_devices(sysfs_root: &Path, addresses: &[String]) -> Vec<DeviceStatus> {
    addresses
        .iter()
        .map(|address| {
            let status = inspect(sysfs_root, address);
            match (status.present, &status.driver) {
                (false, _) => warn!(device = %address, "configured device not present"),
                (true, Some(driver)) => info!(device = %address, driver = %driver, "device present"),
                (true, None) => info!(device = %address, "device present, no driver bound"),
            }
            status
        })
        .collect()
}

fn inspect(sysfs_root: &Path, address: &str) -> DeviceStatus {
    let device_dir = sysfs_root.join(address);
    let present = device_dir.is_dir();
    let driver = present
        .then(|| fs::read_link(device_dir.join("driver")).ok())
        .flatten()
        .and_then(|link| link.file_name().map(|name| name.to_string_lossy().into_owned()));

    DeviceStatus {
        address: address.to_string(),
        present,
        driver,
    }
}
