/*!
 * Data-disk inventory
 *
 * Enumerates the individually mounted data disks of a JBOD array
 * (`/mnt/disk1`, `/mnt/disk2`, ...) with capacity and usage snapshots.
 */

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use sysinfo::Disks;

/// A data disk at plan time. Immutable snapshot for one planning cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    /// Disk name, e.g. `disk1`
    pub name: String,
    /// Mount path, e.g. `/mnt/disk1`
    pub path: PathBuf,
    pub size_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

impl Disk {
    pub fn new(name: &str, path: PathBuf, size_bytes: u64, used_bytes: u64) -> Self {
        Self {
            name: name.to_string(),
            path,
            size_bytes,
            used_bytes,
            free_bytes: size_bytes.saturating_sub(used_bytes),
        }
    }

    /// Fill percentage. A zero-capacity disk reports 0.
    pub fn used_percent(&self) -> f64 {
        if self.size_bytes == 0 {
            return 0.0;
        }
        (self.used_bytes as f64 / self.size_bytes as f64) * 100.0
    }
}

/// True when `name` looks like a data-disk mount (`disk` followed by digits).
fn is_data_disk_name(name: &str) -> bool {
    name.strip_prefix("disk")
        .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// Numeric suffix of a disk name, for natural ordering (disk2 < disk10).
fn disk_number(name: &str) -> u32 {
    name.strip_prefix("disk")
        .and_then(|rest| rest.parse().ok())
        .unwrap_or(0)
}

fn natural_order(a: &Disk, b: &Disk) -> Ordering {
    disk_number(&a.name)
        .cmp(&disk_number(&b.name))
        .then_with(|| a.name.cmp(&b.name))
}

/// Check whether a path is a currently mounted filesystem.
pub fn is_mounted(path: &Path) -> bool {
    let disks = Disks::new_with_refreshed_list();
    disks.iter().any(|d| d.mount_point() == path)
}

/// Discover mounted data disks under `disks_root`, optionally filtered by
/// include/exclude name lists, ordered by natural disk order.
pub fn discover_disks(
    disks_root: &Path,
    include: Option<&[String]>,
    exclude: Option<&[String]>,
) -> Vec<Disk> {
    let mounted = Disks::new_with_refreshed_list();
    let mut disks = Vec::new();

    for entry in mounted.iter() {
        let mount = entry.mount_point();
        if mount.parent() != Some(disks_root) {
            continue;
        }
        let name = match mount.file_name().and_then(|n| n.to_str()) {
            Some(n) if is_data_disk_name(n) => n.to_string(),
            _ => continue,
        };
        if let Some(include) = include {
            if !include.iter().any(|n| n == &name) {
                continue;
            }
        }
        if let Some(exclude) = exclude {
            if exclude.iter().any(|n| n == &name) {
                continue;
            }
        }

        let size = entry.total_space();
        let free = entry.available_space();
        disks.push(Disk {
            name,
            path: mount.to_path_buf(),
            size_bytes: size,
            used_bytes: size.saturating_sub(free),
            free_bytes: free,
        });
    }

    disks.sort_by(natural_order);
    disks
}
