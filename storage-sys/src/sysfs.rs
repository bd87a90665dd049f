// SPDX-License-Identifier: GPL-3.0-only

//! Block device discovery through sysfs

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{IoContext, Result, SysError};

/// Kernel names picked up by enumeration. Loops, nbds and device-mapper nodes
/// are only reachable by explicit path.
static DISK_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((s|v|xv|h)d[a-z]|nvme[0-9]n[0-9]+)$").expect("disk name pattern")
});

/// PCI drivers of the hardware RAID controllers we know how to query.
pub const RAID_DRIVERS: &[&str] = &["megaraid_sas", "mpi3mr", "smartpqi"];

/// View of a sysfs tree, normally mounted at `/sys`.
#[derive(Debug, Clone, Copy)]
pub struct Sysfs<'a> {
    root: &'a Path,
}

impl<'a> Sysfs<'a> {
    pub fn new(root: &'a Path) -> Self {
        Self { root }
    }

    fn block_dir(&self, kname: &str) -> PathBuf {
        self.root.join("block").join(kname)
    }

    fn class_dir(&self, kname: &str) -> PathBuf {
        self.root.join("class/block").join(kname)
    }

    /// Candidate disk kernel names under `block/`, sorted.
    pub fn list_disk_names(&self) -> Result<Vec<String>> {
        let dir = self.root.join("block");
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).at(&dir)? {
            let entry = entry.at(&dir)?;
            let name = entry.file_name().to_string_lossy().to_string();
            if is_disk_name(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Canonical kernel name for a device path or kernel name.
    ///
    /// Anything containing a slash is a path: its symlinks are resolved and the
    /// basename taken. The result must exist under `class/block`.
    pub fn resolve_kname(&self, device: &str) -> Result<String> {
        let kname = if device.contains('/') {
            let resolved = fs::canonicalize(device)
                .map_err(|_| SysError::NotABlockDevice(device.to_string()))?;
            resolved
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .ok_or_else(|| SysError::NotABlockDevice(device.to_string()))?
        } else {
            device.to_string()
        };

        if !self.class_dir(&kname).exists() {
            return Err(SysError::NotABlockDevice(device.to_string()));
        }
        Ok(kname)
    }

    /// Whole-disk kernel name for a partition; a disk maps to itself.
    pub fn parent_kname(&self, device: &str) -> Result<String> {
        let kname = self.resolve_kname(device)?;
        let class_dir = self.class_dir(&kname);
        if !class_dir.join("partition").exists() {
            return Ok(kname);
        }

        let resolved = fs::canonicalize(&class_dir).at(&class_dir)?;
        resolved
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| SysError::NotABlockDevice(device.to_string()))
    }

    /// Logical block size in bytes.
    pub fn logical_block_size(&self, kname: &str) -> Result<u64> {
        self.read_u64(&self.block_dir(kname).join("queue/logical_block_size"))
    }

    /// Whether the queue reports rotating media.
    pub fn rotational(&self, kname: &str) -> Result<bool> {
        Ok(self.read_u64(&self.block_dir(kname).join("queue/rotational"))? != 0)
    }

    /// Device size in bytes (sysfs counts 512-byte units regardless of sector size).
    pub fn size_bytes(&self, kname: &str) -> Result<u64> {
        Ok(self.read_u64(&self.class_dir(kname).join("size"))? * 512)
    }

    /// Name of the RAID controller driver the device hangs off, if any.
    ///
    /// `sys_path` is the udev `P:` value; its sysfs ancestry is searched for a
    /// `driver` link naming one of [`RAID_DRIVERS`].
    pub fn raid_driver(&self, sys_path: &str) -> Option<String> {
        if sys_path.is_empty() {
            return None;
        }
        let start = self.root.join(sys_path.trim_start_matches('/'));
        for dir in start.ancestors() {
            if dir == self.root || !dir.starts_with(self.root) {
                break;
            }
            let Ok(target) = fs::read_link(dir.join("driver")) else {
                continue;
            };
            let driver = target
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            if RAID_DRIVERS.contains(&driver.as_str()) {
                return Some(driver);
            }
        }
        None
    }

    fn read_u64(&self, path: &Path) -> Result<u64> {
        let raw = fs::read_to_string(path).at(path)?;
        raw.trim().parse().map_err(|_| SysError::ToolOutput {
            tool: "sysfs".to_string(),
            reason: format!("{}: expected an unsigned integer, got {:?}", path.display(), raw.trim()),
        })
    }
}

pub fn is_disk_name(name: &str) -> bool {
    DISK_NAME.is_match(name)
}

/// Device node of partition `number` of disk `kname`, e.g. `sda1` or `nvme0n1p1`.
pub fn partition_kname(kname: &str, number: u32) -> String {
    if kname.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{kname}p{number}")
    } else {
        format!("{kname}{number}")
    }
}
