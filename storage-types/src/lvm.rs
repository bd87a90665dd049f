// SPDX-License-Identifier: GPL-3.0-only

//! LVM (Logical Volume Manager) types
//!
//! Physical volumes, volume groups and logical volumes reference each other by
//! name. [`LvmReport`] keeps them in three maps instead of a linked graph.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Volume group information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGroupInfo {
    /// Volume group name
    pub name: String,

    /// Volume group UUID
    pub uuid: String,

    /// Total size in bytes
    pub size: u64,

    /// Free space in bytes
    pub free: u64,

    /// Number of physical volumes
    pub pv_count: u32,

    /// Number of logical volumes
    pub lv_count: u32,
}

impl VolumeGroupInfo {
    /// Get used space in bytes
    pub fn used(&self) -> u64 {
        self.size.saturating_sub(self.free)
    }
}

/// Logical volume information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolumeInfo {
    /// Logical volume name
    pub name: String,

    /// Parent volume group name
    pub vg_name: String,

    /// Logical volume UUID
    pub uuid: String,

    /// Size in bytes
    pub size: u64,

    /// Device path (e.g., "/dev/vg0/lv0")
    pub device_path: String,

    /// Whether the logical volume is active
    pub active: bool,
}

impl LogicalVolumeInfo {
    /// `vg/lv`, the form the lvm tools accept
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.vg_name, self.name)
    }

    /// Device-mapper name used for the opened LUKS container of this volume.
    pub fn crypt_name(&self) -> String {
        format!("{}-{}_crypt", self.vg_name, self.name)
    }
}

/// Physical volume information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalVolumeInfo {
    /// Device path (e.g., "/dev/sda1")
    pub device: String,

    /// Volume group name (None if not assigned)
    pub vg_name: Option<String>,

    /// Total size in bytes
    pub size: u64,

    /// Free space in bytes
    pub free: u64,
}

impl PhysicalVolumeInfo {
    /// Check if this PV is assigned to a VG
    pub fn is_assigned(&self) -> bool {
        self.vg_name.is_some()
    }
}

/// Snapshot of the LVM state: PVs keyed by device, VGs by name, LVs by `vg/lv`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvmReport {
    pub physical_volumes: BTreeMap<String, PhysicalVolumeInfo>,
    pub volume_groups: BTreeMap<String, VolumeGroupInfo>,
    pub logical_volumes: BTreeMap<String, LogicalVolumeInfo>,
}

impl LvmReport {
    pub fn pvs_of<'a>(&'a self, vg_name: &'a str) -> impl Iterator<Item = &'a PhysicalVolumeInfo> {
        self.physical_volumes
            .values()
            .filter(move |pv| pv.vg_name.as_deref() == Some(vg_name))
    }

    pub fn lvs_of<'a>(&'a self, vg_name: &'a str) -> impl Iterator<Item = &'a LogicalVolumeInfo> {
        self.logical_volumes
            .values()
            .filter(move |lv| lv.vg_name == vg_name)
    }
}
