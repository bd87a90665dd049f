// SPDX-License-Identifier: GPL-3.0-only

//! Hardware RAID controller topology
//!
//! Filled in by the vendor tool clients. Only [`VirtualDrive::os_path`] is used to
//! correlate a controller with the block devices the host sees.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::DiskKind;

/// Vendor family of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerFamily {
    /// LSI/Broadcom MegaRAID, managed by `storcli`
    MegaRaid,
    /// Broadcom MPI3 (mpi3mr), managed by `storcli2`
    Mpi3mr,
    /// Microsemi SmartPQI, managed by `arcconf`
    SmartPqi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalDrive {
    pub id: String,
    pub enclosure: Option<String>,
    pub slot: Option<String>,
    pub state: String,
    pub media: DiskKind,
    pub model: String,
    pub size: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveGroup {
    pub id: String,
    /// Ids of the member [`PhysicalDrive`]s
    pub drives: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDrive {
    pub id: String,
    pub drive_group: String,
    /// Vendor type string (e.g. "RAID1", "Logical Device")
    pub kind: String,
    pub raid_level: String,
    /// Block device the OS exposes for this drive, if the tool reports it
    pub os_path: Option<String>,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controller {
    pub id: u32,
    pub family: ControllerFamily,
    pub physical_drives: Vec<PhysicalDrive>,
    pub drive_groups: Vec<DriveGroup>,
    pub virtual_drives: Vec<VirtualDrive>,
}

impl Controller {
    pub fn new(id: u32, family: ControllerFamily) -> Self {
        Self {
            id,
            family,
            physical_drives: Vec::new(),
            drive_groups: Vec::new(),
            virtual_drives: Vec::new(),
        }
    }

    /// OS block device paths backed by this controller.
    pub fn os_paths(&self) -> impl Iterator<Item = &str> {
        self.virtual_drives
            .iter()
            .filter_map(|vd| vd.os_path.as_deref())
    }
}
