// SPDX-License-Identifier: GPL-3.0-only

//! Hardware RAID controller clients
//!
//! Each vendor tool is wrapped behind [`RaidClient`]. The engine only cares
//! about the OS paths of virtual drives, see [`annotate_raid`].

pub mod arcconf;
pub mod storcli;

use storage_types::{AttachKind, Controller, ControllerFamily, Disk};
use tracing::debug;

use crate::config::SysConfig;
use crate::error::Result;

pub use arcconf::ArcconfClient;
pub use storcli::StorcliClient;

pub trait RaidClient {
    fn family(&self) -> ControllerFamily;

    /// Whether the vendor tool is installed.
    fn available(&self) -> bool;

    fn controller_ids(&self) -> Result<Vec<u32>>;

    fn controller(&self, id: u32) -> Result<Controller>;

    fn controllers(&self) -> Result<Vec<Controller>> {
        self.controller_ids()?
            .into_iter()
            .map(|id| self.controller(id))
            .collect()
    }
}

/// The client that manages controllers of `family`.
pub fn client_for(config: &SysConfig, family: ControllerFamily) -> Box<dyn RaidClient + '_> {
    match family {
        ControllerFamily::MegaRaid => Box::new(StorcliClient::megaraid(config)),
        ControllerFamily::Mpi3mr => Box::new(StorcliClient::mpi3mr(config)),
        ControllerFamily::SmartPqi => Box::new(ArcconfClient::new(config)),
    }
}

/// Controllers of every family whose tool is installed.
pub fn discover_controllers(config: &SysConfig) -> Result<Vec<Controller>> {
    let mut controllers = Vec::new();
    for family in [
        ControllerFamily::MegaRaid,
        ControllerFamily::Mpi3mr,
        ControllerFamily::SmartPqi,
    ] {
        let client = client_for(config, family);
        if !client.available() {
            debug!("no tool for {family:?} controllers");
            continue;
        }
        controllers.extend(client.controllers()?);
    }
    Ok(controllers)
}

/// Mark disks exposed by a RAID virtual drive as RAID-attached.
pub fn annotate_raid(disks: &mut [Disk], controllers: &[Controller]) {
    for disk in disks.iter_mut() {
        let path = disk.path.to_string_lossy();
        let backed = controllers
            .iter()
            .flat_map(Controller::os_paths)
            .any(|os_path| os_path == path);
        if backed {
            debug!("{} is a RAID virtual drive", disk.path.display());
            disk.attach = AttachKind::Raid;
        }
    }
}

/// Map a vendor media string to a disk kind.
pub(crate) fn media_from_vendor(media: &str) -> storage_types::DiskKind {
    use storage_types::DiskKind;
    match media.trim().to_ascii_uppercase().as_str() {
        "SSD" => DiskKind::Ssd,
        "HDD" => DiskKind::Hdd,
        "NVME" => DiskKind::Nvme,
        _ => DiskKind::Unknown,
    }
}
