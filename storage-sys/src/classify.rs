// SPDX-License-Identifier: GPL-3.0-only

//! Media and attachment classification
//!
//! Classification is advisory: helper failures degrade to HDD / unknown
//! attachment and are only logged.

use std::sync::LazyLock;

use regex::Regex;
use storage_types::{AttachKind, DiskKind, UdevInfo};
use tracing::debug;

use crate::sysfs::Sysfs;
use crate::virt::Virtualization;

/// Serial numbers QEMU assigns to drives declared as SSDs by the host.
static KVM_SSD_SERIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ssd[0-9-]").expect("ssd serial pattern"));

pub fn media_kind(
    sysfs: &Sysfs<'_>,
    kname: &str,
    udev: &UdevInfo,
    virt: &Virtualization,
) -> DiskKind {
    if kname.starts_with("nvme") {
        return DiskKind::Nvme;
    }

    if *virt == Virtualization::Kvm
        && udev
            .property("ID_SERIAL")
            .is_some_and(|serial| KVM_SSD_SERIAL.is_match(serial))
    {
        return DiskKind::Ssd;
    }

    let rotational = sysfs
        .parent_kname(kname)
        .and_then(|parent| sysfs.rotational(&parent));
    match rotational {
        Ok(false) => DiskKind::Ssd,
        Ok(true) => DiskKind::Hdd,
        Err(e) => {
            debug!("{kname}: cannot read rotational flag, assuming HDD: {e}");
            DiskKind::Hdd
        }
    }
}

pub fn attach_kind(sysfs: &Sysfs<'_>, udev: &UdevInfo) -> AttachKind {
    if let Some(driver) = sysfs.raid_driver(&udev.sys_path) {
        debug!("{}: behind {driver}", udev.name);
        return AttachKind::Raid;
    }
    attach_kind_from_udev(udev)
}

/// Attachment derived from udev properties and the sys-path alone.
pub fn attach_kind_from_udev(udev: &UdevInfo) -> AttachKind {
    match udev.property("ID_BUS").unwrap_or_default() {
        "ata" => return AttachKind::Ata,
        "usb" => return AttachKind::Usb,
        "scsi" => return AttachKind::Scsi,
        "virtio" => return AttachKind::Virtio,
        "" => {}
        _ => return AttachKind::Unknown,
    }

    let sys_path = udev.sys_path.as_str();
    if sys_path.contains("/virtio") {
        AttachKind::Virtio
    } else if sys_path.contains("/nvme/") {
        AttachKind::Pcie
    } else if sys_path.starts_with("/devices/virtual/block/nbd") {
        AttachKind::Nbd
    } else if sys_path.starts_with("/devices/virtual/block/loop") {
        AttachKind::Loop
    } else if sys_path.starts_with("/devices/vbd-") {
        AttachKind::Xen
    } else {
        AttachKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;

    use super::*;

    fn udev(sys_path: &str, properties: &[(&str, &str)]) -> UdevInfo {
        UdevInfo {
            name: sys_path.rsplit('/').next().unwrap_or_default().to_string(),
            sys_path: sys_path.to_string(),
            symlinks: Vec::new(),
            properties: properties
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn disk_with_rotational(root: &Path, kname: &str, rotational: &str) {
        let dev = root.join("devices/platform").join(kname);
        fs::create_dir_all(dev.join("queue")).expect("mkdir");
        fs::write(dev.join("queue/rotational"), rotational).expect("write");
        for dir in ["block", "class/block"] {
            fs::create_dir_all(root.join(dir)).expect("mkdir");
            std::os::unix::fs::symlink(&dev, root.join(dir).join(kname)).expect("symlink");
        }
    }

    #[test]
    fn nvme_by_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sysfs = Sysfs::new(dir.path());
        assert_eq!(
            media_kind(&sysfs, "nvme0n1", &UdevInfo::default(), &Virtualization::None),
            DiskKind::Nvme
        );
    }

    #[test]
    fn rotational_flag_decides() {
        let dir = tempfile::tempdir().expect("tempdir");
        disk_with_rotational(dir.path(), "sda", "0\n");
        disk_with_rotational(dir.path(), "sdb", "1\n");
        let sysfs = Sysfs::new(dir.path());
        let none = Virtualization::None;
        assert_eq!(media_kind(&sysfs, "sda", &UdevInfo::default(), &none), DiskKind::Ssd);
        assert_eq!(media_kind(&sysfs, "sdb", &UdevInfo::default(), &none), DiskKind::Hdd);
    }

    #[test]
    fn unreadable_rotational_defaults_to_hdd() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sysfs = Sysfs::new(dir.path());
        assert_eq!(
            media_kind(&sysfs, "sdq", &UdevInfo::default(), &Virtualization::None),
            DiskKind::Hdd
        );
    }

    #[test]
    fn kvm_ssd_serials() {
        let dir = tempfile::tempdir().expect("tempdir");
        disk_with_rotational(dir.path(), "vda", "1\n");
        let sysfs = Sysfs::new(dir.path());
        let info = udev("/devices/pci0000:00/virtio2/block/vda", &[("ID_SERIAL", "ssd0-root")]);

        assert_eq!(media_kind(&sysfs, "vda", &info, &Virtualization::Kvm), DiskKind::Ssd);
        // Outside KVM the serial means nothing.
        assert_eq!(media_kind(&sysfs, "vda", &info, &Virtualization::None), DiskKind::Hdd);

        let plain = udev("/devices/pci0000:00/virtio2/block/vda", &[("ID_SERIAL", "disk0")]);
        assert_eq!(media_kind(&sysfs, "vda", &plain, &Virtualization::Kvm), DiskKind::Hdd);
    }

    #[test]
    fn bus_property_maps_directly() {
        for (bus, kind) in [
            ("ata", AttachKind::Ata),
            ("usb", AttachKind::Usb),
            ("scsi", AttachKind::Scsi),
            ("virtio", AttachKind::Virtio),
            ("ieee1394", AttachKind::Unknown),
        ] {
            assert_eq!(attach_kind_from_udev(&udev("/devices/x/block/sda", &[("ID_BUS", bus)])), kind);
        }
    }

    #[test]
    fn sys_path_fallbacks() {
        for (path, kind) in [
            ("/devices/pci0000:00/0000:00:04.0/virtio1/block/vda", AttachKind::Virtio),
            ("/devices/pci0000:00/0000:00:1d.0/nvme/nvme0/nvme0n1", AttachKind::Pcie),
            ("/devices/virtual/block/nbd0", AttachKind::Nbd),
            ("/devices/virtual/block/loop3", AttachKind::Loop),
            ("/devices/vbd-51712/block/xvda", AttachKind::Xen),
            ("/devices/platform/mystery/block/sdz", AttachKind::Unknown),
        ] {
            assert_eq!(attach_kind_from_udev(&udev(path, &[])), kind, "{path}");
        }
    }

    #[test]
    fn raid_driver_wins_over_bus() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let hba = root.join("devices/pci0000:00/0000:3b:00.0");
        fs::create_dir_all(hba.join("host0/block/sdc")).expect("mkdir");
        fs::create_dir_all(root.join("bus/pci/drivers/smartpqi")).expect("mkdir");
        std::os::unix::fs::symlink(root.join("bus/pci/drivers/smartpqi"), hba.join("driver"))
            .expect("symlink");

        let sysfs = Sysfs::new(root);
        let info = udev("/devices/pci0000:00/0000:3b:00.0/host0/block/sdc", &[("ID_BUS", "scsi")]);
        assert_eq!(attach_kind(&sysfs, &info), AttachKind::Raid);
    }
}
