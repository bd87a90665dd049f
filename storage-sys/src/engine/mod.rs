// SPDX-License-Identifier: GPL-3.0-only

//! Partition-table engine
//!
//! Scans produce a [`Disk`] snapshot; mutations validate against that snapshot,
//! rewrite the table under an exclusive lock and, for block devices, tell the
//! kernel afterwards. Callers scan again to observe the result.

pub mod kernel;
pub mod mutate;
pub mod validate;

use std::fs::{self, File};
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use storage_types::{Disk, Partition, TableKind, UdevInfo};
use tracing::{debug, warn};

use crate::classify;
use crate::config::SysConfig;
use crate::error::{Result, SysError};
use crate::sysfs::Sysfs;
use crate::table::{self, gpt::GptTable, mbr::MbrTable};
use crate::udev;
use crate::virt::VirtCache;
use kernel::Change;

/// Scan a block device or image file.
///
/// Block devices are described through sysfs and udev; image files get
/// 512-byte sectors unless a GPT on them says otherwise.
pub fn scan_path(config: &SysConfig, virt: &VirtCache, path: &Path) -> Result<Disk> {
    let metadata = fs::metadata(path).map_err(|_| SysError::PathResolution {
        path: path.to_path_buf(),
    })?;
    let file_type = metadata.file_type();
    let is_block = file_type.is_block_device();
    if !is_block && !file_type.is_file() {
        return Err(SysError::PathResolution {
            path: path.to_path_buf(),
        });
    }

    let file = File::open(path).map_err(|source| SysError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let size = table::device_size(&file, path)?;

    let mut disk = if is_block {
        describe_block_device(config, virt, path, size)?
    } else {
        Disk {
            name: path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
            path: path.to_path_buf(),
            size,
            sector_size: 512,
            udev: UdevInfo::default(),
            ..Default::default()
        }
    };

    read_table(&file, &mut disk, is_block)?;
    check_geometry(&disk)?;
    debug!(
        "{}: {} bytes, {}-byte sectors, {} table, {} partition(s)",
        disk.path.display(),
        disk.size,
        disk.sector_size,
        disk.table.as_str(),
        disk.partitions.len()
    );
    Ok(disk)
}

fn describe_block_device(
    config: &SysConfig,
    virt: &VirtCache,
    path: &Path,
    size: u64,
) -> Result<Disk> {
    let sysfs = Sysfs::new(&config.sysfs_root);
    let device = path.to_str().ok_or_else(|| SysError::PathResolution {
        path: path.to_path_buf(),
    })?;
    let kname = sysfs.resolve_kname(device)?;
    let sector_size = sysfs.logical_block_size(&kname)?;
    let udev = udev::query_udev_info(config, &kname)?;

    let kind = classify::media_kind(&sysfs, &kname, &udev, virt.get(config));
    let attach = classify::attach_kind(&sysfs, &udev);

    Ok(Disk {
        path: config.dev_root.join(&kname),
        name: kname,
        size,
        sector_size,
        kind,
        attach,
        udev,
        ..Default::default()
    })
}

/// Try GPT first, then MBR. No table at all is a valid outcome.
fn read_table(file: &File, disk: &mut Disk, is_block: bool) -> Result<()> {
    match GptTable::probe(file, &disk.path) {
        Ok(gpt) => {
            if gpt.sector_size != disk.sector_size {
                if is_block {
                    return Err(SysError::GeometryMismatch {
                        path: disk.path.clone(),
                        disk_sector_size: disk.sector_size,
                        table_sector_size: gpt.sector_size,
                    });
                }
                debug!(
                    "{}: adopting the GPT's {}-byte sectors",
                    disk.path.display(),
                    gpt.sector_size
                );
                disk.sector_size = gpt.sector_size;
            }
            disk.table = TableKind::Gpt;
            disk.partitions = gpt.partitions();
            Ok(())
        }
        Err(SysError::NoPartitionTable) => match MbrTable::read(file, &disk.path) {
            Ok(mbr) if mbr.is_protective() => {
                warn!(
                    "{}: protective MBR without a valid GPT, treating as unpartitioned",
                    disk.path.display()
                );
                Ok(())
            }
            Ok(mbr) => {
                if disk.sector_size != 512 {
                    return Err(SysError::InvalidGeometry {
                        path: disk.path.clone(),
                        reason: format!(
                            "MBR found on a disk with {}-byte sectors",
                            disk.sector_size
                        ),
                    });
                }
                disk.table = TableKind::Mbr;
                disk.partitions = mbr.partitions();
                Ok(())
            }
            Err(SysError::NoPartitionTable) => Ok(()),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    }
}

fn check_geometry(disk: &Disk) -> Result<()> {
    let reason = if !disk.sector_size.is_power_of_two() {
        format!("sector size {} is not a power of two", disk.sector_size)
    } else if disk.size == 0 {
        "size is zero".to_string()
    } else if disk.size % disk.sector_size != 0 {
        format!(
            "size {} is not a multiple of the {}-byte sector size",
            disk.size, disk.sector_size
        )
    } else {
        return Ok(());
    };
    Err(SysError::InvalidGeometry {
        path: disk.path.clone(),
        reason,
    })
}

pub fn create_partitions(
    config: &SysConfig,
    disk: &Disk,
    partitions: &[Partition],
) -> Result<Vec<Partition>> {
    if partitions.is_empty() {
        return Ok(Vec::new());
    }
    validate::validate_new(disk, partitions)?;

    let (written, is_block) = mutate::create(disk, partitions)?;
    if is_block {
        let changes: Vec<Change<'_>> = written.iter().map(Change::Added).collect();
        kernel::reconcile(config, disk, &changes)?;
    }
    Ok(written)
}

pub fn update_partitions(config: &SysConfig, disk: &Disk, partitions: &[Partition]) -> Result<()> {
    if partitions.is_empty() {
        return Ok(());
    }
    validate::validate_update(disk, partitions)?;

    let (updated, is_block) = mutate::update(disk, partitions)?;
    if is_block {
        let changes: Vec<Change<'_>> = updated.iter().map(Change::Updated).collect();
        kernel::reconcile(config, disk, &changes)?;
    }
    Ok(())
}

pub fn delete_partition(config: &SysConfig, disk: &Disk, number: u32) -> Result<()> {
    if disk.table != TableKind::None {
        validate::check_number(disk, number)?;
    }
    if mutate::delete(disk, number)? {
        kernel::reconcile(config, disk, &[Change::Removed(number)])?;
    }
    Ok(())
}

pub fn wipe(config: &SysConfig, disk: &Disk) -> Result<()> {
    if mutate::wipe(disk)? {
        let changes: Vec<Change<'_>> = disk.partitions.keys().map(|n| Change::Removed(*n)).collect();
        kernel::reconcile(config, disk, &changes)?;
    }
    Ok(())
}
