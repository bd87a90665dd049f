// SPDX-License-Identifier: GPL-3.0-only

//! Table rewrites under an exclusive lock
//!
//! Every mutation opens the device read-write, takes `flock(LOCK_EX)`, does all
//! of its reads and writes, syncs, and closes. Nothing here talks to the kernel.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use storage_types::partition_types;
use storage_types::{Disk, Partition, TableKind, MIB};
use tracing::{debug, info};

use crate::error::{IoContext, Result, SysError};
use crate::table::gpt::{stored_name, GptEntry, GptTable};
use crate::table::mbr::{MbrEntry, MbrTable};
use crate::table::{self, zero_range};

/// A device opened for writing and exclusively locked until [`finish`](Self::finish)
/// or drop.
pub struct LockedDisk {
    file: Flock<File>,
    path: PathBuf,
    /// Whether the target is a block device rather than an image file
    pub is_block: bool,
    pub size: u64,
}

impl LockedDisk {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| SysError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let is_block = file.metadata().at(path)?.file_type().is_block_device();

        let file = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| SysError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::from(errno),
        })?;
        let size = table::device_size(&file, path)?;
        debug!("{}: locked for writing ({size} bytes)", path.display());

        Ok(Self {
            file,
            path: path.to_path_buf(),
            is_block,
            size,
        })
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Sync, unlock and close. Returns whether the target was a block device.
    pub fn finish(self) -> Result<bool> {
        self.file.sync_all().at(&self.path)?;
        let file = self.file.unlock().map_err(|(_, errno)| SysError::Io {
            path: self.path.clone(),
            source: std::io::Error::from(errno),
        })?;
        drop(file);
        debug!("{}: synced and unlocked", self.path.display());
        Ok(self.is_block)
    }
}

/// Zero the first and last MiB of a partition; short partitions are zeroed whole.
pub fn zero_ends(file: &File, path: &Path, partition: &Partition) -> Result<()> {
    let size = partition.size();
    if size <= 2 * MIB {
        return zero_range(file, path, partition.start, size);
    }
    zero_range(file, path, partition.start, MIB)?;
    zero_range(file, path, partition.last + 1 - MIB, MIB)
}

fn slot(number: u32) -> usize {
    number as usize - 1
}

fn occupied(path: &Path, number: u32) -> SysError {
    SysError::invalid_partition(path, number, "slot is already in use on disk")
}

/// Write new partitions. Returns them as persisted (GPT ids filled in) and
/// whether reconciliation with the kernel is needed.
pub fn create(disk: &Disk, partitions: &[Partition]) -> Result<(Vec<Partition>, bool)> {
    let locked = LockedDisk::open(&disk.path)?;
    let written = match disk.table {
        TableKind::Mbr => create_mbr(&locked, disk, partitions)?,
        TableKind::Gpt | TableKind::None => create_gpt(&locked, disk, partitions)?,
    };
    let is_block = locked.finish()?;
    info!(
        "{}: created {} partition(s)",
        disk.path.display(),
        written.len()
    );
    Ok((written, is_block))
}

fn read_or_new_gpt(locked: &LockedDisk, disk: &Disk) -> Result<GptTable> {
    match GptTable::read(locked.file(), &disk.path, disk.sector_size) {
        Err(SysError::NoPartitionTable) => {
            info!(
                "{}: no GPT, creating one with {}-byte sectors",
                disk.path.display(),
                disk.sector_size
            );
            Ok(GptTable::new(disk.sector_size))
        }
        other => other,
    }
}

fn create_gpt(locked: &LockedDisk, disk: &Disk, partitions: &[Partition]) -> Result<Vec<Partition>> {
    let file = locked.file();
    let mut gpt = read_or_new_gpt(locked, disk)?;

    for partition in partitions {
        let entry = &mut gpt.entries[slot(partition.number)];
        if !entry.is_empty() {
            return Err(occupied(&disk.path, partition.number));
        }
        *entry = GptEntry::from_partition(partition, disk.sector_size);
    }
    for partition in partitions {
        zero_ends(file, &disk.path, partition)?;
    }

    write_gpt(locked, disk, &mut gpt)?;

    let persisted = gpt.partitions();
    Ok(partitions
        .iter()
        .filter_map(|p| persisted.get(&p.number).cloned())
        .collect())
}

fn write_gpt(locked: &LockedDisk, disk: &Disk, gpt: &mut GptTable) -> Result<()> {
    gpt.write(locked.file(), &disk.path, locked.size)?;

    let verify = match GptTable::read(locked.file(), &disk.path, disk.sector_size) {
        Ok(read) => read,
        Err(SysError::NoPartitionTable) => {
            return Err(SysError::TableVerification {
                path: disk.path.clone(),
            });
        }
        Err(e) => return Err(e),
    };
    let consistent = verify
        .entries
        .iter()
        .zip(gpt.entries.iter())
        .all(|(read, written)| read.same_on_disk(written));
    if !consistent || verify.entries.len() != gpt.entries.len() {
        return Err(SysError::TableVerification {
            path: disk.path.clone(),
        });
    }
    Ok(())
}

fn read_mbr_for_write(locked: &LockedDisk, disk: &Disk) -> Result<MbrTable> {
    let mut mbr = MbrTable::read_or_new(locked.file(), &disk.path)?;
    if mbr.is_protective() {
        // The caller chose MBR for a disk whose GPT is gone.
        debug!("{}: replacing stale protective MBR", disk.path.display());
        mbr.entries = Default::default();
    }
    Ok(mbr)
}

fn create_mbr(locked: &LockedDisk, disk: &Disk, partitions: &[Partition]) -> Result<Vec<Partition>> {
    if disk.sector_size != 512 {
        return Err(SysError::UnsupportedOperation(format!(
            "{}: MBR needs 512-byte sectors",
            disk.path.display()
        )));
    }

    let file = locked.file();
    let mut mbr = read_mbr_for_write(locked, disk)?;

    for partition in partitions {
        let number = partition.number;
        let invalid = |reason: &str| SysError::invalid_partition(&disk.path, number, reason);

        if !mbr.entries[slot(number)].is_empty() {
            return Err(occupied(&disk.path, number));
        }
        let kind = partition_types::mbr_type_for(&partition.type_guid)
            .ok_or_else(|| invalid("type has no MBR equivalent"))?;
        let lba_start = u32::try_from(partition.start / 512)
            .map_err(|_| invalid("start is beyond what MBR can address"))?;
        let lba_len = u32::try_from(partition.size() / 512)
            .map_err(|_| invalid("size is beyond what MBR can address"))?;

        mbr.entries[slot(number)] = MbrEntry {
            status: 0,
            kind,
            lba_start,
            lba_len,
        };
    }
    for partition in partitions {
        zero_ends(file, &disk.path, partition)?;
    }

    write_mbr(locked, disk, &mbr)?;

    let persisted = mbr.partitions();
    Ok(partitions
        .iter()
        .filter_map(|p| persisted.get(&p.number).cloned())
        .collect())
}

fn write_mbr(locked: &LockedDisk, disk: &Disk, mbr: &MbrTable) -> Result<()> {
    mbr.write(locked.file(), &disk.path)?;
    match MbrTable::read(locked.file(), &disk.path) {
        Ok(read) if read.entries == mbr.entries => Ok(()),
        Ok(_) | Err(SysError::NoPartitionTable) => Err(SysError::TableVerification {
            path: disk.path.clone(),
        }),
        Err(e) => Err(e),
    }
}

/// Rewrite names, types and ids of existing GPT partitions. Zero-valued fields
/// keep what is on disk; the byte range is never touched.
pub fn update(disk: &Disk, partitions: &[Partition]) -> Result<(Vec<Partition>, bool)> {
    let locked = LockedDisk::open(&disk.path)?;
    let mut gpt = GptTable::read(locked.file(), &disk.path, disk.sector_size)?;

    for partition in partitions {
        let entry = &mut gpt.entries[slot(partition.number)];
        if entry.is_empty() {
            return Err(SysError::invalid_partition(
                &disk.path,
                partition.number,
                "no such partition on disk",
            ));
        }
        if !partition.name.is_empty() {
            entry.name = stored_name(&partition.name);
        }
        if !partition.type_guid.is_empty() {
            entry.type_guid = partition.type_guid;
        }
        if !partition.id.is_empty() {
            entry.id = partition.id;
        }
    }

    write_gpt(&locked, disk, &mut gpt)?;
    let is_block = locked.finish()?;
    info!(
        "{}: updated {} partition(s)",
        disk.path.display(),
        partitions.len()
    );

    let persisted = gpt.partitions();
    let updated = partitions
        .iter()
        .filter_map(|p| persisted.get(&p.number).cloned())
        .collect();
    Ok((updated, is_block))
}

/// Clear the slot of partition `number`. An already empty slot is left alone.
pub fn delete(disk: &Disk, number: u32) -> Result<bool> {
    if disk.table == TableKind::None {
        return Err(SysError::UnsupportedOperation(format!(
            "{}: no partition table to delete from",
            disk.path.display()
        )));
    }
    let locked = LockedDisk::open(&disk.path)?;

    match disk.table {
        TableKind::Gpt => {
            let mut gpt = GptTable::read(locked.file(), &disk.path, disk.sector_size)?;
            if gpt.entries[slot(number)].is_empty() {
                debug!("{}: partition {number} is already gone", disk.path.display());
            } else {
                gpt.entries[slot(number)] = GptEntry::default();
                write_gpt(&locked, disk, &mut gpt)?;
            }
        }
        TableKind::Mbr => {
            let mut mbr = MbrTable::read(locked.file(), &disk.path)?;
            if mbr.entries[slot(number)].is_empty() {
                debug!("{}: partition {number} is already gone", disk.path.display());
            } else {
                mbr.entries[slot(number)] = MbrEntry::default();
                write_mbr(&locked, disk, &mbr)?;
            }
        }
        TableKind::None => {}
    }

    let is_block = locked.finish()?;
    info!("{}: deleted partition {number}", disk.path.display());
    Ok(is_block)
}

/// Zero the whole device.
pub fn wipe(disk: &Disk) -> Result<bool> {
    let locked = LockedDisk::open(&disk.path)?;
    let size = locked.size;
    zero_range(locked.file(), &disk.path, 0, size)?;
    let is_block = locked.finish()?;
    info!("{}: wiped {size} bytes", disk.path.display());
    Ok(is_block)
}
