// SPDX-License-Identifier: GPL-3.0-only

//! Disk and partition data models
//!
//! A [`Disk`] is a snapshot produced by a scan. It owns its partition map and
//! udev metadata; mutations go through the engine and are observed by scanning
//! again. Free space is never stored, it is derived from the partitions.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::common::{GPT_TAIL_SECTORS, MIB, ceil_to, find_range_gaps, floor_to};
use crate::Guid;

/// Storage media of a disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskKind {
    Hdd,
    Ssd,
    Nvme,
    #[default]
    Unknown,
}

/// How a disk is attached to the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachKind {
    Ata,
    Scsi,
    Usb,
    Virtio,
    Pcie,
    Xen,
    Nbd,
    Loop,
    Raid,
    #[default]
    Unknown,
}

/// Partition table found on a disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    Gpt,
    Mbr,
    #[default]
    None,
}

impl TableKind {
    /// Highest partition number the table can hold.
    ///
    /// A disk without a table gets a GPT on first write, so it follows GPT limits.
    pub fn max_partitions(&self) -> u32 {
        match self {
            Self::Gpt | Self::None => 128,
            Self::Mbr => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Mbr => "mbr",
            Self::None => "none",
        }
    }
}

/// Metadata reported by `udevadm info` for one device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdevInfo {
    /// Kernel name (`N:`)
    pub name: String,
    /// Kernel device path below `/sys` (`P:`)
    pub sys_path: String,
    /// Symlinks relative to `/dev` (`S:`)
    pub symlinks: Vec<String>,
    /// Unescaped properties (`E:`)
    pub properties: HashMap<String, String>,
}

impl UdevInfo {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// One partition of a disk, in bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// 1-based partition number
    pub number: u32,
    /// First byte of the partition
    pub start: u64,
    /// Last byte of the partition (inclusive)
    pub last: u64,
    /// Partition type; MBR types are widened with the byte at offset 15
    pub type_guid: Guid,
    /// Unique partition GUID; zero requests a generated one
    pub id: Guid,
    /// GPT partition name, at most 36 UTF-16 code units are persisted
    pub name: String,
}

impl Partition {
    pub fn size(&self) -> u64 {
        self.last - self.start + 1
    }

    pub fn overlaps(&self, other: &Partition) -> bool {
        self.start <= other.last && other.start <= self.last
    }
}

/// An unpartitioned extent `[start, last]`, aligned to 1 MiB on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeSpace {
    pub start: u64,
    pub last: u64,
}

impl FreeSpace {
    pub fn size(&self) -> u64 {
        self.last - self.start + 1
    }
}

/// A scanned disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    /// Kernel name (e.g. "sda"), or the file name for image files
    pub name: String,
    /// Device path (e.g. "/dev/sda")
    pub path: PathBuf,
    /// Total size in bytes
    pub size: u64,
    /// Logical sector size in bytes (512 or 4096)
    pub sector_size: u64,
    pub kind: DiskKind,
    pub attach: AttachKind,
    pub table: TableKind,
    pub udev: UdevInfo,
    pub partitions: BTreeMap<u32, Partition>,
}

impl Disk {
    /// Bytes addressable by the partition table.
    ///
    /// MBR stores 32-bit sector numbers, so it cannot describe space past
    /// `2^32` sectors.
    pub fn max_size(&self) -> u64 {
        match self.table {
            TableKind::Mbr => self.size.min((1u64 << 32) * self.sector_size),
            TableKind::Gpt | TableKind::None => self.size,
        }
    }

    /// First byte that partitions may use.
    pub fn usable_start(&self) -> u64 {
        MIB
    }

    /// First byte past the usable area; everything from here to the end of the
    /// disk is reserved for the secondary GPT and end alignment.
    pub fn usable_end(&self) -> u64 {
        let reserved = GPT_TAIL_SECTORS * self.sector_size;
        floor_to(self.max_size().saturating_sub(reserved), MIB)
    }

    pub fn free_spaces(&self) -> Vec<FreeSpace> {
        self.free_spaces_min(0)
    }

    /// Unpartitioned extents of at least `min_size` bytes.
    pub fn free_spaces_min(&self, min_size: u64) -> Vec<FreeSpace> {
        if self.size == 0 {
            return Vec::new();
        }

        let mut used = vec![(0, MIB - 1), (self.usable_end(), self.size)];
        // Pad partitions outward so every gap stays MiB aligned.
        used.extend(self.partitions.values().map(|p| {
            let start = floor_to(p.start, MIB);
            let end = ceil_to(p.last.saturating_add(1), MIB);
            (start, end.saturating_sub(1).max(start))
        }));

        find_range_gaps(&used, 0, self.size - 1)
            .into_iter()
            .map(|(start, last)| FreeSpace { start, last })
            .filter(|space| space.size() >= min_size.max(1))
            .collect()
    }

    pub fn partition(&self, number: u32) -> Option<&Partition> {
        self.partitions.get(&number)
    }

    /// Lowest partition number not yet in use.
    pub fn next_free_number(&self) -> Option<u32> {
        (1..=self.table.max_partitions()).find(|n| !self.partitions.contains_key(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition_types;

    fn disk(size: u64, sector_size: u64, table: TableKind) -> Disk {
        Disk {
            name: "disk.img".to_string(),
            path: PathBuf::from("/tmp/disk.img"),
            size,
            sector_size,
            table,
            ..Default::default()
        }
    }

    fn partition(number: u32, start: u64, last: u64) -> Partition {
        Partition {
            number,
            start,
            last,
            type_guid: partition_types::LINUX_FS,
            ..Default::default()
        }
    }

    #[test]
    fn empty_disk_has_one_free_space() {
        let disk = disk(200 * MIB, 512, TableKind::None);
        assert_eq!(disk.usable_end(), 199 * MIB);
        assert_eq!(
            disk.free_spaces(),
            vec![FreeSpace {
                start: MIB,
                last: 199 * MIB - 1
            }]
        );
    }

    #[test]
    fn partitions_split_free_space_on_mib_boundaries() {
        let mut disk = disk(200 * MIB, 512, TableKind::Gpt);
        disk.partitions
            .insert(1, partition(1, 10 * MIB, 20 * MIB - 1));
        // Unaligned end gets padded out to the next MiB.
        disk.partitions
            .insert(2, partition(2, 50 * MIB, 60 * MIB + 4095));

        let spaces = disk.free_spaces();
        assert_eq!(
            spaces,
            vec![
                FreeSpace {
                    start: MIB,
                    last: 10 * MIB - 1
                },
                FreeSpace {
                    start: 20 * MIB,
                    last: 50 * MIB - 1
                },
                FreeSpace {
                    start: 61 * MIB,
                    last: 199 * MIB - 1
                },
            ]
        );

        for space in &spaces {
            assert_eq!(space.start % MIB, 0);
            assert_eq!((space.last + 1) % MIB, 0);
            assert!(space.start >= MIB);
            assert!(space.last < disk.usable_end());
            for p in disk.partitions.values() {
                assert!(space.last < p.start || space.start > p.last);
            }
        }
    }

    #[test]
    fn minimum_size_filters_small_gaps() {
        let mut disk = disk(200 * MIB, 512, TableKind::Gpt);
        disk.partitions.insert(1, partition(1, 2 * MIB, 199 * MIB - 1));
        assert_eq!(disk.free_spaces().len(), 1);
        assert!(disk.free_spaces_min(2 * MIB).is_empty());
    }

    #[test]
    fn fully_partitioned_disk_has_no_free_space() {
        let mut disk = disk(200 * MIB, 512, TableKind::Gpt);
        disk.partitions.insert(1, partition(1, MIB, 199 * MIB - 1));
        assert!(disk.free_spaces().is_empty());
    }

    #[test]
    fn mbr_caps_addressable_size() {
        let disk = disk(4 << 40, 512, TableKind::Mbr);
        assert_eq!(disk.max_size(), 2 << 40);
        assert!(disk.usable_end() < 2 << 40);
        let gpt = Disk {
            table: TableKind::Gpt,
            ..disk.clone()
        };
        assert_eq!(gpt.max_size(), 4 << 40);
    }

    #[test]
    fn table_limits() {
        assert_eq!(TableKind::Gpt.max_partitions(), 128);
        assert_eq!(TableKind::None.max_partitions(), 128);
        assert_eq!(TableKind::Mbr.max_partitions(), 4);
    }

    #[test]
    fn next_free_number_skips_used_slots() {
        let mut disk = disk(200 * MIB, 512, TableKind::Mbr);
        disk.partitions.insert(1, partition(1, MIB, 2 * MIB - 1));
        disk.partitions.insert(2, partition(2, 2 * MIB, 3 * MIB - 1));
        assert_eq!(disk.next_free_number(), Some(3));
    }
}
