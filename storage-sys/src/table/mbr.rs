// SPDX-License-Identifier: GPL-3.0-only

//! Classic MBR with four primary entries
//!
//! Only 512-byte sectors are supported. CHS fields are never interpreted; data
//! entries get the "use LBA" marker `FE FF FF`.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use storage_types::partition_types::MBR_PROTECTIVE;
use storage_types::{Guid, Partition};
use tracing::debug;

use super::{le_u32, read_at, write_at};
use crate::error::{Result, SysError};

pub const SECTOR_SIZE: u64 = 512;
pub const SIGNATURE: [u8; 2] = [0x55, 0xAA];
pub const ENTRY_COUNT: usize = 4;

const TABLE_OFFSET: usize = 446;
const ENTRY_SIZE: usize = 16;
const SIGNATURE_OFFSET: usize = 510;
const CHS_LBA: [u8; 3] = [0xFE, 0xFF, 0xFF];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MbrEntry {
    pub status: u8,
    pub kind: u8,
    pub lba_start: u32,
    pub lba_len: u32,
}

impl MbrEntry {
    pub fn is_empty(&self) -> bool {
        self.kind == 0 || self.lba_len == 0
    }

    fn decode(raw: &[u8]) -> Self {
        Self {
            status: raw[0],
            kind: raw[4],
            lba_start: le_u32(raw, 8),
            lba_len: le_u32(raw, 12),
        }
    }

    fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut raw = [0u8; ENTRY_SIZE];
        if *self == Self::default() {
            return raw;
        }
        raw[0] = self.status;
        raw[1..4].copy_from_slice(&CHS_LBA);
        raw[4] = self.kind;
        raw[5..8].copy_from_slice(&CHS_LBA);
        raw[8..12].copy_from_slice(&self.lba_start.to_le_bytes());
        raw[12..16].copy_from_slice(&self.lba_len.to_le_bytes());
        raw
    }
}

/// Sector 0 of a disk: boot code is carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbrTable {
    sector: Vec<u8>,
    pub entries: [MbrEntry; ENTRY_COUNT],
}

impl MbrTable {
    /// Parse sector 0; a missing `55 AA` signature means there is no MBR.
    pub fn read(file: &File, path: &Path) -> Result<Self> {
        let sector = read_at(file, path, 0, SECTOR_SIZE as usize)?;
        if sector[SIGNATURE_OFFSET..] != SIGNATURE {
            return Err(SysError::NoPartitionTable);
        }

        let mut entries = [MbrEntry::default(); ENTRY_COUNT];
        for (index, entry) in entries.iter_mut().enumerate() {
            let offset = TABLE_OFFSET + index * ENTRY_SIZE;
            *entry = MbrEntry::decode(&sector[offset..offset + ENTRY_SIZE]);
        }
        Ok(Self { sector, entries })
    }

    /// The existing MBR, or an empty one that keeps whatever boot code sector 0
    /// already holds.
    pub fn read_or_new(file: &File, path: &Path) -> Result<Self> {
        match Self::read(file, path) {
            Err(SysError::NoPartitionTable) => {
                debug!("{}: no MBR, starting an empty one", path.display());
                let sector = match read_at(file, path, 0, SECTOR_SIZE as usize) {
                    Ok(sector) => sector,
                    Err(SysError::NoPartitionTable) => vec![0u8; SECTOR_SIZE as usize],
                    Err(e) => return Err(e),
                };
                Ok(Self {
                    sector,
                    entries: [MbrEntry::default(); ENTRY_COUNT],
                })
            }
            other => other,
        }
    }

    /// Whether this is the protective MBR of a GPT disk.
    pub fn is_protective(&self) -> bool {
        self.entries.iter().any(|entry| entry.kind == MBR_PROTECTIVE)
    }

    /// Used slots as partitions, numbered from 1 by slot.
    pub fn partitions(&self) -> BTreeMap<u32, Partition> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_empty())
            .map(|(index, entry)| {
                let number = index as u32 + 1;
                let start = u64::from(entry.lba_start) * SECTOR_SIZE;
                let size = u64::from(entry.lba_len) * SECTOR_SIZE;
                let partition = Partition {
                    number,
                    start,
                    last: start + size - 1,
                    type_guid: Guid::from_mbr_type(entry.kind),
                    id: Guid::EMPTY,
                    name: String::new(),
                };
                (number, partition)
            })
            .collect()
    }

    pub fn write(&self, file: &File, path: &Path) -> Result<()> {
        let mut sector = self.sector.clone();
        sector.resize(SECTOR_SIZE as usize, 0);
        for (index, entry) in self.entries.iter().enumerate() {
            let offset = TABLE_OFFSET + index * ENTRY_SIZE;
            sector[offset..offset + ENTRY_SIZE].copy_from_slice(&entry.encode());
        }
        sector[SIGNATURE_OFFSET..].copy_from_slice(&SIGNATURE);
        write_at(file, path, 0, &sector)
    }
}

/// Install the protective MBR that precedes a GPT.
///
/// Bytes 0..445 are preserved. The single 0xEE entry starts at LBA 1 and is
/// `disk_sectors - 2` sectors long, clamped to what 32 bits can express.
pub fn write_protective(file: &File, path: &Path, disk_sectors: u64) -> Result<()> {
    let mut sector = match read_at(file, path, 0, SECTOR_SIZE as usize) {
        Ok(sector) => sector,
        Err(SysError::NoPartitionTable) => vec![0u8; SECTOR_SIZE as usize],
        Err(e) => return Err(e),
    };

    sector[TABLE_OFFSET..SIGNATURE_OFFSET].fill(0);

    let len = u32::try_from(disk_sectors.saturating_sub(2)).unwrap_or(u32::MAX);
    let entry = &mut sector[TABLE_OFFSET..TABLE_OFFSET + ENTRY_SIZE];
    entry[1..4].copy_from_slice(&[0x00, 0x02, 0x00]);
    entry[4] = MBR_PROTECTIVE;
    entry[5..8].copy_from_slice(&[0xFF, 0xFF, 0xFF]);
    entry[8..12].copy_from_slice(&1u32.to_le_bytes());
    entry[12..16].copy_from_slice(&len.to_le_bytes());

    sector[SIGNATURE_OFFSET..].copy_from_slice(&SIGNATURE);
    write_at(file, path, 0, &sector)
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::FileExt;

    use super::*;

    fn disk(size: u64) -> File {
        let file = tempfile::tempfile().expect("tempfile");
        file.set_len(size).expect("truncate");
        file
    }

    fn sector0(file: &File) -> Vec<u8> {
        let mut buf = vec![0u8; 512];
        file.read_exact_at(&mut buf, 0).expect("read");
        buf
    }

    #[test]
    fn blank_disk_has_no_mbr() {
        let file = disk(1 << 20);
        assert!(matches!(
            MbrTable::read(&file, Path::new("blank")),
            Err(SysError::NoPartitionTable)
        ));
    }

    #[test]
    fn writes_entries_and_reads_them_back() {
        let path = Path::new("mbr.img");
        let file = disk(200 << 20);
        let mut table = MbrTable::read_or_new(&file, path).expect("new");
        table.entries[0] = MbrEntry {
            status: 0,
            kind: 0x8E,
            lba_start: 2048,
            lba_len: 4096,
        };
        table.write(&file, path).expect("write");

        let raw = sector0(&file);
        assert_eq!(&raw[510..], &[0x55, 0xAA]);
        assert_eq!(raw[446 + 4], 0x8E);
        assert_eq!(&raw[446 + 1..446 + 4], &[0xFE, 0xFF, 0xFF]);
        // Unused slots stay all zero.
        assert!(raw[462..510].iter().all(|b| *b == 0));

        let table = MbrTable::read(&file, path).expect("read");
        assert!(!table.is_protective());
        let parts = table.partitions();
        assert_eq!(parts.len(), 1);
        let part = &parts[&1];
        assert_eq!(part.start, 2048 * 512);
        assert_eq!(part.last, (2048 + 4096) * 512 - 1);
        assert_eq!(part.type_guid.as_bytes()[15], 0x8E);
        assert_eq!(part.type_guid.mbr_type(), Some(0x8E));
        assert!(part.id.is_empty());
    }

    #[test]
    fn boot_code_is_preserved() {
        let path = Path::new("boot.img");
        let file = disk(1 << 20);
        file.write_all_at(&[0xEB; 446], 0).expect("boot code");

        write_protective(&file, path, 2048).expect("protective");
        let raw = sector0(&file);
        assert!(raw[..446].iter().all(|b| *b == 0xEB));

        let mut table = MbrTable::read(&file, path).expect("read");
        table.entries[0] = MbrEntry::default();
        table.entries[1] = MbrEntry {
            status: 0x80,
            kind: 0x83,
            lba_start: 2048,
            lba_len: 1,
        };
        table.write(&file, path).expect("write");
        assert!(sector0(&file)[..446].iter().all(|b| *b == 0xEB));
    }

    #[test]
    fn protective_entry_layout() {
        let path = Path::new("gpt.img");
        let file = disk(1 << 20);
        write_protective(&file, path, 409600).expect("protective");

        let raw = sector0(&file);
        let entry = &raw[446..462];
        assert_eq!(entry[0], 0);
        assert_eq!(&entry[1..4], &[0x00, 0x02, 0x00]);
        assert_eq!(entry[4], 0xEE);
        assert_eq!(&entry[5..8], &[0xFF, 0xFF, 0xFF]);
        assert_eq!(le_u32(entry, 8), 1);
        assert_eq!(le_u32(entry, 12), 409598);
        assert!(raw[462..510].iter().all(|b| *b == 0));
        assert_eq!(&raw[510..], &[0x55, 0xAA]);

        let table = MbrTable::read(&file, path).expect("read");
        assert!(table.is_protective());
    }

    #[test]
    fn protective_length_saturates() {
        let path = Path::new("huge.img");
        let file = disk(1 << 20);
        write_protective(&file, path, 1 << 40).expect("protective");
        assert_eq!(le_u32(&sector0(&file)[446..462], 12), u32::MAX);
    }
}
