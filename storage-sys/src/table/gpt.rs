// SPDX-License-Identifier: GPL-3.0-only

//! GUID partition table
//!
//! Layout, in logical sectors of 512 or 4096 bytes:
//!
//! | LBA | Contents |
//! |---|---|
//! | 0 | protective MBR |
//! | 1 | primary header |
//! | 2.. | primary entry array (128 × 128 bytes) |
//! | last − array .. last − 1 | secondary entry array |
//! | last | secondary header |

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use storage_types::{Guid, Partition};
use tracing::debug;

use super::{le_u32, le_u64, mbr, read_at, write_at};
use crate::error::{Result, SysError};

pub const SIGNATURE: &[u8; 8] = b"EFI PART";
pub const REVISION: u32 = 0x0001_0000;
pub const HEADER_SIZE: usize = 92;
pub const ENTRY_COUNT: usize = 128;
pub const ENTRY_SIZE: usize = 128;
/// Name capacity in UTF-16 code units
pub const NAME_UNITS: usize = 36;

/// Sector sizes probed, in order.
pub const SECTOR_SIZES: [u64; 2] = [512, 4096];

const HEADER_CRC_OFFSET: usize = 16;
const NAME_OFFSET: usize = 56;

/// One slot of the entry array. A zero type marks the slot unused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GptEntry {
    pub type_guid: Guid,
    pub id: Guid,
    pub first_lba: u64,
    pub last_lba: u64,
    pub attributes: u64,
    pub name: String,
}

impl GptEntry {
    pub fn is_empty(&self) -> bool {
        self.type_guid.is_empty()
    }

    /// Entry covering the byte range of `partition`.
    pub fn from_partition(partition: &Partition, sector_size: u64) -> Self {
        Self {
            type_guid: partition.type_guid,
            id: partition.id,
            first_lba: partition.start / sector_size,
            last_lba: partition.last / sector_size,
            attributes: 0,
            name: stored_name(&partition.name),
        }
    }

    /// Whether both entries occupy the same bytes in the entry array.
    pub fn same_on_disk(&self, other: &Self) -> bool {
        self.encode() == other.encode()
    }

    fn decode(raw: &[u8]) -> Self {
        let units: Vec<u16> = raw[NAME_OFFSET..ENTRY_SIZE]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|unit| *unit != 0)
            .collect();

        Self {
            type_guid: guid_at(raw, 0),
            id: guid_at(raw, 16),
            first_lba: le_u64(raw, 32),
            last_lba: le_u64(raw, 40),
            attributes: le_u64(raw, 48),
            name: String::from_utf16_lossy(&units),
        }
    }

    fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut raw = [0u8; ENTRY_SIZE];
        if self.is_empty() {
            return raw;
        }
        raw[0..16].copy_from_slice(self.type_guid.as_bytes());
        raw[16..32].copy_from_slice(self.id.as_bytes());
        raw[32..40].copy_from_slice(&self.first_lba.to_le_bytes());
        raw[40..48].copy_from_slice(&self.last_lba.to_le_bytes());
        raw[48..56].copy_from_slice(&self.attributes.to_le_bytes());
        for (index, unit) in self.name.encode_utf16().take(NAME_UNITS).enumerate() {
            let offset = NAME_OFFSET + index * 2;
            raw[offset..offset + 2].copy_from_slice(&unit.to_le_bytes());
        }
        raw
    }
}

/// `name` as it reads back from an entry: at most [`NAME_UNITS`] UTF-16 units,
/// cut at the first NUL. A surrogate pair split by the cut decodes to U+FFFD.
pub fn stored_name(name: &str) -> String {
    let units: Vec<u16> = name
        .encode_utf16()
        .take(NAME_UNITS)
        .take_while(|unit| *unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

fn guid_at(raw: &[u8], offset: usize) -> Guid {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&raw[offset..offset + 16]);
    Guid::from_bytes(bytes)
}

/// Sector positions of a GPT sized for one disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GptLayout {
    pub sector_size: u64,
    pub last_lba: u64,
    pub array_sectors: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
}

impl GptLayout {
    pub fn new(path: &Path, disk_size: u64, sector_size: u64) -> Result<Self> {
        let invalid = |reason: String| SysError::InvalidGeometry {
            path: path.to_path_buf(),
            reason,
        };

        if sector_size == 0 || !sector_size.is_power_of_two() {
            return Err(invalid(format!("sector size {sector_size} is not a power of two")));
        }
        if disk_size % sector_size != 0 {
            return Err(invalid(format!(
                "size {disk_size} is not a multiple of the {sector_size}-byte sector size"
            )));
        }

        let array_sectors = ((ENTRY_COUNT * ENTRY_SIZE) as u64).div_ceil(sector_size);
        let sectors = disk_size / sector_size;
        // MBR, both headers, both arrays and at least one usable sector.
        if sectors < 2 * array_sectors + 4 {
            return Err(invalid(format!("{disk_size} bytes is too small for a GPT")));
        }

        let last_lba = sectors - 1;
        Ok(Self {
            sector_size,
            last_lba,
            array_sectors,
            first_usable_lba: 2 + array_sectors,
            last_usable_lba: last_lba - array_sectors - 1,
        })
    }

    pub fn backup_array_lba(&self) -> u64 {
        self.last_lba - self.array_sectors
    }
}

/// Decoded header fields, minus the constant signature/revision/size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GptHeader {
    my_lba: u64,
    alternate_lba: u64,
    first_usable_lba: u64,
    last_usable_lba: u64,
    disk_guid: Guid,
    entries_lba: u64,
    entry_count: u32,
    entry_size: u32,
    entries_crc: u32,
}

impl GptHeader {
    /// Parse and check a header sector. `None` if it is not a valid header.
    fn decode(sector: &[u8]) -> Option<Self> {
        if &sector[0..8] != SIGNATURE || le_u32(sector, 8) != REVISION {
            return None;
        }
        let size = le_u32(sector, 12) as usize;
        if size < HEADER_SIZE || size > sector.len() {
            return None;
        }

        let mut raw = sector[..size].to_vec();
        raw[HEADER_CRC_OFFSET..HEADER_CRC_OFFSET + 4].fill(0);
        if crc32fast::hash(&raw) != le_u32(sector, HEADER_CRC_OFFSET) {
            return None;
        }

        Some(Self {
            my_lba: le_u64(sector, 24),
            alternate_lba: le_u64(sector, 32),
            first_usable_lba: le_u64(sector, 40),
            last_usable_lba: le_u64(sector, 48),
            disk_guid: guid_at(sector, 56),
            entries_lba: le_u64(sector, 72),
            entry_count: le_u32(sector, 80),
            entry_size: le_u32(sector, 84),
            entries_crc: le_u32(sector, 88),
        })
    }

    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut raw = [0u8; HEADER_SIZE];
        raw[0..8].copy_from_slice(SIGNATURE);
        raw[8..12].copy_from_slice(&REVISION.to_le_bytes());
        raw[12..16].copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        raw[24..32].copy_from_slice(&self.my_lba.to_le_bytes());
        raw[32..40].copy_from_slice(&self.alternate_lba.to_le_bytes());
        raw[40..48].copy_from_slice(&self.first_usable_lba.to_le_bytes());
        raw[48..56].copy_from_slice(&self.last_usable_lba.to_le_bytes());
        raw[56..72].copy_from_slice(self.disk_guid.as_bytes());
        raw[72..80].copy_from_slice(&self.entries_lba.to_le_bytes());
        raw[80..84].copy_from_slice(&self.entry_count.to_le_bytes());
        raw[84..88].copy_from_slice(&self.entry_size.to_le_bytes());
        raw[88..92].copy_from_slice(&self.entries_crc.to_le_bytes());
        let crc = crc32fast::hash(&raw);
        raw[HEADER_CRC_OFFSET..HEADER_CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        raw
    }
}

/// A GPT as read from, or about to be written to, a disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptTable {
    pub sector_size: u64,
    pub disk_guid: Guid,
    /// Always [`ENTRY_COUNT`] slots; slot `n - 1` holds partition `n`.
    pub entries: Vec<GptEntry>,
}

impl GptTable {
    /// Empty table with a fresh disk GUID.
    pub fn new(sector_size: u64) -> Self {
        Self {
            sector_size,
            disk_guid: Guid::new_v4(),
            entries: vec![GptEntry::default(); ENTRY_COUNT],
        }
    }

    /// Find a GPT at any supported sector size.
    pub fn probe(file: &File, path: &Path) -> Result<Self> {
        for sector_size in SECTOR_SIZES {
            match Self::read(file, path, sector_size) {
                Err(SysError::NoPartitionTable) => continue,
                other => return other,
            }
        }
        Err(SysError::NoPartitionTable)
    }

    /// Read the primary GPT assuming `sector_size`-byte sectors.
    pub fn read(file: &File, path: &Path, sector_size: u64) -> Result<Self> {
        let sector = read_at(file, path, sector_size, sector_size as usize)?;
        let header = GptHeader::decode(&sector).ok_or(SysError::NoPartitionTable)?;
        if header.my_lba != 1 {
            return Err(SysError::NoPartitionTable);
        }

        let count = header.entry_count as usize;
        if header.entry_size as usize != ENTRY_SIZE || count == 0 || count > ENTRY_COUNT {
            return Err(SysError::InvalidGeometry {
                path: path.to_path_buf(),
                reason: format!(
                    "unsupported GPT entry array of {count} entries of {} bytes",
                    header.entry_size
                ),
            });
        }

        let array = read_at(
            file,
            path,
            header.entries_lba * sector_size,
            count * ENTRY_SIZE,
        )?;
        if crc32fast::hash(&array) != header.entries_crc {
            debug!("{}: GPT entry array checksum mismatch", path.display());
            return Err(SysError::NoPartitionTable);
        }

        let mut entries: Vec<GptEntry> = array.chunks_exact(ENTRY_SIZE).map(GptEntry::decode).collect();
        entries.resize(ENTRY_COUNT, GptEntry::default());

        debug!(
            "{}: GPT with {}-byte sectors, usable LBAs {}..={}",
            path.display(),
            sector_size,
            header.first_usable_lba,
            header.last_usable_lba
        );

        Ok(Self {
            sector_size,
            disk_guid: header.disk_guid,
            entries,
        })
    }

    /// Used slots as byte-addressed partitions.
    pub fn partitions(&self) -> BTreeMap<u32, Partition> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_empty())
            .map(|(index, entry)| {
                let number = index as u32 + 1;
                let partition = Partition {
                    number,
                    start: entry.first_lba * self.sector_size,
                    last: (entry.last_lba + 1) * self.sector_size - 1,
                    type_guid: entry.type_guid,
                    id: entry.id,
                    name: entry.name.clone(),
                };
                (number, partition)
            })
            .collect()
    }

    /// Give every used entry without an id a fresh one.
    pub fn assign_missing_ids(&mut self) {
        for entry in self.entries.iter_mut() {
            if !entry.is_empty() && entry.id.is_empty() {
                entry.id = Guid::new_v4();
            }
        }
    }

    /// Write the protective MBR, then the primary and secondary GPT, laid out
    /// for a disk of `disk_size` bytes.
    pub fn write(&mut self, file: &File, path: &Path, disk_size: u64) -> Result<()> {
        let layout = GptLayout::new(path, disk_size, self.sector_size)?;
        self.assign_missing_ids();

        let mut array = vec![0u8; (layout.array_sectors * layout.sector_size) as usize];
        for (index, entry) in self.entries.iter().take(ENTRY_COUNT).enumerate() {
            let offset = index * ENTRY_SIZE;
            array[offset..offset + ENTRY_SIZE].copy_from_slice(&entry.encode());
        }
        let entries_crc = crc32fast::hash(&array[..ENTRY_COUNT * ENTRY_SIZE]);

        let primary = GptHeader {
            my_lba: 1,
            alternate_lba: layout.last_lba,
            first_usable_lba: layout.first_usable_lba,
            last_usable_lba: layout.last_usable_lba,
            disk_guid: self.disk_guid,
            entries_lba: 2,
            entry_count: ENTRY_COUNT as u32,
            entry_size: ENTRY_SIZE as u32,
            entries_crc,
        };
        let backup = GptHeader {
            my_lba: layout.last_lba,
            alternate_lba: 1,
            entries_lba: layout.backup_array_lba(),
            ..primary
        };

        let ssz = layout.sector_size;
        mbr::write_protective(file, path, layout.last_lba + 1)?;
        write_at(file, path, 2 * ssz, &array)?;
        write_at(file, path, ssz, &header_sector(&primary, ssz))?;
        write_at(file, path, layout.backup_array_lba() * ssz, &array)?;
        write_at(file, path, layout.last_lba * ssz, &header_sector(&backup, ssz))?;

        debug!(
            "{}: wrote GPT, {} used entries",
            path.display(),
            self.entries.iter().filter(|entry| !entry.is_empty()).count()
        );
        Ok(())
    }
}

fn header_sector(header: &GptHeader, sector_size: u64) -> Vec<u8> {
    let mut sector = vec![0u8; sector_size as usize];
    sector[..HEADER_SIZE].copy_from_slice(&header.encode());
    sector
}
