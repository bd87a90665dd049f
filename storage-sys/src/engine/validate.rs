// SPDX-License-Identifier: GPL-3.0-only

//! Range and number checks run against the scanned snapshot before any write

use storage_types::partition_types;
use storage_types::{Disk, Partition, TableKind};

use crate::error::{Result, SysError};

pub fn check_number(disk: &Disk, number: u32) -> Result<()> {
    let max = disk.table.max_partitions();
    if number == 0 || number > max {
        return Err(SysError::invalid_partition(
            &disk.path,
            number,
            format!(
                "number must be between 1 and {max} on a {} table",
                disk.table.as_str()
            ),
        ));
    }
    Ok(())
}

/// Number limits, bounds and sector alignment of one partition.
pub fn check_range(disk: &Disk, partition: &Partition) -> Result<()> {
    check_number(disk, partition.number)?;
    let invalid = |reason: String| SysError::invalid_partition(&disk.path, partition.number, reason);

    if partition.start > partition.last {
        return Err(invalid(format!(
            "start {} is past the last byte {}",
            partition.start, partition.last
        )));
    }
    if partition.start < disk.usable_start() {
        return Err(invalid(format!(
            "start {} is below the first usable byte {}",
            partition.start,
            disk.usable_start()
        )));
    }
    let usable_end = disk.usable_end();
    if partition.last >= usable_end {
        return Err(invalid(format!(
            "last byte {} is not below the end of the usable area {usable_end}",
            partition.last
        )));
    }

    let ssz = disk.sector_size;
    if partition.start % ssz != 0 || (partition.last + 1) % ssz != 0 {
        return Err(invalid(format!(
            "range {}..={} is not aligned to {ssz}-byte sectors",
            partition.start, partition.last
        )));
    }
    Ok(())
}

/// Everything a creation request must satisfy against the snapshot in `disk`.
pub fn validate_new(disk: &Disk, partitions: &[Partition]) -> Result<()> {
    if disk.table == TableKind::Mbr && disk.sector_size != 512 {
        return Err(SysError::UnsupportedOperation(format!(
            "{}: MBR needs 512-byte sectors, the disk uses {}",
            disk.path.display(),
            disk.sector_size
        )));
    }

    for (index, partition) in partitions.iter().enumerate() {
        check_range(disk, partition)?;
        let invalid = |reason: String| SysError::invalid_partition(&disk.path, partition.number, reason);
        let earlier = &partitions[..index];

        if partition.type_guid.is_empty() {
            return Err(invalid("partition type must not be empty".to_string()));
        }
        if disk.table == TableKind::Mbr
            && partition_types::mbr_type_for(&partition.type_guid).is_none()
        {
            return Err(invalid(format!(
                "type {} has no MBR equivalent",
                partition.type_guid
            )));
        }
        if disk.partitions.contains_key(&partition.number) {
            return Err(invalid("partition already exists".to_string()));
        }
        if earlier.iter().any(|other| other.number == partition.number) {
            return Err(invalid("number requested more than once".to_string()));
        }
        if let Some(existing) = disk.partitions.values().find(|p| p.overlaps(partition)) {
            return Err(invalid(format!("overlaps partition {}", existing.number)));
        }
        if let Some(other) = earlier.iter().find(|p| p.overlaps(partition)) {
            return Err(invalid(format!("overlaps requested partition {}", other.number)));
        }
    }
    Ok(())
}

/// Updates only rewrite metadata of partitions the snapshot knows about.
pub fn validate_update(disk: &Disk, partitions: &[Partition]) -> Result<()> {
    if disk.table != TableKind::Gpt {
        return Err(SysError::UnsupportedOperation(format!(
            "{}: updating partitions needs a GPT, found {}",
            disk.path.display(),
            disk.table.as_str()
        )));
    }

    for (index, partition) in partitions.iter().enumerate() {
        check_number(disk, partition.number)?;
        if !disk.partitions.contains_key(&partition.number) {
            return Err(SysError::invalid_partition(
                &disk.path,
                partition.number,
                "no such partition",
            ));
        }
        if partitions[..index]
            .iter()
            .any(|other| other.number == partition.number)
        {
            return Err(SysError::invalid_partition(
                &disk.path,
                partition.number,
                "number requested more than once",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use storage_types::{Guid, MIB};

    use super::*;

    fn disk(table: TableKind) -> Disk {
        Disk {
            name: "disk.img".to_string(),
            path: PathBuf::from("/tmp/disk.img"),
            size: 200 * MIB,
            sector_size: 512,
            table,
            ..Default::default()
        }
    }

    fn part(number: u32, start: u64, last: u64) -> Partition {
        Partition {
            number,
            start,
            last,
            type_guid: partition_types::LINUX_FS,
            id: Guid::new_v4(),
            name: String::new(),
        }
    }

    fn reason(err: SysError) -> String {
        match err {
            SysError::InvalidPartition { reason, .. } => reason,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn accepts_the_whole_free_space() {
        let disk = disk(TableKind::None);
        let free = disk.free_spaces()[0];
        validate_new(&disk, &[part(1, free.start, free.last)]).expect("valid");
    }

    #[test]
    fn rejects_out_of_range_bounds() {
        let disk = disk(TableKind::Gpt);
        assert!(reason(validate_new(&disk, &[part(1, 1024, 10 * MIB - 1)]).expect_err("start"))
            .contains("below the first usable byte"));
        assert!(reason(validate_new(&disk, &[part(1, MIB, disk.size - 1)]).expect_err("last"))
            .contains("usable area"));
        assert!(reason(validate_new(&disk, &[part(1, 5 * MIB, MIB)]).expect_err("order"))
            .contains("past the last byte"));
    }

    #[test]
    fn rejects_misaligned_ranges() {
        let disk = disk(TableKind::Gpt);
        assert!(reason(validate_new(&disk, &[part(1, MIB + 1, 2 * MIB - 1)]).expect_err("start"))
            .contains("aligned"));
        assert!(reason(validate_new(&disk, &[part(1, MIB, 2 * MIB)]).expect_err("last"))
            .contains("aligned"));
    }

    #[test]
    fn number_limits_follow_the_table() {
        let gpt = disk(TableKind::Gpt);
        validate_new(&gpt, &[part(128, MIB, 2 * MIB - 1)]).expect("128 on gpt");
        assert!(validate_new(&gpt, &[part(129, MIB, 2 * MIB - 1)]).is_err());
        assert!(validate_new(&gpt, &[part(0, MIB, 2 * MIB - 1)]).is_err());

        let mbr = disk(TableKind::Mbr);
        validate_new(&mbr, &[part(4, MIB, 2 * MIB - 1)]).expect("4 on mbr");
        assert!(validate_new(&mbr, &[part(5, MIB, 2 * MIB - 1)]).is_err());
    }

    #[test]
    fn rejects_occupied_numbers_and_overlaps() {
        let mut disk = disk(TableKind::Gpt);
        disk.partitions.insert(1, part(1, MIB, 10 * MIB - 1));

        assert!(reason(validate_new(&disk, &[part(1, 20 * MIB, 21 * MIB - 1)]).expect_err("taken"))
            .contains("already exists"));
        assert!(reason(validate_new(&disk, &[part(2, 5 * MIB, 11 * MIB - 1)]).expect_err("overlap"))
            .contains("overlaps partition 1"));

        let request = [part(2, 20 * MIB, 30 * MIB - 1), part(3, 25 * MIB, 40 * MIB - 1)];
        assert!(reason(validate_new(&disk, &request).expect_err("overlap"))
            .contains("overlaps requested partition 2"));

        let request = [part(2, 20 * MIB, 30 * MIB - 1), part(2, 40 * MIB, 50 * MIB - 1)];
        assert!(reason(validate_new(&disk, &request).expect_err("dup"))
            .contains("more than once"));
    }

    #[test]
    fn mbr_needs_a_mappable_type() {
        let disk = disk(TableKind::Mbr);
        let mut odd = part(1, MIB, 2 * MIB - 1);
        odd.type_guid = Guid::new_v4();
        assert!(validate_new(&disk, &[odd]).is_err());

        let mut lvm = part(1, MIB, 2 * MIB - 1);
        lvm.type_guid = Guid::from_mbr_type(0x8E);
        validate_new(&disk, &[lvm]).expect("widened type");
    }

    #[test]
    fn mbr_limits_usable_end_to_32_bit_sectors() {
        let mut big = disk(TableKind::Mbr);
        big.size = 4 << 40;
        let limit = (1u64 << 32) * 512;
        assert!(validate_new(&big, &[part(1, limit, limit + MIB - 1)]).is_err());
        validate_new(&big, &[part(1, MIB, limit - 2 * MIB - 1)]).expect("below limit");
    }

    #[test]
    fn empty_type_is_rejected() {
        let disk = disk(TableKind::Gpt);
        let mut empty = part(1, MIB, 2 * MIB - 1);
        empty.type_guid = Guid::EMPTY;
        assert!(validate_new(&disk, &[empty]).is_err());
    }

    #[test]
    fn updates_need_gpt_and_existing_numbers() {
        let mbr = disk(TableKind::Mbr);
        assert!(matches!(
            validate_update(&mbr, &[part(1, 0, 0)]),
            Err(SysError::UnsupportedOperation(_))
        ));

        let mut gpt = disk(TableKind::Gpt);
        assert!(validate_update(&gpt, &[part(1, 0, 0)]).is_err());
        gpt.partitions.insert(1, part(1, MIB, 2 * MIB - 1));
        // Bounds are irrelevant, updates never move partitions.
        validate_update(&gpt, &[part(1, 0, 0)]).expect("known number");
    }
}
