// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for host storage management
//!
//! This crate defines the single source of truth for the storage domain types.
//! They are produced by `storage-sys` scans and consumed by its engine, its
//! collaborators and the command-line front-end:
//!
//! - `Disk` → scanned disk with geometry, classification and partition map
//! - `Partition` / `FreeSpace` → used and unused byte extents of a disk
//! - `Guid` → GPT identifiers in on-disk byte order
//! - LVM and RAID aggregates for the collaborator layers

pub mod common;
pub mod disk;
pub mod guid;
pub mod lvm;
pub mod partition_types;
pub mod raid;

pub use common::{GPT_TAIL_SECTORS, MIB, bytes_to_pretty, ceil_to, find_range_gaps, floor_to};
pub use disk::{AttachKind, Disk, DiskKind, FreeSpace, Partition, TableKind, UdevInfo};
pub use guid::{Guid, GuidParseError};
pub use lvm::{LogicalVolumeInfo, LvmReport, PhysicalVolumeInfo, VolumeGroupInfo};
pub use partition_types::PartitionTypeInfo;
pub use raid::{Controller, ControllerFamily, DriveGroup, PhysicalDrive, VirtualDrive};
