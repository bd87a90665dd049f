// SPDX-License-Identifier: GPL-3.0-only

//! Low-level storage operations for Linux hosts
//!
//! This crate talks to the kernel and to block devices directly:
//! - Disk discovery through sysfs, udev and `systemd-detect-virt`
//! - Byte-exact GPT and MBR codecs at 512 and 4096 byte sectors
//! - The partition-table engine with kernel reconciliation
//!   (`addpart`, `delpart`, `udevadm settle`)
//! - LVM/LUKS and hardware RAID collaborators built on the vendor tools
//!
//! Mutating operations require root when they target real block devices.
//! [`ImageSystem`] runs the same engine against image files without privileges.

pub mod classify;
pub mod cmd;
pub mod config;
pub mod engine;
pub mod error;
pub mod logical;
pub mod raid;
pub mod sysfs;
pub mod system;
pub mod table;
pub mod udev;
pub mod virt;

pub use config::{SysConfig, ToolPaths};
pub use error::{Result, SysError};
pub use logical::LvmTools;
pub use raid::{annotate_raid, discover_controllers, RaidClient};
pub use system::{DiskFilter, ImageSystem, LinuxSystem, System};
pub use virt::{VirtCache, Virtualization};
