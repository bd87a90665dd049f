// SPDX-License-Identifier: GPL-3.0-only

//! Logical volume management on top of partitions

pub mod lvm_tools;

pub use lvm_tools::LvmTools;
