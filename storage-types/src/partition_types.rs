// SPDX-License-Identifier: GPL-3.0-only

//! Well-known partition type GUIDs
//!
//! GPT types are GUIDs; MBR types are a single byte widened to a [`Guid`] with the
//! byte at offset 15. The catalog links the two so a caller can ask for
//! `LINUX_LVM` on either table kind.

use serde::Serialize;

use crate::Guid;

pub const EMPTY: Guid = Guid::EMPTY;

pub const LINUX_FS: Guid = Guid::from_fields(
    0x0FC63DAF,
    0x8483,
    0x4772,
    [0x8E, 0x79, 0x3D, 0x69, 0xD8, 0x47, 0x7D, 0xE4],
);

pub const LINUX_LVM: Guid = Guid::from_fields(
    0xE6D6D379,
    0xF507,
    0x44C2,
    [0xA2, 0x3C, 0x23, 0x8F, 0x2A, 0x3D, 0xF9, 0x28],
);

pub const LINUX_RAID: Guid = Guid::from_fields(
    0xA19D880F,
    0x05FC,
    0x4D3B,
    [0xA0, 0x06, 0x74, 0x3F, 0x0F, 0x84, 0x91, 0x1E],
);

pub const LINUX_ROOT_X86: Guid = Guid::from_fields(
    0x44479540,
    0xF297,
    0x41B2,
    [0x9A, 0xF7, 0xD1, 0x31, 0xD5, 0xF0, 0x45, 0x8A],
);

pub const LINUX_ROOT_X86_64: Guid = Guid::from_fields(
    0x4F68BCE3,
    0xE8CD,
    0x4DB1,
    [0x96, 0xE7, 0xFB, 0xCA, 0xF9, 0x84, 0xB7, 0x09],
);

pub const LINUX_SWAP: Guid = Guid::from_fields(
    0x0657FD6D,
    0xA4AB,
    0x43C4,
    [0x84, 0xE5, 0x09, 0x33, 0xC8, 0x4B, 0x4F, 0x4F],
);

pub const LINUX_HOME: Guid = Guid::from_fields(
    0x933AC7E1,
    0x2EB4,
    0x4F13,
    [0xB8, 0x44, 0x0E, 0x14, 0xE2, 0xAE, 0xF9, 0x15],
);

pub const EFI_SYSTEM: Guid = Guid::from_fields(
    0xC12A7328,
    0xF81F,
    0x11D2,
    [0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E, 0xC9, 0x3B],
);

pub const BIOS_BOOT: Guid = Guid::from_fields(
    0x21686148,
    0x6449,
    0x6E6F,
    [0x74, 0x4E, 0x65, 0x65, 0x64, 0x45, 0x46, 0x49],
);

pub const MICROSOFT_BASIC_DATA: Guid = Guid::from_fields(
    0xEBD0A0A2,
    0xB9E5,
    0x4433,
    [0x87, 0xC0, 0x68, 0xB6, 0xB7, 0x26, 0x99, 0xC7],
);

/// MBR type byte of the GPT protective entry.
pub const MBR_PROTECTIVE: u8 = 0xEE;

/// One entry of the well-known type catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionTypeInfo {
    /// Short name accepted on the command line (e.g. `linux-lvm`)
    pub name: &'static str,
    /// Human-readable description
    pub description: &'static str,
    pub guid: Guid,
    /// Equivalent MBR type byte, if MBR has one
    pub mbr_type: Option<u8>,
}

pub static PARTITION_TYPES: &[PartitionTypeInfo] = &[
    PartitionTypeInfo {
        name: "linux-fs",
        description: "Linux filesystem",
        guid: LINUX_FS,
        mbr_type: Some(0x83),
    },
    PartitionTypeInfo {
        name: "linux-lvm",
        description: "Linux LVM",
        guid: LINUX_LVM,
        mbr_type: Some(0x8E),
    },
    PartitionTypeInfo {
        name: "linux-raid",
        description: "Linux RAID",
        guid: LINUX_RAID,
        mbr_type: Some(0xFD),
    },
    PartitionTypeInfo {
        name: "linux-root-x86",
        description: "Linux root (x86)",
        guid: LINUX_ROOT_X86,
        mbr_type: Some(0x83),
    },
    PartitionTypeInfo {
        name: "linux-root-x86-64",
        description: "Linux root (x86-64)",
        guid: LINUX_ROOT_X86_64,
        mbr_type: Some(0x83),
    },
    PartitionTypeInfo {
        name: "linux-swap",
        description: "Linux swap",
        guid: LINUX_SWAP,
        mbr_type: Some(0x82),
    },
    PartitionTypeInfo {
        name: "linux-home",
        description: "Linux /home",
        guid: LINUX_HOME,
        mbr_type: Some(0x83),
    },
    PartitionTypeInfo {
        name: "efi",
        description: "EFI System",
        guid: EFI_SYSTEM,
        mbr_type: Some(0xEF),
    },
    PartitionTypeInfo {
        name: "bios-boot",
        description: "BIOS boot",
        guid: BIOS_BOOT,
        mbr_type: None,
    },
    PartitionTypeInfo {
        name: "basic-data",
        description: "Microsoft basic data",
        guid: MICROSOFT_BASIC_DATA,
        mbr_type: Some(0x07),
    },
];

pub fn by_name(name: &str) -> Option<&'static PartitionTypeInfo> {
    PARTITION_TYPES
        .iter()
        .find(|info| info.name.eq_ignore_ascii_case(name))
}

pub fn by_guid(guid: &Guid) -> Option<&'static PartitionTypeInfo> {
    PARTITION_TYPES.iter().find(|info| info.guid == *guid)
}

/// The MBR byte to store for a requested type.
///
/// A widened MBR type is passed through; a catalogued GPT type is mapped to its
/// MBR equivalent. Anything else has no MBR representation.
pub fn mbr_type_for(guid: &Guid) -> Option<u8> {
    if let Some(kind) = guid.mbr_type() {
        return Some(kind);
    }
    by_guid(guid).and_then(|info| info.mbr_type)
}

/// Display name for a type GUID, falling back to the GUID itself.
pub fn describe(guid: &Guid) -> String {
    if let Some(info) = by_guid(guid) {
        return info.description.to_string();
    }
    match guid.mbr_type() {
        Some(kind) => format!("MBR type 0x{kind:02X}"),
        None => guid.to_string(),
    }
}
