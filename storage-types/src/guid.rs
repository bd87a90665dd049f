// SPDX-License-Identifier: GPL-3.0-only

//! GUIDs as stored in GPT headers and partition entries
//!
//! The on-disk representation is the EFI mixed-endian layout: the first three
//! groups of the textual form are stored little-endian, the last two big-endian.
//! [`Guid`] always holds the on-disk bytes, so it can be copied straight into a
//! partition entry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// Error returned when a string is not a hyphenated 8-4-4-4-12 GUID.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid GUID '{0}'")]
pub struct GuidParseError(pub String);

/// A 16-byte GUID in on-disk (mixed-endian) byte order.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid([u8; 16]);

impl Guid {
    /// The all-zero GUID. Marks an unused GPT entry.
    pub const EMPTY: Guid = Guid([0; 16]);

    /// Wrap raw on-disk bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Build a GUID from the groups of its textual form,
    /// e.g. `0FC63DAF-8483-4772-8E79-3D69D8477DE4` is
    /// `from_fields(0x0FC63DAF, 0x8483, 0x4772, [0x8E, 0x79, 0x3D, 0x69, 0xD8, 0x47, 0x7D, 0xE4])`.
    pub const fn from_fields(d1: u32, d2: u16, d3: u16, d4: [u8; 8]) -> Self {
        let a = d1.to_le_bytes();
        let b = d2.to_le_bytes();
        let c = d3.to_le_bytes();
        Self([
            a[0], a[1], a[2], a[3], b[0], b[1], c[0], c[1], d4[0], d4[1], d4[2], d4[3], d4[4],
            d4[5], d4[6], d4[7],
        ])
    }

    /// Generate a random version 4 GUID.
    ///
    /// Byte 6 carries the version nibble and byte 8 the `10` variant bits.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    /// A single MBR partition type byte widened to 16 bytes (byte at offset 15).
    pub const fn from_mbr_type(kind: u8) -> Self {
        let mut bytes = [0u8; 16];
        bytes[15] = kind;
        Self(bytes)
    }

    /// The MBR type byte if this GUID is a widened MBR type.
    pub fn mbr_type(&self) -> Option<u8> {
        if self.0[..15].iter().all(|b| *b == 0) && self.0[15] != 0 {
            Some(self.0[15])
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0; 16]
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; 16] {
        self.0
    }

    /// Lowercase form, as used by `/dev/disk/by-partuuid`.
    pub fn to_lowercase_string(&self) -> String {
        self.to_string().to_ascii_lowercase()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buffer = Uuid::encode_buffer();
        let text = Uuid::from_bytes_le(self.0)
            .hyphenated()
            .encode_upper(&mut buffer);
        f.write_str(text)
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({self})")
    }
}

impl FromStr for Guid {
    type Err = GuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Only the hyphenated form; uuid also accepts braced/urn/simple.
        if s.len() != 36 {
            return Err(GuidParseError(s.to_string()));
        }
        let uuid = Uuid::try_parse(s).map_err(|_| GuidParseError(s.to_string()))?;
        Ok(Self(uuid.to_bytes_le()))
    }
}

impl Serialize for Guid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Guid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
