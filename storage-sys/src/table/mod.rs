// SPDX-License-Identifier: GPL-3.0-only

//! On-disk partition table codecs
//!
//! Both codecs work on a plain [`File`] with positional reads and writes, so
//! the same code serves block devices and image files. Locking and syncing are
//! the caller's business.

pub mod gpt;
pub mod mbr;

use std::fs::File;
use std::io::{ErrorKind, Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::Path;

use storage_types::MIB;
use tracing::trace;

use crate::error::{IoContext, Result, SysError};

/// Size of the device or file behind `file`.
///
/// Block devices report a zero length in their metadata, seeking to the end
/// works for both.
pub fn device_size(file: &File, path: &Path) -> Result<u64> {
    let mut handle = file;
    handle.seek(SeekFrom::End(0)).at(path)
}

/// Read `len` bytes at `offset`. Running off the end of the device means there
/// is no table there.
pub(crate) fn read_at(file: &File, path: &Path, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    match file.read_exact_at(&mut buf, offset) {
        Ok(()) => Ok(buf),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(SysError::NoPartitionTable),
        Err(e) => Err(SysError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

pub(crate) fn write_at(file: &File, path: &Path, offset: u64, buf: &[u8]) -> Result<()> {
    trace!("{}: writing {} bytes at {offset}", path.display(), buf.len());
    file.write_all_at(buf, offset).at(path)
}

/// Overwrite `[start, start + len)` with zeros, one MiB at a time.
pub(crate) fn zero_range(file: &File, path: &Path, start: u64, len: u64) -> Result<()> {
    let chunk = vec![0u8; MIB as usize];
    let end = start.saturating_add(len);
    let mut offset = start;
    while offset < end {
        let n = (end - offset).min(MIB) as usize;
        file.write_all_at(&chunk[..n], offset).at(path)?;
        offset += n as u64;
    }
    Ok(())
}

pub(crate) fn le_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

pub(crate) fn le_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}
