// SPDX-License-Identifier: GPL-3.0-only

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("{}: not a block device or regular file", path.display())]
    PathResolution { path: PathBuf },

    #[error("{0}: not a block device")]
    NotABlockDevice(String),

    #[error("{}: cannot open: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error(
        "{}: disk has {disk_sector_size}-byte sectors but its GPT uses {table_sector_size}-byte sectors",
        path.display()
    )]
    GeometryMismatch {
        path: PathBuf,
        disk_sector_size: u64,
        table_sector_size: u64,
    },

    #[error("{}: invalid geometry: {reason}", path.display())]
    InvalidGeometry { path: PathBuf, reason: String },

    #[error("no partition table found")]
    NoPartitionTable,

    #[error("{}: partition {number}: {reason}", path.display())]
    InvalidPartition {
        path: PathBuf,
        number: u32,
        reason: String,
    },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("{}: partition table read back does not match what was written", path.display())]
    TableVerification { path: PathBuf },

    #[error("command `{}` exited with {}: {}", argv.join(" "), exit_label(*code), stderr.trim())]
    ChildProcess {
        argv: Vec<String>,
        stdout: String,
        stderr: String,
        code: Option<i32>,
    },

    #[error("failed to run {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("invalid udev line: {0}")]
    UdevParse(String),

    #[error("unexpected {tool} output: {reason}")]
    ToolOutput { tool: String, reason: String },

    #[error("{}: invalid configuration: {reason}", path.display())]
    Config { path: PathBuf, reason: String },

    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

impl SysError {
    pub fn invalid_partition(path: &Path, number: u32, reason: impl Into<String>) -> Self {
        Self::InvalidPartition {
            path: path.to_path_buf(),
            number,
            reason: reason.into(),
        }
    }
}

/// Attach the device path to I/O errors
pub trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::result::Result<T, io::Error> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|source| SysError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
