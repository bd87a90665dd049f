// SPDX-License-Identifier: GPL-3.0-only

//! Host paths and external tool names
//!
//! Defaults describe a live Linux system. A TOML file may override any subset,
//! which is how tests point the discovery code at a fake sysfs tree.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SysError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub udevadm: String,
    pub addpart: String,
    pub delpart: String,
    pub systemd_detect_virt: String,
    pub lvm: String,
    pub cryptsetup: String,
    pub storcli: String,
    pub storcli2: String,
    pub arcconf: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            udevadm: "udevadm".to_string(),
            addpart: "addpart".to_string(),
            delpart: "delpart".to_string(),
            systemd_detect_virt: "systemd-detect-virt".to_string(),
            lvm: "lvm".to_string(),
            cryptsetup: "cryptsetup".to_string(),
            storcli: "storcli".to_string(),
            storcli2: "storcli2".to_string(),
            arcconf: "arcconf".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SysConfig {
    /// Mount point of sysfs
    pub sysfs_root: PathBuf,
    /// Directory holding device nodes
    pub dev_root: PathBuf,
    pub tools: ToolPaths,
    /// Passed to `udevadm settle --timeout`
    pub settle_timeout_secs: u64,
    /// How long to wait for `/dev/disk/by-partuuid/<uuid>` after a GPT change
    pub partuuid_wait_ms: u64,
}

impl Default for SysConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
            tools: ToolPaths::default(),
            settle_timeout_secs: 120,
            partuuid_wait_ms: 3000,
        }
    }
}

impl SysConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| SysError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|reason| SysError::Config {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn from_toml(raw: &str) -> std::result::Result<Self, String> {
        toml::from_str(raw).map_err(|e| e.to_string())
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.settle_timeout_secs)
    }

    pub fn partuuid_wait(&self) -> Duration {
        Duration::from_millis(self.partuuid_wait_ms)
    }
}
