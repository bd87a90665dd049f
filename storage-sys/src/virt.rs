// SPDX-License-Identifier: GPL-3.0-only

//! Virtualization detection

use std::fmt;
use std::sync::OnceLock;

use tracing::{debug, warn};

use crate::cmd;
use crate::config::SysConfig;
use crate::error::{Result, SysError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Virtualization {
    None,
    Kvm,
    Other(String),
}

impl Virtualization {
    /// Interpret the stdout of `systemd-detect-virt --vm`.
    pub fn from_detect_output(stdout: &str) -> Self {
        match stdout.trim() {
            "" | "none" => Self::None,
            "kvm" => Self::Kvm,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Virtualization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Kvm => f.write_str("kvm"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// Run `systemd-detect-virt --vm`.
///
/// Exit status 1 means "none" and is not a failure.
pub fn detect(config: &SysConfig) -> Result<Virtualization> {
    let argv = [config.tools.systemd_detect_virt.as_str(), "--vm"];
    let output = cmd::run(&argv, None)?;
    match output.status {
        Some(0) | Some(1) => Ok(Virtualization::from_detect_output(&output.stdout)),
        code => Err(SysError::ChildProcess {
            argv: argv.iter().map(|arg| arg.to_string()).collect(),
            stdout: output.stdout,
            stderr: output.stderr,
            code,
        }),
    }
}

/// Lazily detected virtualization type, computed at most once.
#[derive(Debug, Default)]
pub struct VirtCache {
    value: OnceLock<Virtualization>,
}

impl VirtCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache pre-filled with a known value.
    pub fn with(value: Virtualization) -> Self {
        let cache = Self::default();
        let _ = cache.value.set(value);
        cache
    }

    pub fn get(&self, config: &SysConfig) -> &Virtualization {
        self.value.get_or_init(|| match detect(config) {
            Ok(virt) => {
                debug!("virtualization: {virt}");
                virt
            }
            Err(e) => {
                warn!("virtualization detection failed, assuming bare metal: {e}");
                Virtualization::None
            }
        })
    }
}
