// SPDX-License-Identifier: GPL-3.0-only

//! LVM and LUKS through the `lvm` and `cryptsetup` command-line tools

use storage_types::{LogicalVolumeInfo, LvmReport, PhysicalVolumeInfo, VolumeGroupInfo};
use tracing::{debug, info};

use crate::cmd;
use crate::config::SysConfig;
use crate::error::{Result, SysError};

const REPORT_ARGS: [&str; 6] = [
    "--noheadings",
    "--units",
    "b",
    "--nosuffix",
    "--separator",
    "\t",
];

fn parse_tabbed_line(line: &str) -> Vec<String> {
    line.split('\t')
        .map(|part| part.trim().to_string())
        .collect()
}

fn rows(output: &str, columns: usize) -> impl Iterator<Item = Vec<String>> + '_ {
    // Only leading padding is dropped; a trailing tab ends an empty last column.
    output
        .lines()
        .map(str::trim_start)
        .filter(|line| !line.trim().is_empty())
        .map(parse_tabbed_line)
        .filter(move |cols| cols.len() >= columns)
}

fn number<T: std::str::FromStr>(tool: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| SysError::ToolOutput {
        tool: tool.to_string(),
        reason: format!("expected a number, got {value:?}"),
    })
}

fn parse_vgs(output: &str) -> Result<Vec<VolumeGroupInfo>> {
    rows(output, 6)
        .map(|cols| {
            Ok(VolumeGroupInfo {
                name: cols[0].clone(),
                uuid: cols[1].clone(),
                size: number("vgs", &cols[2])?,
                free: number("vgs", &cols[3])?,
                pv_count: number("vgs", &cols[4])?,
                lv_count: number("vgs", &cols[5])?,
            })
        })
        .collect()
}

fn parse_lvs(output: &str) -> Result<Vec<LogicalVolumeInfo>> {
    rows(output, 6)
        .map(|cols| {
            Ok(LogicalVolumeInfo {
                vg_name: cols[0].clone(),
                name: cols[1].clone(),
                uuid: cols[2].clone(),
                device_path: cols[3].clone(),
                size: number("lvs", &cols[4])?,
                active: cols[5].eq_ignore_ascii_case("active") || cols[5] == "y",
            })
        })
        .collect()
}

fn parse_pvs(output: &str) -> Result<Vec<PhysicalVolumeInfo>> {
    rows(output, 4)
        .map(|cols| {
            let vg_name = if cols[1].is_empty() {
                None
            } else {
                Some(cols[1].clone())
            };
            Ok(PhysicalVolumeInfo {
                device: cols[0].clone(),
                vg_name,
                size: number("pvs", &cols[2])?,
                free: number("pvs", &cols[3])?,
            })
        })
        .collect()
}

fn report_from_rows(
    vgs: Vec<VolumeGroupInfo>,
    lvs: Vec<LogicalVolumeInfo>,
    pvs: Vec<PhysicalVolumeInfo>,
) -> LvmReport {
    LvmReport {
        physical_volumes: pvs.into_iter().map(|pv| (pv.device.clone(), pv)).collect(),
        volume_groups: vgs.into_iter().map(|vg| (vg.name.clone(), vg)).collect(),
        logical_volumes: lvs.into_iter().map(|lv| (lv.full_name(), lv)).collect(),
    }
}

/// Entry point for LVM operations, bound to the configured tool paths.
#[derive(Debug, Clone, Copy)]
pub struct LvmTools<'a> {
    config: &'a SysConfig,
}

impl<'a> LvmTools<'a> {
    pub fn new(config: &'a SysConfig) -> Self {
        Self { config }
    }

    /// Whether the `lvm` binary can be found.
    pub fn available(&self) -> bool {
        cfg!(feature = "lvm-tools") && which::which(&self.config.tools.lvm).is_ok()
    }

    fn lvm_report(&self, command: &str, fields: &str) -> Result<String> {
        let mut argv = vec![self.config.tools.lvm.as_str(), command, "-o", fields];
        argv.extend(REPORT_ARGS);
        cmd::output(&argv)
    }

    /// Current PVs, VGs and LVs. Empty when LVM is not installed.
    pub fn report(&self) -> Result<LvmReport> {
        if !self.available() {
            debug!("lvm tools not available, reporting nothing");
            return Ok(LvmReport::default());
        }

        let vgs = self.lvm_report("vgs", "vg_name,vg_uuid,vg_size,vg_free,pv_count,lv_count")?;
        let lvs = self.lvm_report("lvs", "vg_name,lv_name,lv_uuid,lv_path,lv_size,lv_active")?;
        let pvs = self.lvm_report("pvs", "pv_name,vg_name,pv_size,pv_free")?;

        Ok(report_from_rows(
            parse_vgs(&vgs)?,
            parse_lvs(&lvs)?,
            parse_pvs(&pvs)?,
        ))
    }

    fn lvm(&self, args: &[&str]) -> Result<()> {
        let mut argv = vec![self.config.tools.lvm.as_str()];
        argv.extend_from_slice(args);
        cmd::run_and_settle(self.config, &argv, None)?;
        Ok(())
    }

    pub fn create_physical_volume(&self, device: &str) -> Result<()> {
        self.lvm(&["pvcreate", "--yes", device])?;
        info!("created physical volume {device}");
        Ok(())
    }

    pub fn create_volume_group(&self, name: &str, devices: &[&str]) -> Result<()> {
        if devices.is_empty() {
            return Err(SysError::UnsupportedOperation(format!(
                "volume group {name} needs at least one physical volume"
            )));
        }
        let mut args = vec!["vgcreate", "--yes", name];
        args.extend_from_slice(devices);
        self.lvm(&args)?;
        info!("created volume group {name}");
        Ok(())
    }

    /// Create `vg_name/name` of `size` bytes and return its device path.
    pub fn create_logical_volume(&self, vg_name: &str, name: &str, size: u64) -> Result<String> {
        let size = format!("{size}b");
        self.lvm(&["lvcreate", "--yes", "-n", name, "-L", &size, vg_name])?;
        info!("created logical volume {vg_name}/{name}");
        Ok(format!("/dev/{vg_name}/{name}"))
    }

    /// Create a logical volume, format it as LUKS with `key` and open it.
    ///
    /// Returns the `/dev/mapper` path of the opened container. The key only ever
    /// travels over stdin.
    pub fn create_encrypted_logical_volume(
        &self,
        vg_name: &str,
        name: &str,
        size: u64,
        key: &str,
    ) -> Result<String> {
        let device = self.create_logical_volume(vg_name, name, size)?;
        let crypt_name = format!("{vg_name}-{name}_crypt");
        let cryptsetup = self.config.tools.cryptsetup.as_str();

        cmd::run_and_settle(
            self.config,
            &[cryptsetup, "luksFormat", "--batch-mode", "--key-file=-", &device],
            Some(key),
        )?;
        cmd::run_and_settle(
            self.config,
            &[cryptsetup, "open", "--key-file=-", &device, &crypt_name],
            Some(key),
        )?;

        info!("opened encrypted volume {device} as {crypt_name}");
        Ok(format!("/dev/mapper/{crypt_name}"))
    }

    /// Close an opened LUKS container by its device-mapper name.
    pub fn close_encrypted(&self, crypt_name: &str) -> Result<()> {
        cmd::run_and_settle(
            self.config,
            &[self.config.tools.cryptsetup.as_str(), "close", crypt_name],
            None,
        )?;
        info!("closed encrypted volume {crypt_name}");
        Ok(())
    }

    pub fn remove_logical_volume(&self, vg_name: &str, name: &str) -> Result<()> {
        let full_name = format!("{vg_name}/{name}");
        self.lvm(&["lvremove", "--yes", &full_name])?;
        info!("removed logical volume {full_name}");
        Ok(())
    }

    pub fn remove_volume_group(&self, name: &str) -> Result<()> {
        self.lvm(&["vgremove", "--yes", name])?;
        info!("removed volume group {name}");
        Ok(())
    }

    pub fn remove_physical_volume(&self, device: &str) -> Result<()> {
        self.lvm(&["pvremove", "--yes", device])?;
        info!("removed physical volume {device}");
        Ok(())
    }
}
