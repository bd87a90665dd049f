// SPDX-License-Identifier: GPL-3.0-only

//! MegaRAID (`storcli`) and MPI3 (`storcli2`) controllers
//!
//! Both tools share the command grammar and emit JSON when the command ends in
//! `J`. Every reply wraps its payload as
//! `{"Controllers": [{"Command Status": {...}, "Response Data": {...}}]}`.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use storage_types::{Controller, ControllerFamily, DriveGroup, PhysicalDrive, VirtualDrive};

use super::{media_from_vendor, RaidClient};
use crate::cmd;
use crate::config::SysConfig;
use crate::error::{Result, SysError};

pub struct StorcliClient<'a> {
    family: ControllerFamily,
    program: &'a str,
}

impl<'a> StorcliClient<'a> {
    pub fn megaraid(config: &'a SysConfig) -> Self {
        Self {
            family: ControllerFamily::MegaRaid,
            program: &config.tools.storcli,
        }
    }

    pub fn mpi3mr(config: &'a SysConfig) -> Self {
        Self {
            family: ControllerFamily::Mpi3mr,
            program: &config.tools.storcli2,
        }
    }

    fn query(&self, args: &[&str]) -> Result<Value> {
        let mut argv = vec![self.program];
        argv.extend_from_slice(args);
        argv.push("J");
        let stdout = cmd::output(&argv)?;
        response_data(self.program, &stdout)
    }
}

impl RaidClient for StorcliClient<'_> {
    fn family(&self) -> ControllerFamily {
        self.family
    }

    fn available(&self) -> bool {
        cfg!(feature = "raid-tools") && which::which(self.program).is_ok()
    }

    fn controller_ids(&self) -> Result<Vec<u32>> {
        let data = self.query(&["show", "ctrlcount"])?;
        let count = data
            .get("Controller Count")
            .and_then(Value::as_u64)
            .ok_or_else(|| tool_error(self.program, "no controller count"))?;
        Ok((0..count as u32).collect())
    }

    fn controller(&self, id: u32) -> Result<Controller> {
        let ctrl = format!("/c{id}");
        let summary = self.query(&[&ctrl, "show", "all"])?;
        let vall = format!("/c{id}/vall");
        let details = self.query(&[&vall, "show", "all"])?;
        controller_from_json(self.program, id, self.family, &summary, &details)
    }
}

fn tool_error(tool: &str, reason: impl Into<String>) -> SysError {
    SysError::ToolOutput {
        tool: tool.to_string(),
        reason: reason.into(),
    }
}

/// Unwrap the `Response Data` of the first controller in a JSON reply.
pub fn response_data(tool: &str, stdout: &str) -> Result<Value> {
    let reply: Value = serde_json::from_str(stdout).map_err(|e| tool_error(tool, e.to_string()))?;
    let first = reply
        .get("Controllers")
        .and_then(|c| c.get(0))
        .ok_or_else(|| tool_error(tool, "reply has no controllers"))?;

    let status = &first["Command Status"];
    if status.get("Status").and_then(Value::as_str) != Some("Success") {
        let description = status
            .get("Description")
            .or_else(|| status.get("ErrMsg"))
            .map(text)
            .unwrap_or_else(|| "command failed".to_string());
        return Err(tool_error(tool, description));
    }

    Ok(first.get("Response Data").cloned().unwrap_or(Value::Null))
}

/// A JSON scalar as text; the tools mix numbers and strings freely.
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// First of `keys` present in `row`, as text.
fn field(row: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| row.get(*key))
        .map(text)
        .filter(|value| !value.is_empty() && value != "-")
}

/// Array stored under any of `keys` (casing differs between tool versions).
fn list<'v>(data: &'v Value, keys: &[&str]) -> impl Iterator<Item = &'v Map<String, Value>> {
    keys.iter()
        .find_map(|key| data.get(*key).and_then(Value::as_array))
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn physical_drive(row: &Map<String, Value>) -> PhysicalDrive {
    let location = field(row, &["EID:Slt", "EID:Slot"]).unwrap_or_default();
    let (enclosure, slot) = match location.split_once(':') {
        Some((eid, slot)) => (non_empty(eid), non_empty(slot)),
        None => (None, non_empty(&location)),
    };

    PhysicalDrive {
        id: field(row, &["DID", "PID"]).unwrap_or_default(),
        enclosure,
        slot,
        state: field(row, &["State"]).unwrap_or_default(),
        media: media_from_vendor(&field(row, &["Med", "Media"]).unwrap_or_default()),
        model: field(row, &["Model"]).unwrap_or_default(),
        size: field(row, &["Size"]),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty() && value != "-").then(|| value.to_string())
}

pub fn controller_from_json(
    tool: &str,
    id: u32,
    family: ControllerFamily,
    summary: &Value,
    details: &Value,
) -> Result<Controller> {
    let mut controller = Controller::new(id, family);
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for row in list(summary, &["PD LIST", "PD List"]) {
        let drive = physical_drive(row);
        if let Some(group) = field(row, &["DG"]) {
            groups.entry(group).or_default().push(drive.id.clone());
        }
        controller.physical_drives.push(drive);
    }
    controller.drive_groups = groups
        .into_iter()
        .map(|(id, drives)| DriveGroup { id, drives })
        .collect();

    for row in list(summary, &["VD LIST", "VD List"]) {
        let dg_vd = field(row, &["DG/VD"])
            .ok_or_else(|| tool_error(tool, "virtual drive without DG/VD"))?;
        let (drive_group, vd) = dg_vd
            .split_once('/')
            .ok_or_else(|| tool_error(tool, format!("malformed DG/VD {dg_vd:?}")))?;

        let raid_level = field(row, &["TYPE", "Type"]).unwrap_or_default();
        let mut properties: BTreeMap<String, String> = row
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "DG/VD" | "TYPE" | "Type"))
            .map(|(key, value)| (key.clone(), text(value)))
            .collect();

        let mut os_path = None;
        if let Some(extra) = details
            .get(format!("VD{vd} Properties"))
            .and_then(Value::as_object)
        {
            for (key, value) in extra {
                properties.insert(key.clone(), text(value));
            }
            os_path = field(extra, &["OS Drive Name", "OS Device Name"]);
        }

        controller.virtual_drives.push(VirtualDrive {
            id: vd.to_string(),
            drive_group: drive_group.to_string(),
            kind: "VD".to_string(),
            raid_level,
            os_path,
            properties,
        });
    }

    Ok(controller)
}
