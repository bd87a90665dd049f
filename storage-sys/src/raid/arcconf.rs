// SPDX-License-Identifier: GPL-3.0-only

//! SmartPQI controllers through `arcconf`
//!
//! `arcconf` has no machine-readable output, so `list` and
//! `getconfig <n> ld|pd` are scraped as indented `key : value` text.

use std::collections::BTreeMap;

use storage_types::{Controller, ControllerFamily, DiskKind, DriveGroup, PhysicalDrive, VirtualDrive};

use super::{media_from_vendor, RaidClient};
use crate::cmd;
use crate::config::SysConfig;
use crate::error::{Result, SysError};

const TOOL: &str = "arcconf";

pub struct ArcconfClient<'a> {
    program: &'a str,
}

impl<'a> ArcconfClient<'a> {
    pub fn new(config: &'a SysConfig) -> Self {
        Self {
            program: &config.tools.arcconf,
        }
    }
}

impl RaidClient for ArcconfClient<'_> {
    fn family(&self) -> ControllerFamily {
        ControllerFamily::SmartPqi
    }

    fn available(&self) -> bool {
        cfg!(feature = "raid-tools") && which::which(self.program).is_ok()
    }

    fn controller_ids(&self) -> Result<Vec<u32>> {
        let stdout = cmd::output(&[self.program, "list"])?;
        parse_controller_ids(&stdout)
    }

    fn controller(&self, id: u32) -> Result<Controller> {
        let n = id.to_string();
        let ld = cmd::output(&[self.program, "getconfig", &n, "ld"])?;
        let pd = cmd::output(&[self.program, "getconfig", &n, "pd"])?;
        Ok(controller_from_text(id, &ld, &pd))
    }
}

/// Split `key : value`. Keys may contain colons themselves, as in
/// `Reported Channel,Device(T:L)`, but never a space before one.
fn key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(" :")?;
    Some((key.trim(), value.trim()))
}

/// Controller numbers start at 1.
pub fn parse_controller_ids(stdout: &str) -> Result<Vec<u32>> {
    let count = stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix("Controllers found:"))
        .and_then(|count| count.trim().parse::<u32>().ok())
        .ok_or_else(|| SysError::ToolOutput {
            tool: TOOL.to_string(),
            reason: "no \"Controllers found\" line".to_string(),
        })?;
    Ok((1..=count).collect())
}

/// Consecutive `key : value` blocks, each opened by a line accepted by `header`.
fn blocks<'t>(
    text: &'t str,
    header: impl Fn(&'t str) -> Option<&'t str>,
) -> Vec<(&'t str, Vec<&'t str>)> {
    let mut blocks: Vec<(&str, Vec<&str>)> = Vec::new();
    for line in text.lines().map(str::trim) {
        if let Some(id) = header(line) {
            blocks.push((id, Vec::new()));
        } else if let Some((_, lines)) = blocks.last_mut() {
            lines.push(line);
        }
    }
    blocks
}

struct LogicalDevice {
    drive: VirtualDrive,
    member_serials: Vec<String>,
}

fn logical_device(id: &str, lines: &[&str]) -> LogicalDevice {
    let mut properties = BTreeMap::new();
    let mut member_serials = Vec::new();
    let mut in_members = false;

    for line in lines {
        if line.starts_with("Array Physical Device Information") {
            in_members = true;
            continue;
        }
        let Some((key, value)) = key_value(line) else {
            continue;
        };
        if in_members {
            // Device 0 : Present (457862MB, SATA, SSD, Channel:0, Device:0) S455NY0M123456
            if key.starts_with("Device") {
                if let Some(serial) = value.rsplit(')').next().map(str::trim) {
                    if !serial.is_empty() {
                        member_serials.push(serial.to_string());
                    }
                }
            }
        } else {
            properties.insert(key.to_string(), value.to_string());
        }
    }

    let os_path = properties
        .get("Disk Name")
        .and_then(|name| name.split_whitespace().next())
        .filter(|name| name.starts_with("/dev/"))
        .map(str::to_string);

    LogicalDevice {
        drive: VirtualDrive {
            id: id.to_string(),
            drive_group: properties.get("Array").cloned().unwrap_or_default(),
            kind: "Logical Device".to_string(),
            raid_level: properties.get("RAID level").cloned().unwrap_or_default(),
            os_path,
            properties,
        },
        member_serials,
    }
}

fn physical_device(id: &str, lines: &[&str]) -> (PhysicalDrive, Option<String>) {
    let mut media = DiskKind::Unknown;
    let mut values: BTreeMap<&str, &str> = BTreeMap::new();
    for line in lines {
        if *line == "Device is a Hard drive" {
            media = DiskKind::Hdd;
        }
        if let Some((key, value)) = key_value(line) {
            values.insert(key, value);
        }
    }
    if values.get("SSD").is_some_and(|ssd| ssd.eq_ignore_ascii_case("yes")) {
        media = DiskKind::Ssd;
    } else if let Some(kind) = values.get("Media Type") {
        media = match media_from_vendor(kind) {
            DiskKind::Unknown => media,
            known => known,
        };
    }

    // Reported Location : Enclosure 0, Slot 3
    let mut enclosure = None;
    let mut slot = None;
    if let Some(location) = values.get("Reported Location") {
        for part in location.split(',').map(str::trim) {
            if let Some(e) = part.strip_prefix("Enclosure ") {
                enclosure = Some(e.to_string());
            } else if let Some(s) = part.strip_prefix("Slot ") {
                let digits = s.split(|c: char| !c.is_ascii_digit()).next().unwrap_or(s);
                slot = Some(digits.to_string());
            }
        }
    }

    let text = |key: &str| values.get(key).map(|v| v.to_string()).unwrap_or_default();
    let drive = PhysicalDrive {
        id: id.to_string(),
        enclosure,
        slot,
        state: text("State"),
        media,
        model: text("Model"),
        size: values.get("Total Size").map(|v| v.to_string()),
    };
    (drive, values.get("Serial number").map(|v| v.to_string()))
}

pub fn controller_from_text(id: u32, ld: &str, pd: &str) -> Controller {
    let mut controller = Controller::new(id, ControllerFamily::SmartPqi);

    let mut ids_by_serial = BTreeMap::new();
    for (number, lines) in blocks(pd, |line| line.strip_prefix("Device #")) {
        let (drive, serial) = physical_device(number, &lines);
        if let Some(serial) = serial {
            ids_by_serial.insert(serial, drive.id.clone());
        }
        controller.physical_drives.push(drive);
    }

    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (number, lines) in blocks(ld, |line| line.strip_prefix("Logical Device number ")) {
        let device = logical_device(number.trim(), &lines);
        let members = groups.entry(device.drive.drive_group.clone()).or_default();
        for serial in &device.member_serials {
            if let Some(pd) = ids_by_serial.get(serial) {
                if !members.contains(pd) {
                    members.push(pd.clone());
                }
            }
        }
        controller.virtual_drives.push(device.drive);
    }
    controller.drive_groups = groups
        .into_iter()
        .map(|(id, drives)| DriveGroup { id, drives })
        .collect();

    controller
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = "\
Controllers found: 1
----------------------------------------------------------------------
Controller information
----------------------------------------------------------------------
   Controller ID             : Status, Slot, Mode, Name, SerialNumber, WWN
----------------------------------------------------------------------
   Controller 1:             : Optimal, Slot 1, Mixed, MSCC Adaptec SmartRAID 3154-8i, 7A4563EB0F1, 50000D1E0118C980

Command completed successfully.
";

    const LD: &str = "\
Controllers found: 1
----------------------------------------------------------------------
Logical device information
----------------------------------------------------------------------
Logical Device number 0
   Logical Device name                        : root
   Disk Name                                  : /dev/sda (Disk0) (Bus: 1, Target: 0, Lun: 0)
   Block Size of member drives                : 512 Bytes
   Array                                      : 0
   RAID level                                 : 1
   Status of Logical Device                   : Optimal
   Size                                       : 457718 MB
   Stripe-unit size                           : 256 KB
   --------------------------------------------------------
   Array Physical Device Information
   --------------------------------------------------------
   Device 0                                   : Present (457862MB, SATA, SSD, Channel:0, Device:0) S455NY0M123456
   Device 1                                   : Present (457862MB, SATA, SSD, Channel:0, Device:1) S455NY0M654321

Command completed successfully.
";

    const PD: &str = "\
Controllers found: 1
----------------------------------------------------------------------
Physical Device information
----------------------------------------------------------------------
      Channel #0:
         Device #0
            Device is a Hard drive
            State                                : Online
            Block Size                           : 512 Bytes
            Reported Channel,Device(T:L)         : 0,0(0:0)
            Reported Location                    : Enclosure 0, Slot 0(Connector 0:CN0)
            Vendor                               : ATA
            Model                                : SAMSUNG MZ7LH480
            Serial number                        : S455NY0M123456
            Total Size                           : 457862 MB
            SSD                                  : Yes
         Device #1
            Device is a Hard drive
            State                                : Online
            Reported Channel,Device(T:L)         : 0,1(1:0)
            Reported Location                    : Enclosure 0, Slot 1
            Model                                : SAMSUNG MZ7LH480
            Serial number                        : S455NY0M654321
            Total Size                           : 457862 MB
            SSD                                  : Yes
         Device #2
            Device is a Hard drive
            State                                : Ready
            Reported Location                    : Enclosure 0, Slot 2
            Model                                : ST2000NM0055
            Serial number                        : ZC20ABCD
            Total Size                           : 1907729 MB
            SSD                                  : No

Command completed successfully.
";

    #[test]
    fn counts_controllers_from_one() {
        assert_eq!(parse_controller_ids(LIST).expect("ids"), vec![1]);
        assert!(parse_controller_ids("Command completed successfully.\n").is_err());
    }

    #[test]
    fn key_values_keep_colons_in_keys() {
        assert_eq!(
            key_value("Reported Channel,Device(T:L)         : 0,0(0:0)"),
            Some(("Reported Channel,Device(T:L)", "0,0(0:0)"))
        );
        assert_eq!(key_value("Device is a Hard drive"), None);
    }

    #[test]
    fn parses_controller_topology() {
        let controller = controller_from_text(1, LD, PD);
        assert_eq!(controller.family, ControllerFamily::SmartPqi);

        assert_eq!(controller.physical_drives.len(), 3);
        let first = &controller.physical_drives[0];
        assert_eq!(first.id, "0");
        assert_eq!(first.enclosure.as_deref(), Some("0"));
        assert_eq!(first.slot.as_deref(), Some("0"));
        assert_eq!(first.media, DiskKind::Ssd);
        assert_eq!(first.model, "SAMSUNG MZ7LH480");
        assert_eq!(controller.physical_drives[2].media, DiskKind::Hdd);
        assert_eq!(controller.physical_drives[2].state, "Ready");

        let vd = &controller.virtual_drives[0];
        assert_eq!(vd.id, "0");
        assert_eq!(vd.raid_level, "1");
        assert_eq!(vd.drive_group, "0");
        assert_eq!(vd.os_path.as_deref(), Some("/dev/sda"));
        assert_eq!(vd.properties["Stripe-unit size"], "256 KB");
        assert!(!vd.properties.contains_key("Device 0"));

        assert_eq!(
            controller.drive_groups,
            vec![DriveGroup {
                id: "0".to_string(),
                drives: vec!["0".to_string(), "1".to_string()],
            }]
        );
    }
}
