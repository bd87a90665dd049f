// SPDX-License-Identifier: GPL-3.0-only

//! Bringing the kernel's partition view in line with the disk
//!
//! Runs only for block devices and only after the locked handle is closed.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use storage_types::{Disk, Partition};
use tracing::{debug, info, warn};

use crate::cmd;
use crate::config::SysConfig;
use crate::error::Result;
use crate::sysfs::partition_kname;

const PARTUUID_POLL: Duration = Duration::from_millis(100);

/// One partition touched by a mutation.
#[derive(Debug, Clone, Copy)]
pub enum Change<'a> {
    Added(&'a Partition),
    Updated(&'a Partition),
    Removed(u32),
}

/// Device node of partition `number` of `disk`.
pub fn partition_node(config: &SysConfig, disk: &Disk, number: u32) -> PathBuf {
    config.dev_root.join(partition_kname(&disk.name, number))
}

pub fn reconcile(config: &SysConfig, disk: &Disk, changes: &[Change<'_>]) -> Result<()> {
    cmd::udev_settle(config)?;

    let disk_path = disk.path.to_string_lossy().to_string();
    let mut touched = false;
    for change in changes {
        match *change {
            Change::Added(partition) => {
                let node = partition_node(config, disk, partition.number);
                if node.exists() {
                    debug!("{} already present, skipping addpart", node.display());
                    continue;
                }
                let number = partition.number.to_string();
                let start = (partition.start / 512).to_string();
                let length = (partition.size() / 512).to_string();
                cmd::run_checked(
                    &[
                        config.tools.addpart.as_str(),
                        &disk_path,
                        &number,
                        &start,
                        &length,
                    ],
                    None,
                )?;
                touched = true;
            }
            Change::Updated(partition) => {
                let node = partition_node(config, disk, partition.number);
                if !node.exists() {
                    continue;
                }
                let node = node.to_string_lossy().to_string();
                cmd::run_checked(
                    &[
                        config.tools.udevadm.as_str(),
                        "trigger",
                        "--action=change",
                        &node,
                    ],
                    None,
                )?;
                touched = true;
            }
            Change::Removed(number) => {
                let node = partition_node(config, disk, number);
                if !node.exists() {
                    debug!("{} not present, skipping delpart", node.display());
                    continue;
                }
                let number = number.to_string();
                cmd::run_checked(&[config.tools.delpart.as_str(), &disk_path, &number], None)?;
                touched = true;
            }
        }
    }

    if touched {
        cmd::udev_settle(config)?;
    }

    for change in changes {
        if let Change::Added(partition) | Change::Updated(partition) = *change {
            if !partition.id.is_empty() {
                wait_for_partuuid(config, partition);
            }
        }
    }

    info!("{}: kernel partition view updated", disk.path.display());
    Ok(())
}

/// Poll for the by-partuuid link udev creates for a GPT partition. A missing
/// link is reported but not fatal.
fn wait_for_partuuid(config: &SysConfig, partition: &Partition) {
    let link = config
        .dev_root
        .join("disk/by-partuuid")
        .join(partition.id.to_lowercase_string());
    let deadline = Instant::now() + config.partuuid_wait();

    loop {
        if link.exists() {
            debug!("{} is visible", link.display());
            return;
        }
        if Instant::now() >= deadline {
            warn!(
                "partition {} did not show up as {}",
                partition.number,
                link.display()
            );
            return;
        }
        thread::sleep(PARTUUID_POLL);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use storage_types::Guid;

    use super::*;

    fn config(dev_root: &std::path::Path, log: &std::path::Path) -> SysConfig {
        let mut config = SysConfig::default();
        config.dev_root = dev_root.to_path_buf();
        config.partuuid_wait_ms = 0;
        // Every helper records its argv instead of touching the kernel.
        let recorder = log.join("record.sh");
        fs::write(
            &recorder,
            format!("#!/bin/sh\necho \"$0 $*\" >> {}\n", log.join("calls").display()),
        )
        .expect("write recorder");
        let mut perms = fs::metadata(&recorder).expect("metadata").permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        fs::set_permissions(&recorder, perms).expect("chmod");
        for (name, tool) in [
            ("udevadm", &mut config.tools.udevadm),
            ("addpart", &mut config.tools.addpart),
            ("delpart", &mut config.tools.delpart),
        ] {
            let link = log.join(name);
            std::os::unix::fs::symlink(&recorder, &link).expect("symlink");
            *tool = link.to_string_lossy().to_string();
        }
        config
    }

    fn calls(log: &std::path::Path) -> Vec<String> {
        fs::read_to_string(log.join("calls"))
            .unwrap_or_default()
            .lines()
            .map(|line| {
                let (program, args) = line.split_once(' ').unwrap_or((line, ""));
                let program = program.rsplit('/').next().unwrap_or(program);
                format!("{program} {args}").trim_end().to_string()
            })
            .collect()
    }

    fn disk(name: &str) -> Disk {
        Disk {
            name: name.to_string(),
            path: PathBuf::from(format!("/dev/{name}")),
            sector_size: 512,
            ..Default::default()
        }
    }

    fn partition(number: u32) -> Partition {
        Partition {
            number,
            start: 1 << 20,
            last: (3 << 20) - 1,
            type_guid: storage_types::partition_types::LINUX_FS,
            id: Guid::new_v4(),
            name: String::new(),
        }
    }

    #[test]
    fn node_names_follow_the_kernel_convention() {
        let config = SysConfig::default();
        assert_eq!(
            partition_node(&config, &disk("sda"), 2),
            PathBuf::from("/dev/sda2")
        );
        assert_eq!(
            partition_node(&config, &disk("nvme0n1"), 2),
            PathBuf::from("/dev/nvme0n1p2")
        );
    }

    #[test]
    fn adds_missing_and_removes_present_nodes() {
        let dev = tempfile::tempdir().expect("dev");
        let log = tempfile::tempdir().expect("log");
        let config = config(dev.path(), log.path());
        let disk = disk("sdx");

        // sdx2 already exists so only sdx1 needs addpart; sdx3 exists and is removed.
        fs::write(dev.path().join("sdx2"), "").expect("node");
        fs::write(dev.path().join("sdx3"), "").expect("node");
        let one = partition(1);
        let two = partition(2);
        reconcile(
            &config,
            &disk,
            &[Change::Added(&one), Change::Added(&two), Change::Removed(3), Change::Removed(4)],
        )
        .expect("reconcile");

        assert_eq!(
            calls(log.path()),
            vec![
                "udevadm settle --timeout=120",
                "addpart /dev/sdx 1 2048 4096",
                "delpart /dev/sdx 3",
                "udevadm settle --timeout=120",
            ]
        );
    }

    #[test]
    fn updates_trigger_change_events() {
        let dev = tempfile::tempdir().expect("dev");
        let log = tempfile::tempdir().expect("log");
        let config = config(dev.path(), log.path());
        fs::write(dev.path().join("vdb1"), "").expect("node");

        let one = partition(1);
        reconcile(&config, &disk("vdb"), &[Change::Updated(&one)]).expect("reconcile");

        let node = dev.path().join("vdb1");
        assert_eq!(
            calls(log.path()),
            vec![
                "udevadm settle --timeout=120".to_string(),
                format!("udevadm trigger --action=change {}", node.display()),
                "udevadm settle --timeout=120".to_string(),
            ]
        );
    }
}
