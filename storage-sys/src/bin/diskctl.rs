// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use storage_sys::raid::client_for;
use storage_sys::{
    annotate_raid, discover_controllers, ImageSystem, LinuxSystem, LvmTools, SysConfig, System,
};
use storage_types::partition_types::{self, LINUX_FS};
use storage_types::{bytes_to_pretty, ControllerFamily, Disk, Guid, Partition, TableKind};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "diskctl")]
#[command(about = "Inspect and partition disks, LVM and hardware RAID on Linux")]
struct Cli {
    /// TOML file overriding host paths and tool names
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Operate on image files in this directory instead of block devices
    #[arg(long, global = true)]
    images: Option<PathBuf>,

    /// Raise log verbosity (repeatable)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Disks and partition tables
    #[command(subcommand)]
    Disk(DiskCommand),
    /// LVM volumes
    #[command(subcommand)]
    Lvm(LvmCommand),
    /// LSI MegaRAID controllers (storcli)
    #[command(subcommand)]
    Megaraid(RaidCommand),
    /// Broadcom MPI3 controllers (storcli2)
    #[command(subcommand)]
    Mpi3mr(RaidCommand),
    /// Microsemi SmartPQI controllers (arcconf)
    #[command(subcommand)]
    Smartpqi(RaidCommand),
}

#[derive(Debug, Subcommand)]
enum DiskCommand {
    /// List disks
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one disk with its partitions and free space
    Show {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Create a partition filling the only free-space slot of a disk
    NewPart {
        path: PathBuf,
        /// Write an MBR instead of a GPT on an unpartitioned disk
        #[arg(long)]
        mbr: bool,
        /// Partition type name (see `disk types`) or GUID
        #[arg(long = "type", default_value = "linux-fs")]
        kind: String,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Delete a partition by number
    DeletePart { path: PathBuf, number: u32 },
    /// Zero a whole disk
    Wipe {
        path: PathBuf,
        /// Confirm that everything on the disk will be lost
        #[arg(long)]
        yes: bool,
    },
    /// List known partition type names
    Types,
}

#[derive(Debug, Subcommand)]
enum LvmCommand {
    /// Print PVs, VGs and LVs as JSON
    Report,
}

#[derive(Debug, Subcommand)]
enum RaidCommand {
    /// Print controller topology as JSON
    Dump {
        /// Controller number; all controllers when omitted
        ctrl: Option<u32>,
    },
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("storage_sys=info,warn")),
        1 => EnvFilter::new("storage_sys=debug,info"),
        _ => EnvFilter::new("trace"),
    };
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => SysConfig::load(path)?,
        None => SysConfig::default(),
    };

    match cli.command {
        Command::Disk(command) => {
            let system: Box<dyn System> = match &cli.images {
                Some(dir) => Box::new(ImageSystem::new(dir, config.clone())),
                None => Box::new(LinuxSystem::new(config.clone())),
            };
            disk_command(system.as_ref(), &config, cli.images.is_none(), command)
        }
        Command::Lvm(LvmCommand::Report) => {
            let report = LvmTools::new(&config).report()?;
            print_json(&report)
        }
        Command::Megaraid(RaidCommand::Dump { ctrl }) => {
            raid_dump(&config, ControllerFamily::MegaRaid, ctrl)
        }
        Command::Mpi3mr(RaidCommand::Dump { ctrl }) => {
            raid_dump(&config, ControllerFamily::Mpi3mr, ctrl)
        }
        Command::Smartpqi(RaidCommand::Dump { ctrl }) => {
            raid_dump(&config, ControllerFamily::SmartPqi, ctrl)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn require_root(live: bool) -> Result<()> {
    if live && unsafe { libc::geteuid() } != 0 {
        bail!("modifying block devices requires root");
    }
    Ok(())
}

fn scan(system: &dyn System, path: &Path) -> Result<Disk> {
    system
        .scan_disk(path)
        .with_context(|| format!("cannot scan {}", path.display()))
}

fn disk_command(
    system: &dyn System,
    config: &SysConfig,
    live: bool,
    command: DiskCommand,
) -> Result<()> {
    match command {
        DiskCommand::List { json } => {
            let mut disks = system.scan_all_disks(&|_| true)?;
            if live {
                match discover_controllers(config) {
                    Ok(controllers) => annotate_raid(&mut disks, &controllers),
                    Err(e) => tracing::warn!("RAID controllers not queried: {e}"),
                }
            }
            if json {
                return print_json(&disks);
            }
            for disk in &disks {
                println!(
                    "{:<12} {:>12}  {:?}/{:?}  {}  {} partition(s)",
                    disk.name,
                    bytes_to_pretty(&disk.size, false),
                    disk.kind,
                    disk.attach,
                    disk.table.as_str(),
                    disk.partitions.len()
                );
            }
            Ok(())
        }
        DiskCommand::Show { path, json } => {
            let disk = scan(system, &path)?;
            if json {
                return print_json(&disk);
            }
            print_disk(&disk);
            Ok(())
        }
        DiskCommand::NewPart {
            path,
            mbr,
            kind,
            name,
        } => {
            require_root(live)?;
            let mut disk = scan(system, &path)?;
            if mbr {
                match disk.table {
                    TableKind::None => disk.table = TableKind::Mbr,
                    TableKind::Mbr => {}
                    TableKind::Gpt => bail!("{}: disk already has a GPT", path.display()),
                }
            }
            let partition = new_partition(&disk, &kind, name)?;
            let written = system
                .create_partition(&disk, &partition)
                .with_context(|| format!("cannot partition {}", path.display()))?;
            println!(
                "created partition {} on {}: {}..{} ({}), id {}",
                written.number,
                disk.path.display(),
                written.start,
                written.last,
                bytes_to_pretty(&written.size(), false),
                written.id
            );
            Ok(())
        }
        DiskCommand::DeletePart { path, number } => {
            require_root(live)?;
            let disk = scan(system, &path)?;
            system
                .delete_partition(&disk, number)
                .with_context(|| format!("cannot delete partition {number} of {}", path.display()))?;
            println!("deleted partition {number} of {}", disk.path.display());
            Ok(())
        }
        DiskCommand::Wipe { path, yes } => {
            if !yes {
                bail!("refusing to wipe {} without --yes", path.display());
            }
            require_root(live)?;
            let disk = scan(system, &path)?;
            system
                .wipe(&disk)
                .with_context(|| format!("cannot wipe {}", path.display()))?;
            println!("wiped {}", disk.path.display());
            Ok(())
        }
        DiskCommand::Types => {
            for info in partition_types::PARTITION_TYPES {
                let mbr = match info.mbr_type {
                    Some(kind) => format!("0x{kind:02X}"),
                    None => "-".to_string(),
                };
                println!(
                    "{:<20} {:<4}  {}  {}",
                    info.name, mbr, info.guid, info.description
                );
            }
            Ok(())
        }
    }
}

fn new_partition(disk: &Disk, kind: &str, name: String) -> Result<Partition> {
    let type_guid = match partition_types::by_name(kind) {
        Some(info) => info.guid,
        None if kind.is_empty() => LINUX_FS,
        None => kind
            .parse::<Guid>()
            .with_context(|| format!("unknown partition type {kind:?}"))?,
    };

    let spaces = disk.free_spaces();
    let [space] = spaces.as_slice() else {
        bail!(
            "{}: expected exactly one free-space slot, found {}",
            disk.path.display(),
            spaces.len()
        );
    };
    let Some(number) = disk.next_free_number() else {
        bail!("{}: partition table is full", disk.path.display());
    };

    Ok(Partition {
        number,
        start: space.start,
        last: space.last,
        type_guid,
        id: Guid::EMPTY,
        name,
    })
}

fn print_disk(disk: &Disk) {
    println!("{} ({})", disk.path.display(), disk.name);
    println!("  size:     {}", bytes_to_pretty(&disk.size, true));
    println!("  sectors:  {} bytes", disk.sector_size);
    println!("  media:    {:?}", disk.kind);
    println!("  attach:   {:?}", disk.attach);
    println!("  table:    {}", disk.table.as_str());

    for partition in disk.partitions.values() {
        println!(
            "  {:>3}  {:>14} {:>14}  {:>10}  {}  {}",
            partition.number,
            partition.start,
            partition.last,
            bytes_to_pretty(&partition.size(), false),
            partition_types::describe(&partition.type_guid),
            partition.name
        );
    }
    for space in disk.free_spaces() {
        println!(
            "  free {:>14} {:>14}  {:>10}",
            space.start,
            space.last,
            bytes_to_pretty(&space.size(), false)
        );
    }
}

fn raid_dump(config: &SysConfig, family: ControllerFamily, ctrl: Option<u32>) -> Result<()> {
    let client = client_for(config, family);
    if !client.available() {
        bail!("no management tool installed for {family:?} controllers");
    }
    match ctrl {
        Some(id) => {
            let controller = client
                .controller(id)
                .with_context(|| format!("cannot query controller {id}"))?;
            print_json(&controller)
        }
        None => print_json(&client.controllers()?),
    }
}
