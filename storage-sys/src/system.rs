// SPDX-License-Identifier: GPL-3.0-only

//! The storage capability and its backends
//!
//! [`LinuxSystem`] drives real block devices found through sysfs.
//! [`ImageSystem`] drives image files in a directory and never talks to the
//! kernel, which is what the tests and dry runs use.

use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use storage_types::{Disk, Partition};
use tracing::{info, warn};

use crate::config::SysConfig;
use crate::engine;
use crate::error::{IoContext, Result, SysError};
use crate::sysfs::Sysfs;
use crate::virt::VirtCache;

/// Predicate selecting which scanned disks a caller is interested in.
pub type DiskFilter<'a> = &'a dyn Fn(&Disk) -> bool;

pub trait System {
    /// Every disk the backend can see that passes `filter`.
    fn scan_all_disks(&self, filter: DiskFilter<'_>) -> Result<Vec<Disk>>;

    fn scan_disk(&self, path: &Path) -> Result<Disk>;

    /// Scan `paths` in order. The first failure aborts.
    fn scan_disks(&self, filter: DiskFilter<'_>, paths: &[PathBuf]) -> Result<Vec<Disk>> {
        let mut disks = Vec::new();
        for path in paths {
            let disk = self.scan_disk(path)?;
            if filter(&disk) {
                disks.push(disk);
            }
        }
        Ok(disks)
    }

    fn config(&self) -> &SysConfig;

    /// Write `partitions` in one table update. Returns them as persisted.
    fn create_partitions(&self, disk: &Disk, partitions: &[Partition]) -> Result<Vec<Partition>> {
        engine::create_partitions(self.config(), disk, partitions)
    }

    fn create_partition(&self, disk: &Disk, partition: &Partition) -> Result<Partition> {
        let mut written = self.create_partitions(disk, std::slice::from_ref(partition))?;
        written.pop().ok_or_else(|| {
            SysError::invalid_partition(&disk.path, partition.number, "not found after writing")
        })
    }

    fn update_partitions(&self, disk: &Disk, partitions: &[Partition]) -> Result<()> {
        engine::update_partitions(self.config(), disk, partitions)
    }

    fn update_partition(&self, disk: &Disk, partition: &Partition) -> Result<()> {
        self.update_partitions(disk, std::slice::from_ref(partition))
    }

    fn delete_partition(&self, disk: &Disk, number: u32) -> Result<()> {
        engine::delete_partition(self.config(), disk, number)
    }

    fn wipe(&self, disk: &Disk) -> Result<()> {
        engine::wipe(self.config(), disk)
    }
}

/// Live backend over the host's block devices.
#[derive(Debug, Default)]
pub struct LinuxSystem {
    config: SysConfig,
    virt: VirtCache,
}

impl LinuxSystem {
    pub fn new(config: SysConfig) -> Self {
        Self {
            config,
            virt: VirtCache::new(),
        }
    }

    /// Use a known virtualization type instead of detecting it.
    pub fn with_virt_cache(config: SysConfig, virt: VirtCache) -> Self {
        Self { config, virt }
    }
}

impl System for LinuxSystem {
    fn scan_all_disks(&self, filter: DiskFilter<'_>) -> Result<Vec<Disk>> {
        let names = Sysfs::new(&self.config.sysfs_root).list_disk_names()?;
        let mut disks = Vec::new();
        for name in names {
            let path = self.config.dev_root.join(&name);
            match self.scan_disk(&path) {
                Ok(disk) if filter(&disk) => disks.push(disk),
                Ok(_) => {}
                // Empty card readers and optical drives fail here with ENOMEDIUM.
                Err(SysError::Open { path, source }) => {
                    warn!("skipping {}: {source}", path.display());
                }
                Err(e) => return Err(e),
            }
        }
        info!("found {} disk(s)", disks.len());
        Ok(disks)
    }

    fn scan_disk(&self, path: &Path) -> Result<Disk> {
        let metadata = fs::metadata(path).map_err(|_| SysError::PathResolution {
            path: path.to_path_buf(),
        })?;
        if !metadata.file_type().is_block_device() {
            return Err(SysError::NotABlockDevice(path.display().to_string()));
        }
        engine::scan_path(&self.config, &self.virt, path)
    }

    fn config(&self) -> &SysConfig {
        &self.config
    }
}

/// Backend over a directory of disk image files.
#[derive(Debug)]
pub struct ImageSystem {
    dir: PathBuf,
    config: SysConfig,
    virt: VirtCache,
}

impl ImageSystem {
    pub fn new(dir: impl Into<PathBuf>, config: SysConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
            virt: VirtCache::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Relative paths are taken to name images inside the directory.
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        }
    }
}

impl System for ImageSystem {
    fn scan_all_disks(&self, filter: DiskFilter<'_>) -> Result<Vec<Disk>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir).at(&self.dir)? {
            let entry = entry.at(&self.dir)?;
            if entry.file_type().at(&entry.path())?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();

        let mut disks = Vec::new();
        for path in paths {
            match self.scan_disk(&path) {
                Ok(disk) if filter(&disk) => disks.push(disk),
                Ok(_) => {}
                // Stray files that are not disk images.
                Err(e @ (SysError::InvalidGeometry { .. } | SysError::Open { .. })) => {
                    warn!("skipping {}: {e}", path.display());
                }
                Err(e) => return Err(e),
            }
        }
        info!("found {} image(s) in {}", disks.len(), self.dir.display());
        Ok(disks)
    }

    fn scan_disk(&self, path: &Path) -> Result<Disk> {
        let path = self.resolve(path);
        let is_file = fs::metadata(&path)
            .map(|metadata| metadata.file_type().is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(SysError::PathResolution { path });
        }
        engine::scan_path(&self.config, &self.virt, &path)
    }

    fn config(&self) -> &SysConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use storage_types::TableKind;
    use tempfile::TempDir;

    use super::*;

    fn image(dir: &TempDir, name: &str, size: u64) -> PathBuf {
        let path = dir.path().join(name);
        File::create(&path)
            .and_then(|file| file.set_len(size))
            .expect("create image");
        path
    }

    #[test]
    fn image_system_lists_regular_files_only() {
        let dir = TempDir::new().expect("tempdir");
        image(&dir, "b.img", 8 << 20);
        image(&dir, "a.img", 16 << 20);
        fs::create_dir(dir.path().join("nested")).expect("mkdir");

        let system = ImageSystem::new(dir.path(), SysConfig::default());
        let disks = system.scan_all_disks(&|_| true).expect("scan");
        let names: Vec<_> = disks.iter().map(|disk| disk.name.as_str()).collect();
        assert_eq!(names, vec!["a.img", "b.img"]);
        assert!(disks.iter().all(|disk| disk.table == TableKind::None));

        let large = system
            .scan_all_disks(&|disk| disk.size > 10 << 20)
            .expect("scan");
        assert_eq!(large.len(), 1);
        assert_eq!(large[0].name, "a.img");
    }

    #[test]
    fn image_system_skips_files_that_are_not_images() {
        let dir = TempDir::new().expect("tempdir");
        image(&dir, "disk.img", 8 << 20);
        image(&dir, "empty", 0);
        image(&dir, "notes.txt", 1000);

        let system = ImageSystem::new(dir.path(), SysConfig::default());
        let disks = system.scan_all_disks(&|_| true).expect("scan");
        let names: Vec<_> = disks.iter().map(|disk| disk.name.as_str()).collect();
        assert_eq!(names, vec!["disk.img"]);

        assert!(matches!(
            system.scan_disk(Path::new("notes.txt")),
            Err(SysError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn image_system_resolves_relative_names() {
        let dir = TempDir::new().expect("tempdir");
        let path = image(&dir, "disk.img", 8 << 20);
        let system = ImageSystem::new(dir.path(), SysConfig::default());

        let disk = system.scan_disk(Path::new("disk.img")).expect("scan");
        assert_eq!(disk.path, path);
        assert_eq!(disk.sector_size, 512);
    }

    #[test]
    fn image_system_rejects_non_files() {
        let dir = TempDir::new().expect("tempdir");
        let system = ImageSystem::new(dir.path(), SysConfig::default());
        assert!(matches!(
            system.scan_disk(dir.path()),
            Err(SysError::PathResolution { .. })
        ));
        assert!(matches!(
            system.scan_disk(Path::new("missing.img")),
            Err(SysError::PathResolution { .. })
        ));
    }

    #[test]
    fn scan_disks_stops_at_first_failure() {
        let dir = TempDir::new().expect("tempdir");
        let good = image(&dir, "good.img", 8 << 20);
        let system = ImageSystem::new(dir.path(), SysConfig::default());

        let result = system.scan_disks(&|_| true, &[good, dir.path().join("gone.img")]);
        assert!(matches!(result, Err(SysError::PathResolution { .. })));
    }

    #[test]
    fn linux_system_refuses_image_files() {
        let dir = TempDir::new().expect("tempdir");
        let path = image(&dir, "disk.img", 8 << 20);
        let system = LinuxSystem::new(SysConfig::default());
        assert!(matches!(
            system.scan_disk(&path),
            Err(SysError::NotABlockDevice(_))
        ));
    }

    #[test]
    fn linux_system_with_no_disks() {
        let sys = TempDir::new().expect("tempdir");
        fs::create_dir_all(sys.path().join("block/loop0")).expect("mkdir");
        let config = SysConfig {
            sysfs_root: sys.path().to_path_buf(),
            ..Default::default()
        };
        let system = LinuxSystem::with_virt_cache(config, VirtCache::default());
        assert!(system.scan_all_disks(&|_| true).expect("scan").is_empty());
    }
}
