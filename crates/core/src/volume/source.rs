//! Platform seams for volume discovery and disk space.

use std::path::Path;

use sysinfo::Disks;

use super::types::{MountedVolume, VolumeSpace};

/// Filesystem types treated as network shares.
const NETWORK_FILESYSTEMS: &[&str] = &["nfs", "nfs4", "cifs", "smb", "smb2", "smbfs", "sshfs", "fuse.sshfs"];

/// Enumerates mounted volumes and answers network-share probes.
///
/// `is_network_share` may be expensive; callers are expected to cache the
/// answer per root and re-probe only when the mounted-root set changes.
pub trait VolumeSource: Send + Sync {
    /// All currently mounted volume roots.
    fn mounted_volumes(&self) -> Vec<MountedVolume>;

    /// Whether the volume mounted at `root` is a network share.
    fn is_network_share(&self, root: &Path) -> bool;
}

/// Per-directory disk space lookup, separated from [`VolumeSource`] so the
/// transfer engine can check an arbitrary destination directory.
pub trait SpaceProbe: Send + Sync {
    /// Space of the disk containing `path`, if it can be determined.
    fn space_for(&self, path: &Path) -> Option<VolumeSpace>;
}

/// [`VolumeSource`] backed by `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoVolumeSource;

impl SysinfoVolumeSource {
    pub fn new() -> Self {
        Self
    }
}

impl VolumeSource for SysinfoVolumeSource {
    fn mounted_volumes(&self) -> Vec<MountedVolume> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .iter()
            .map(|disk| MountedVolume {
                root: disk.mount_point().to_path_buf(),
                total_space: disk.total_space(),
                usable_space: disk.available_space(),
            })
            .collect()
    }

    fn is_network_share(&self, root: &Path) -> bool {
        let disks = Disks::new_with_refreshed_list();
        disks
            .iter()
            .find(|disk| disk.mount_point() == root)
            .map(|disk| {
                let fs = disk.file_system().to_string_lossy().to_ascii_lowercase();
                NETWORK_FILESYSTEMS.iter().any(|known| fs == *known)
            })
            .unwrap_or(false)
    }
}

/// [`SpaceProbe`] backed by `sysinfo`: finds the disk whose mount point is
/// the longest prefix of the queried path.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoSpaceProbe;

impl SysinfoSpaceProbe {
    pub fn new() -> Self {
        Self
    }
}

impl SpaceProbe for SysinfoSpaceProbe {
    fn space_for(&self, path: &Path) -> Option<VolumeSpace> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| VolumeSpace {
                total: disk.total_space(),
                usable: disk.available_space(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysinfo_probe_finds_disk_for_tempdir() {
        let temp = tempfile::tempdir().unwrap();
        let probe = SysinfoSpaceProbe::new();
        // The temp dir lives on some mounted disk; the probe must find it
        // and report a sane total.
        if let Some(space) = probe.space_for(temp.path()) {
            assert!(space.total >= space.usable);
        }
    }

    #[test]
    fn test_sysinfo_source_lists_roots() {
        let source = SysinfoVolumeSource::new();
        for volume in source.mounted_volumes() {
            assert!(volume.root.is_absolute());
        }
    }
}
