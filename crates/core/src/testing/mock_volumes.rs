//! In-memory volume and disk-space seams for tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::volume::{MountedVolume, SpaceProbe, VolumeSource, VolumeSpace};

/// [`VolumeSource`] over a mutable in-memory mount table.
#[derive(Debug, Default)]
pub struct MockVolumeSource {
    volumes: Mutex<Vec<MountedVolume>>,
    network: Mutex<HashSet<PathBuf>>,
    probes: AtomicUsize,
}

impl MockVolumeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_volume(&self, root: &Path, total: u64, usable: u64) {
        self.volumes
            .lock()
            .expect("mock volume lock poisoned")
            .push(MountedVolume {
                root: root.to_path_buf(),
                total_space: total,
                usable_space: usable,
            });
    }

    pub fn set_space(&self, root: &Path, total: u64, usable: u64) {
        let mut volumes = self.volumes.lock().expect("mock volume lock poisoned");
        if let Some(volume) = volumes.iter_mut().find(|v| v.root == root) {
            volume.total_space = total;
            volume.usable_space = usable;
        }
    }

    pub fn remove_volume(&self, root: &Path) {
        self.volumes
            .lock()
            .expect("mock volume lock poisoned")
            .retain(|v| v.root != root);
    }

    pub fn mark_network(&self, root: &Path) {
        self.network
            .lock()
            .expect("mock volume lock poisoned")
            .insert(root.to_path_buf());
    }

    /// How many times `is_network_share` was called.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::Relaxed)
    }
}

impl VolumeSource for MockVolumeSource {
    fn mounted_volumes(&self) -> Vec<MountedVolume> {
        self.volumes
            .lock()
            .expect("mock volume lock poisoned")
            .clone()
    }

    fn is_network_share(&self, root: &Path) -> bool {
        self.probes.fetch_add(1, Ordering::Relaxed);
        self.network
            .lock()
            .expect("mock volume lock poisoned")
            .contains(root)
    }
}

/// [`SpaceProbe`] answering from a fixed table, with an optional default.
#[derive(Debug, Default)]
pub struct MockSpaceProbe {
    spaces: Mutex<HashMap<PathBuf, VolumeSpace>>,
    fallback: Mutex<Option<VolumeSpace>>,
}

impl MockSpaceProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// A probe that reports effectively unlimited space everywhere.
    pub fn unlimited() -> Self {
        let probe = Self::default();
        probe.set_default(u64::MAX, u64::MAX);
        probe
    }

    pub fn set(&self, path: &Path, total: u64, usable: u64) {
        self.spaces
            .lock()
            .expect("mock probe lock poisoned")
            .insert(path.to_path_buf(), VolumeSpace { total, usable });
    }

    pub fn set_default(&self, total: u64, usable: u64) {
        *self.fallback.lock().expect("mock probe lock poisoned") =
            Some(VolumeSpace { total, usable });
    }
}

impl SpaceProbe for MockSpaceProbe {
    fn space_for(&self, path: &Path) -> Option<VolumeSpace> {
        let spaces = self.spaces.lock().expect("mock probe lock poisoned");
        spaces
            .get(path)
            .copied()
            .or(*self.fallback.lock().expect("mock probe lock poisoned"))
    }
}
