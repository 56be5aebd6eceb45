//! Destination volume selection with reservation accounting.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::moves::{DestinationLister, MoveRegistry};

use super::source::VolumeSource;
use super::types::{DestinationVolume, MountedVolume};

/// Minimum reservation-adjusted free space for a volume to count as an
/// available destination (one plot plus slack).
pub const FREE_SPACE_THRESHOLD: u64 = 109_000_000_000;

/// Destination subdirectory expected on every destination volume.
pub const DEST_DIR_NAME: &str = "plots";

/// Sentinel file excluding a volume (or its plots directory) from writes.
pub const NO_WRITE_FILE: &str = "no-write";

#[derive(Debug, Default)]
struct ShareCache {
    known_roots: HashSet<PathBuf>,
    shares: HashMap<PathBuf, bool>,
}

/// Enumerates destination volumes and applies reservation accounting.
///
/// Free space for a volume is its usable space minus one threshold if a
/// job is plotting directly onto it, minus the bytes still owed to any
/// move currently claiming it. Network-share probing is cached per root
/// and recomputed only when the mounted-root set changes.
pub struct DestinationProvider {
    source: Arc<dyn VolumeSource>,
    moves: Arc<MoveRegistry>,
    reservations: Mutex<HashSet<PathBuf>>,
    share_cache: Mutex<ShareCache>,
    threshold: u64,
}

impl DestinationProvider {
    pub fn new(source: Arc<dyn VolumeSource>, moves: Arc<MoveRegistry>) -> Self {
        Self {
            source,
            moves,
            reservations: Mutex::new(HashSet::new()),
            share_cache: Mutex::new(ShareCache::default()),
            threshold: FREE_SPACE_THRESHOLD,
        }
    }

    /// Overrides the free-space threshold; used by tests.
    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    /// All volumes currently fit to receive a plot.
    pub fn list_available(&self) -> Vec<DestinationVolume> {
        let reserved = self.reservations.lock().expect("reservation lock poisoned");
        self.snapshot(&reserved)
    }

    /// Atomically picks and reserves a volume for direct plotting:
    /// non-reserved, not a network share, lowest fill ratio. `None` when
    /// no candidate remains.
    pub fn reserve_direct(&self) -> Option<DestinationVolume> {
        let mut reserved = self.reservations.lock().expect("reservation lock poisoned");
        let choice = self
            .snapshot(&reserved)
            .into_iter()
            .filter(|v| !v.direct_reserved && !v.network_share)
            .min_by(|a, b| {
                a.fill_ratio()
                    .total_cmp(&b.fill_ratio())
                    .then_with(|| a.dir.cmp(&b.dir))
            })?;
        info!(
            "Reserving volume for direct destination: {}",
            choice.dir.display()
        );
        reserved.insert(choice.dir.clone());
        Some(choice)
    }

    /// Releases a direct-plotting reservation.
    pub fn release_direct(&self, dir: &Path) {
        let mut reserved = self.reservations.lock().expect("reservation lock poisoned");
        if reserved.remove(dir) {
            info!("Released direct destination: {}", dir.display());
        }
    }

    /// Number of outstanding direct reservations.
    pub fn direct_reservations(&self) -> usize {
        self.reservations
            .lock()
            .expect("reservation lock poisoned")
            .len()
    }

    /// Available volumes in move-placement order: unreserved volumes
    /// first, then ascending fill ratio, ties broken by path order.
    pub fn ranked_move_destinations(&self) -> Vec<DestinationVolume> {
        let mut volumes = self.list_available();
        volumes.sort_by(|a, b| {
            (a.direct_reserved as u8)
                .cmp(&(b.direct_reserved as u8))
                .then(a.fill_ratio().total_cmp(&b.fill_ratio()))
                .then_with(|| a.dir.cmp(&b.dir))
        });
        volumes
    }

    /// How many whole plots the fleet can still absorb: the sum over all
    /// available volumes of adjusted free space divided by the threshold.
    pub fn capacity_slots(&self) -> u64 {
        self.list_available()
            .iter()
            .map(|v| v.free_space / self.threshold)
            .sum()
    }

    fn snapshot(&self, reserved: &HashSet<PathBuf>) -> Vec<DestinationVolume> {
        let mounts = self.source.mounted_volumes();
        let shares = self.share_lookup(&mounts);

        let mut result = Vec::new();
        for mount in mounts {
            if mount.root.join(NO_WRITE_FILE).exists() {
                continue;
            }
            let dir = mount.root.join(DEST_DIR_NAME);
            if !dir.is_dir() || dir.join(NO_WRITE_FILE).exists() {
                continue;
            }

            let direct_reserved = reserved.contains(&dir);
            let mut free = mount.usable_space;
            if direct_reserved {
                free = free.saturating_sub(self.threshold);
            }
            free = free.saturating_sub(self.moves.claimed_bytes_remaining(&dir));
            if free < self.threshold {
                continue;
            }

            result.push(DestinationVolume {
                network_share: shares.get(&mount.root).copied().unwrap_or(false),
                dir,
                root: mount.root,
                total_space: mount.total_space,
                usable_space: mount.usable_space,
                free_space: free,
                direct_reserved,
            });
        }
        result
    }

    fn share_lookup(&self, mounts: &[MountedVolume]) -> HashMap<PathBuf, bool> {
        let mut cache = self.share_cache.lock().expect("share cache lock poisoned");
        let roots: HashSet<PathBuf> = mounts.iter().map(|m| m.root.clone()).collect();
        if roots != cache.known_roots {
            debug!("Mounted root set changed; refreshing network-share cache");
            cache.shares.retain(|root, _| roots.contains(root));
            cache.known_roots = roots.clone();
        }
        for root in roots {
            if !cache.shares.contains_key(&root) {
                let is_share = self.source.is_network_share(&root);
                cache.shares.insert(root, is_share);
            }
        }
        cache.shares.clone()
    }
}

impl DestinationLister for DestinationProvider {
    fn move_destinations(&self) -> Vec<DestinationVolume> {
        self.ranked_move_destinations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockVolumeSource;
    use crate::transfer::TransferControls;
    use tempfile::TempDir;

    /// A fleet of tempdir-backed volume roots, each with a plots dir.
    struct Fleet {
        _dir: TempDir,
        source: Arc<MockVolumeSource>,
        roots: Vec<PathBuf>,
    }

    impl Fleet {
        fn new(count: usize) -> Self {
            let dir = TempDir::new().unwrap();
            let source = Arc::new(MockVolumeSource::new());
            let mut roots = Vec::new();
            for i in 0..count {
                let root = dir.path().join(format!("vol{}", i));
                std::fs::create_dir_all(root.join(DEST_DIR_NAME)).unwrap();
                source.add_volume(&root, 1000, 500);
                roots.push(root);
            }
            Self {
                _dir: dir,
                source,
                roots,
            }
        }

        fn provider(&self, moves: Arc<MoveRegistry>) -> DestinationProvider {
            DestinationProvider::new(self.source.clone(), moves).with_threshold(100)
        }
    }

    #[test]
    fn test_list_available_filters_threshold_and_sentinels() {
        let fleet = Fleet::new(3);
        fleet.source.set_space(&fleet.roots[1], 1000, 50); // below threshold
        std::fs::write(fleet.roots[2].join(NO_WRITE_FILE), b"").unwrap();

        let provider = fleet.provider(Arc::new(MoveRegistry::new()));
        let available = provider.list_available();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].root, fleet.roots[0]);
    }

    #[test]
    fn test_no_write_inside_plots_dir_excludes_volume() {
        let fleet = Fleet::new(1);
        std::fs::write(
            fleet.roots[0].join(DEST_DIR_NAME).join(NO_WRITE_FILE),
            b"",
        )
        .unwrap();
        let provider = fleet.provider(Arc::new(MoveRegistry::new()));
        assert!(provider.list_available().is_empty());
    }

    #[test]
    fn test_free_space_subtracts_reservation_and_moves() {
        let fleet = Fleet::new(1);
        let moves = Arc::new(MoveRegistry::new());
        let provider = fleet.provider(Arc::clone(&moves));

        let reserved = provider.reserve_direct().unwrap();
        let dir = reserved.dir.clone();

        // 500 usable - 100 reservation = 400 adjusted.
        let available = provider.list_available();
        assert_eq!(available[0].free_space, 400);

        // A claimed move owing 250 bytes takes the volume down to 150.
        let id = moves.register("q1", Path::new("/src/p"), 250, TransferControls::new());
        moves.try_claim(id, &available).unwrap();
        assert_eq!(provider.list_available()[0].free_space, 150);

        // Progress reduces what is still owed.
        moves
            .progress_counter(id)
            .unwrap()
            .store(200, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(provider.list_available()[0].free_space, 350);

        // Fully released: back to reservation-only accounting.
        moves.release(id);
        provider.release_direct(&dir);
        assert_eq!(provider.list_available()[0].free_space, 500);
    }

    #[test]
    fn test_reserve_direct_is_exclusive() {
        let fleet = Fleet::new(2);
        let provider = fleet.provider(Arc::new(MoveRegistry::new()));

        let first = provider.reserve_direct().unwrap();
        let second = provider.reserve_direct().unwrap();
        assert_ne!(first.dir, second.dir);
        assert!(provider.reserve_direct().is_none());
        assert_eq!(provider.direct_reservations(), 2);
    }

    #[test]
    fn test_reserve_direct_prefers_lowest_fill() {
        let fleet = Fleet::new(2);
        fleet.source.set_space(&fleet.roots[0], 1000, 200); // 80% full
        fleet.source.set_space(&fleet.roots[1], 1000, 800); // 20% full

        let provider = fleet.provider(Arc::new(MoveRegistry::new()));
        let choice = provider.reserve_direct().unwrap();
        assert_eq!(choice.root, fleet.roots[1]);
    }

    #[test]
    fn test_reserve_direct_skips_network_shares() {
        let fleet = Fleet::new(2);
        fleet.source.mark_network(&fleet.roots[0]);
        fleet.source.mark_network(&fleet.roots[1]);
        let provider = fleet.provider(Arc::new(MoveRegistry::new()));
        assert!(provider.reserve_direct().is_none());
    }

    #[test]
    fn test_move_destinations_order_unreserved_first_then_fill() {
        let fleet = Fleet::new(3);
        fleet.source.set_space(&fleet.roots[0], 1000, 300); // 70% full
        fleet.source.set_space(&fleet.roots[1], 1000, 900); // 10% full
        fleet.source.set_space(&fleet.roots[2], 1000, 600); // 40% full

        let provider = fleet.provider(Arc::new(MoveRegistry::new()));
        // Reserving picks the emptiest (vol1); it must then sort last.
        let reserved = provider.reserve_direct().unwrap();
        assert_eq!(reserved.root, fleet.roots[1]);

        let order: Vec<PathBuf> = provider
            .ranked_move_destinations()
            .into_iter()
            .map(|v| v.root)
            .collect();
        assert_eq!(
            order,
            vec![
                fleet.roots[2].clone(),
                fleet.roots[0].clone(),
                fleet.roots[1].clone()
            ]
        );
    }

    #[test]
    fn test_capacity_slots() {
        let fleet = Fleet::new(2);
        fleet.source.set_space(&fleet.roots[0], 1000, 350); // 3 slots at threshold 100
        fleet.source.set_space(&fleet.roots[1], 1000, 120); // 1 slot

        let provider = fleet.provider(Arc::new(MoveRegistry::new()));
        assert_eq!(provider.capacity_slots(), 4);
    }

    #[test]
    fn test_network_share_cache_reprobes_only_on_root_set_change() {
        let fleet = Fleet::new(2);
        let provider = fleet.provider(Arc::new(MoveRegistry::new()));

        provider.list_available();
        provider.list_available();
        assert_eq!(fleet.source.probe_count(), 2);

        // Same root set: no re-probing.
        provider.list_available();
        assert_eq!(fleet.source.probe_count(), 2);

        // A new root triggers one probe for it alone.
        let extra = fleet._dir.path().join("vol-extra");
        std::fs::create_dir_all(extra.join(DEST_DIR_NAME)).unwrap();
        fleet.source.add_volume(&extra, 1000, 500);
        provider.list_available();
        assert_eq!(fleet.source.probe_count(), 3);
    }
}
