//! Move scheduler integration tests: claim serialization, release
//! wakeups, and end-to-end file migration.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use plotforge_core::{
    DestinationLister, DestinationVolume, FileMover, MoveRegistry, MoveScheduler,
    testing::MockSpaceProbe,
};

/// Lister over a fixed, mutable candidate list.
struct FixedLister {
    volumes: Mutex<Vec<DestinationVolume>>,
}

impl FixedLister {
    fn new(volumes: Vec<DestinationVolume>) -> Self {
        Self {
            volumes: Mutex::new(volumes),
        }
    }
}

impl DestinationLister for FixedLister {
    fn move_destinations(&self) -> Vec<DestinationVolume> {
        self.volumes.lock().unwrap().clone()
    }
}

fn volume_for(dir: &Path) -> DestinationVolume {
    DestinationVolume {
        dir: dir.to_path_buf(),
        root: dir.parent().unwrap().to_path_buf(),
        total_space: 1_000_000,
        usable_space: 900_000,
        free_space: 900_000,
        direct_reserved: false,
        network_share: false,
    }
}

struct Rig {
    registry: Arc<MoveRegistry>,
    scheduler: MoveScheduler,
}

impl Rig {
    fn new() -> Self {
        let registry = Arc::new(MoveRegistry::new());
        let mover = Arc::new(FileMover::new(Arc::new(MockSpaceProbe::unlimited())));
        let scheduler = MoveScheduler::new(Arc::clone(&registry), mover)
            .with_claim_wait(Duration::from_millis(50));
        Self {
            registry,
            scheduler,
        }
    }
}

async fn wait_until_drained(registry: &MoveRegistry, timeout: Duration) {
    let start = std::time::Instant::now();
    while registry.active_count() > 0 {
        assert!(
            start.elapsed() < timeout,
            "moves did not drain within {:?}",
            timeout
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn make_source(temp: &TempDir, name: &str, size: usize) -> PathBuf {
    let dir = temp.path().join("src");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let body: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, body).unwrap();
    path
}

#[tokio::test]
async fn test_move_lands_on_destination() {
    let temp = TempDir::new().unwrap();
    let dest_dir = temp.path().join("vol0/plots");
    std::fs::create_dir_all(&dest_dir).unwrap();
    let source = make_source(&temp, "plot-a.plot", 8192);

    let rig = Rig::new();
    let lister = Arc::new(FixedLister::new(vec![volume_for(&dest_dir)]));
    rig.scheduler
        .schedule(source.clone(), "q1", lister, Duration::ZERO)
        .await;

    wait_until_drained(&rig.registry, Duration::from_secs(10)).await;
    assert!(dest_dir.join("plot-a.plot").exists());
    assert!(!source.exists());
    assert!(!dest_dir.join("plot-a.plot.moving").exists());
}

#[tokio::test]
async fn test_two_moves_share_one_volume_sequentially() {
    let temp = TempDir::new().unwrap();
    let dest_dir = temp.path().join("vol0/plots");
    std::fs::create_dir_all(&dest_dir).unwrap();
    let source_a = make_source(&temp, "plot-a.plot", 4096);
    let source_b = make_source(&temp, "plot-b.plot", 4096);

    let rig = Rig::new();
    let lister: Arc<FixedLister> = Arc::new(FixedLister::new(vec![volume_for(&dest_dir)]));
    rig.scheduler
        .schedule(source_a.clone(), "q1", lister.clone(), Duration::ZERO)
        .await;
    rig.scheduler
        .schedule(source_b.clone(), "q2", lister, Duration::ZERO)
        .await;

    // Only one task can hold the volume at a time; the second waits for
    // the first release and then claims it.
    wait_until_drained(&rig.registry, Duration::from_secs(10)).await;
    assert!(dest_dir.join("plot-a.plot").exists());
    assert!(dest_dir.join("plot-b.plot").exists());
    assert!(!source_a.exists());
    assert!(!source_b.exists());
}

#[tokio::test]
async fn test_moves_spread_across_volumes() {
    let temp = TempDir::new().unwrap();
    let dest_a = temp.path().join("vol0/plots");
    let dest_b = temp.path().join("vol1/plots");
    std::fs::create_dir_all(&dest_a).unwrap();
    std::fs::create_dir_all(&dest_b).unwrap();
    let source_a = make_source(&temp, "plot-a.plot", 4096);
    let source_b = make_source(&temp, "plot-b.plot", 4096);

    let rig = Rig::new();
    let lister: Arc<FixedLister> = Arc::new(FixedLister::new(vec![
        volume_for(&dest_a),
        volume_for(&dest_b),
    ]));
    rig.scheduler
        .schedule(source_a, "q1", lister.clone(), Duration::ZERO)
        .await;
    rig.scheduler
        .schedule(source_b, "q2", lister, Duration::ZERO)
        .await;

    wait_until_drained(&rig.registry, Duration::from_secs(10)).await;
    // Both plots landed; each volume received at most one (the second
    // task skips the volume the first one claimed).
    let on_a = dest_a.read_dir().unwrap().count();
    let on_b = dest_b.read_dir().unwrap().count();
    assert_eq!(on_a + on_b, 2);
}

#[tokio::test]
async fn test_missing_source_releases_task() {
    let temp = TempDir::new().unwrap();
    let dest_dir = temp.path().join("vol0/plots");
    std::fs::create_dir_all(&dest_dir).unwrap();

    let rig = Rig::new();
    let lister = Arc::new(FixedLister::new(vec![volume_for(&dest_dir)]));
    rig.scheduler
        .schedule(
            temp.path().join("src/never-existed.plot"),
            "q1",
            lister,
            Duration::ZERO,
        )
        .await;

    // The transfer fails with NotFound; the task must still release its
    // claim and leave the registry.
    wait_until_drained(&rig.registry, Duration::from_secs(10)).await;
    assert_eq!(rig.registry.active_count(), 0);
    assert_eq!(dest_dir.read_dir().unwrap().count(), 0);
}

#[tokio::test]
async fn test_delayed_move_waits_before_claiming() {
    let temp = TempDir::new().unwrap();
    let dest_dir = temp.path().join("vol0/plots");
    std::fs::create_dir_all(&dest_dir).unwrap();
    let source = make_source(&temp, "plot-a.plot", 4096);

    let rig = Rig::new();
    let lister = Arc::new(FixedLister::new(vec![volume_for(&dest_dir)]));
    rig.scheduler
        .schedule(source, "q1", lister, Duration::from_millis(300))
        .await;

    // During the start delay the task exists but holds no claim.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rig.registry.active_count(), 1);
    assert_eq!(rig.registry.unclaimed_count(), 1);

    wait_until_drained(&rig.registry, Duration::from_secs(10)).await;
    assert!(dest_dir.join("plot-a.plot").exists());
}
