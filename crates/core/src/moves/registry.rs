//! Tracking of in-flight move tasks and destination-volume claims.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::transfer::TransferControls;
use crate::volume::DestinationVolume;

/// One tracked move.
#[derive(Debug)]
struct MoveTask {
    queue: String,
    source: PathBuf,
    size: u64,
    claimed: Option<PathBuf>,
    moved: Arc<AtomicU64>,
    controls: TransferControls,
}

/// Read-only view of a tracked move.
#[derive(Debug, Clone)]
pub struct MoveTaskSnapshot {
    pub id: u64,
    pub queue: String,
    pub source: PathBuf,
    pub size: u64,
    pub claimed: Option<PathBuf>,
    pub moved_bytes: u64,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    tasks: HashMap<u64, MoveTask>,
}

/// Registry of in-flight moves.
///
/// Claiming a destination and testing "already claimed" are atomic with
/// respect to each other; releasing a claim wakes tasks waiting for one.
/// The destination provider subtracts each claimant's remaining bytes from
/// the claimed volume's free space.
#[derive(Debug, Default)]
pub struct MoveRegistry {
    inner: Mutex<Inner>,
    released: Notify,
}

impl MoveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new move; it counts as pending until a volume is
    /// claimed for it.
    pub fn register(
        &self,
        queue: &str,
        source: &Path,
        size: u64,
        controls: TransferControls,
    ) -> u64 {
        let mut inner = self.inner.lock().expect("move registry lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.tasks.insert(
            id,
            MoveTask {
                queue: queue.to_string(),
                source: source.to_path_buf(),
                size,
                claimed: None,
                moved: Arc::new(AtomicU64::new(0)),
                controls,
            },
        );
        id
    }

    /// Claims the first candidate not already claimed by another live
    /// task. Returns `None` when every candidate is taken.
    pub fn try_claim(
        &self,
        id: u64,
        candidates: &[DestinationVolume],
    ) -> Option<DestinationVolume> {
        let mut inner = self.inner.lock().expect("move registry lock poisoned");
        let taken: Vec<PathBuf> = inner
            .tasks
            .iter()
            .filter(|(task_id, _)| **task_id != id)
            .filter_map(|(_, task)| task.claimed.clone())
            .collect();
        let choice = candidates
            .iter()
            .find(|candidate| !taken.contains(&candidate.dir))?
            .clone();
        inner.tasks.get_mut(&id)?.claimed = Some(choice.dir.clone());
        Some(choice)
    }

    /// Removes a finished task, releasing its claim and waking waiters.
    pub fn release(&self, id: u64) {
        let removed = {
            let mut inner = self.inner.lock().expect("move registry lock poisoned");
            inner.tasks.remove(&id)
        };
        if removed.is_some() {
            self.released.notify_waiters();
        }
    }

    /// Progress counter for a task; the transfer's progress callback
    /// advances it.
    pub fn progress_counter(&self, id: u64) -> Option<Arc<AtomicU64>> {
        let inner = self.inner.lock().expect("move registry lock poisoned");
        inner.tasks.get(&id).map(|task| Arc::clone(&task.moved))
    }

    /// Number of live move tasks, claimed or not.
    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .expect("move registry lock poisoned")
            .tasks
            .len()
    }

    /// Number of live tasks that have not claimed a destination yet.
    pub fn unclaimed_count(&self) -> usize {
        self.inner
            .lock()
            .expect("move registry lock poisoned")
            .tasks
            .values()
            .filter(|task| task.claimed.is_none())
            .count()
    }

    /// Bytes still owed to moves currently claiming `dir`.
    pub fn claimed_bytes_remaining(&self, dir: &Path) -> u64 {
        let inner = self.inner.lock().expect("move registry lock poisoned");
        inner
            .tasks
            .values()
            .filter(|task| task.claimed.as_deref() == Some(dir))
            .map(|task| {
                task.size
                    .saturating_sub(task.moved.load(Ordering::Relaxed))
            })
            .sum()
    }

    /// The task currently claiming `dir`, if any.
    pub fn claimant(&self, dir: &Path) -> Option<MoveTaskSnapshot> {
        let inner = self.inner.lock().expect("move registry lock poisoned");
        inner
            .tasks
            .iter()
            .find(|(_, task)| task.claimed.as_deref() == Some(dir))
            .map(|(id, task)| MoveTaskSnapshot {
                id: *id,
                queue: task.queue.clone(),
                source: task.source.clone(),
                size: task.size,
                claimed: task.claimed.clone(),
                moved_bytes: task.moved.load(Ordering::Relaxed),
            })
    }

    /// Raises the cancel flag on every live transfer.
    pub fn cancel_all(&self) {
        let inner = self.inner.lock().expect("move registry lock poisoned");
        for task in inner.tasks.values() {
            task.controls.cancel();
        }
    }

    /// Waits until some claim is released, bounded by `bound`.
    pub async fn wait_for_release(&self, bound: Duration) {
        tokio::select! {
            _ = self.released.notified() => {}
            _ = tokio::time::sleep(bound) => {}
        }
    }
}
