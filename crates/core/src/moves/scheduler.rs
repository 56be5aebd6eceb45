//! Concurrent move scheduling with per-volume claim serialization.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::transfer::{FileMover, TransferControls};
use crate::volume::DestinationVolume;

use super::registry::MoveRegistry;

/// Upper bound on one wait for a claimable destination; a claim release
/// wakes waiters earlier.
const CLAIM_WAIT_BOUND: Duration = Duration::from_secs(120);

/// Supplies the current ordered move-destination candidates.
///
/// Injected into the scheduler so destination selection stays the
/// provider's concern.
pub trait DestinationLister: Send + Sync {
    fn move_destinations(&self) -> Vec<DestinationVolume>;
}

/// Runs each accepted move in its own task, serializing volume claims
/// through the shared [`MoveRegistry`].
pub struct MoveScheduler {
    registry: Arc<MoveRegistry>,
    mover: Arc<FileMover>,
    claim_wait: Duration,
}

impl MoveScheduler {
    pub fn new(registry: Arc<MoveRegistry>, mover: Arc<FileMover>) -> Self {
        Self {
            registry,
            mover,
            claim_wait: CLAIM_WAIT_BOUND,
        }
    }

    /// Overrides the bounded claim wait; used by tests.
    pub fn with_claim_wait(mut self, claim_wait: Duration) -> Self {
        self.claim_wait = claim_wait;
        self
    }

    /// Registers and starts one move. Returns the task id immediately;
    /// the transfer runs in the background.
    pub async fn schedule(
        &self,
        source: PathBuf,
        queue: &str,
        destinations: Arc<dyn DestinationLister>,
        start_delay: Duration,
    ) -> u64 {
        let size = tokio::fs::metadata(&source)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        let controls = TransferControls::new();
        let id = self
            .registry
            .register(queue, &source, size, controls.clone());

        let registry = Arc::clone(&self.registry);
        let mover = Arc::clone(&self.mover);
        let claim_wait = self.claim_wait;
        let queue = queue.to_string();
        tokio::spawn(async move {
            run_move(
                id,
                source,
                queue,
                destinations,
                start_delay,
                registry,
                mover,
                controls,
                claim_wait,
            )
            .await;
        });
        id
    }

    /// Number of moves in flight, claimed or not.
    pub fn active_moves(&self) -> usize {
        self.registry.active_count()
    }

    /// Number of moves still waiting to claim a destination.
    pub fn pending_moves(&self) -> usize {
        self.registry.unclaimed_count()
    }

    /// Raises the cancel flag on every in-flight transfer.
    pub fn cancel_active_transfers(&self) {
        self.registry.cancel_all();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_move(
    id: u64,
    source: PathBuf,
    queue: String,
    destinations: Arc<dyn DestinationLister>,
    start_delay: Duration,
    registry: Arc<MoveRegistry>,
    mover: Arc<FileMover>,
    controls: TransferControls,
    claim_wait: Duration,
) {
    if !start_delay.is_zero() {
        info!(
            "{}: Delaying move for {:?}. File: {}",
            queue,
            start_delay,
            source.display()
        );
        tokio::time::sleep(start_delay).await;
    }

    let claimed = loop {
        let candidates = destinations.move_destinations();
        if let Some(volume) = registry.try_claim(id, &candidates) {
            break volume;
        }
        debug!(
            "{}: No claimable move destination for {}; waiting",
            queue,
            source.display()
        );
        registry.wait_for_release(claim_wait).await;
    };

    info!(
        "{}: Move START. File {} to {}",
        queue,
        source.display(),
        claimed.dir.display()
    );
    let started = Instant::now();
    let progress = registry.progress_counter(id).unwrap_or_default();
    let result = mover
        .move_file(&source, &claimed.dir, &controls, |bytes| {
            progress.store(bytes, Ordering::Relaxed);
        })
        .await;

    match result {
        Ok(final_path) => info!(
            "{}: Move FINISHED. Runtime: {:?}. File {} to {}",
            queue,
            started.elapsed(),
            source.display(),
            final_path.display()
        ),
        Err(e) => warn!(
            "{}: Move ERROR for {}: {}",
            queue,
            source.display(),
            e
        ),
    }

    registry.release(id);
}
