//! The queue orchestrator: owns per-queue lifecycle, direct-destination
//! reservations, and the hand-off of finished plots to the move scheduler.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{ConfigState, DestinationSpec, ReloadOutcome};
use crate::moves::{DestinationLister, MoveScheduler};
use crate::plotter::{PlotJobSpec, PlotSupervisor};
use crate::stats::StatsLog;
use crate::volume::DestinationProvider;

use super::stop::StopSignal;
use super::types::{OrchestratorStatus, QueuePhase};

/// Scratch subdirectory used on source and intermediate volumes.
pub const TMP_DIR_NAME: &str = "plots-tmp";

/// Config/volume poll period of the control loop.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Pause between initial queue creation and the first poll.
const INITIAL_SETTLE: Duration = Duration::from_secs(2);

/// How often the stop signal is checked during a stagger delay.
const STOP_CHECK_INTERVAL: Duration = Duration::from_secs(5);

struct Shared {
    config: Arc<ConfigState>,
    provider: Arc<DestinationProvider>,
    scheduler: Arc<MoveScheduler>,
    supervisor: Arc<PlotSupervisor>,
    stats: Arc<StatsLog>,
    stop: Arc<StopSignal>,
    queues: Mutex<HashMap<String, QueuePhase>>,
}

/// Top-level control loop. One task per queue launches jobs strictly
/// sequentially; queues and moves run in parallel with each other.
pub struct PlotOrchestrator {
    shared: Arc<Shared>,
    launch_seq: AtomicU64,
}

impl PlotOrchestrator {
    pub fn new(
        config: Arc<ConfigState>,
        provider: Arc<DestinationProvider>,
        scheduler: Arc<MoveScheduler>,
        supervisor: Arc<PlotSupervisor>,
        stats: Arc<StatsLog>,
        stop: Arc<StopSignal>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                provider,
                scheduler,
                supervisor,
                stats,
                stop,
                queues: Mutex::new(HashMap::new()),
            }),
            launch_seq: AtomicU64::new(0),
        }
    }

    /// Current queue/move counts.
    pub fn status(&self) -> OrchestratorStatus {
        let queues = self.shared.queues.lock().expect("queue table lock poisoned");
        OrchestratorStatus {
            tracked_queues: queues.len(),
            running_queues: queues
                .values()
                .filter(|phase| **phase == QueuePhase::Running)
                .count(),
            active_moves: self.shared.scheduler.active_moves(),
            pending_moves: self.shared.scheduler.pending_moves(),
            direct_reservations: self.shared.provider.direct_reservations(),
        }
    }

    /// Runs until every queue has stopped and every move has drained.
    pub async fn run(&self) {
        let shared = &self.shared;
        info!(
            "Orchestrator started. Watching for stop file: {}",
            shared.stop.file().display()
        );

        let mut known_dests: HashSet<PathBuf> = shared
            .provider
            .list_available()
            .into_iter()
            .map(|v| v.dir)
            .collect();
        info!("Available destinations: {:?}", known_dests);

        for name in shared.config.queue_names() {
            self.spawn_queue(&name, true);
        }
        tokio::time::sleep(INITIAL_SETTLE).await;

        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            let config_changed = shared.config.reload() == ReloadOutcome::Changed;
            let current_dests: HashSet<PathBuf> = shared
                .provider
                .list_available()
                .into_iter()
                .map(|v| v.dir)
                .collect();
            let dests_changed = current_dests != known_dests;
            if dests_changed {
                for dir in current_dests.difference(&known_dests) {
                    info!("Detected new destination volume: {}", dir.display());
                }
                for dir in known_dests.difference(&current_dests) {
                    info!("Removing destination volume: {}", dir.display());
                }
                known_dests = current_dests;
            }

            // Any change restarts configured queues that are not tracked;
            // relaunches get no extra stagger.
            if config_changed || dests_changed {
                for name in shared.config.queue_names() {
                    self.spawn_queue(&name, false);
                }
            }

            let tracked = shared
                .queues
                .lock()
                .expect("queue table lock poisoned")
                .len();
            let moves = shared.scheduler.active_moves();
            debug!("Orchestrator poll: {} queues, {} moves", tracked, moves);
            if tracked == 0 && moves == 0 {
                break;
            }
        }

        info!("Orchestrator finished");
    }

    /// Creates the task for one queue unless it is already tracked.
    fn spawn_queue(&self, name: &str, staggered: bool) {
        {
            let mut queues = self.shared.queues.lock().expect("queue table lock poisoned");
            if queues.contains_key(name) {
                return;
            }
            queues.insert(name.to_string(), QueuePhase::Delaying);
        }

        let delay = if staggered {
            let seq = self.launch_seq.fetch_add(1, Ordering::SeqCst) as u32;
            self.shared.config.settings().queue_stagger() * seq
        } else {
            Duration::ZERO
        };

        info!("Creating process queue \"{}\" (delay {:?})", name, delay);
        let shared = Arc::clone(&self.shared);
        let name = name.to_string();
        tokio::spawn(async move {
            run_queue(shared, name, delay).await;
        });
    }
}

/// One queue's life: optional stagger delay, then launch jobs back to back
/// until a stop condition is met.
async fn run_queue(shared: Arc<Shared>, name: String, delay: Duration) {
    if !delay.is_zero() {
        info!("{}: Delaying queue start for {:?}", name, delay);
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            if shared.stop.is_requested() {
                info!("{}: Stop requested during start delay", name);
                remove_queue(&shared, &name);
                return;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(STOP_CHECK_INTERVAL.min(deadline - now)).await;
        }
    }

    shared
        .queues
        .lock()
        .expect("queue table lock poisoned")
        .insert(name.clone(), QueuePhase::Running);

    loop {
        if shared.stop.is_requested() {
            info!(
                "{}: Stop file detected ({}). Exiting queue",
                name,
                shared.stop.file().display()
            );
            break;
        }

        // Pending unclaimed moves consume whole threshold-slots, so a
        // queue only keeps running while the fleet can absorb its output
        // on top of everything already waiting.
        let slots = shared.provider.capacity_slots();
        let pending = shared.scheduler.pending_moves() as u64;
        if slots <= pending {
            info!(
                "{}: No destination space left ({} slots, {} pending moves). Exiting queue",
                name, slots, pending
            );
            break;
        }

        let Some(spec) = shared.config.queue(&name) else {
            info!("{}: Queue removed from config. Exiting queue", name);
            break;
        };
        let settings = shared.config.settings();

        let tmp_dir = spec.source.join(TMP_DIR_NAME).join(&name);
        let (inter_dir, reservation) = match &spec.destination {
            DestinationSpec::Direct => match shared.provider.reserve_direct() {
                Some(volume) => (volume.dir.clone(), Some(volume.dir)),
                None => {
                    info!(
                        "{}: No available volumes for direct destination. Exiting queue",
                        name
                    );
                    break;
                }
            },
            DestinationSpec::Volume(root) => (root.join(TMP_DIR_NAME).join(&name), None),
        };

        info!(
            "{}: Starting plot job {} -> {} (direct: {})",
            name,
            tmp_dir.display(),
            inter_dir.display(),
            reservation.is_some()
        );
        let job = PlotJobSpec {
            queue: name.clone(),
            tmp_dir: tmp_dir.clone(),
            inter_dir: inter_dir.clone(),
            direct: reservation.is_some(),
            memory_mib: settings.memory_mib,
            threads: settings.threads,
        };

        match shared.supervisor.run(job).await {
            Ok(completed) => {
                info!(
                    "{}: Plot job complete. Runtime: {}",
                    name,
                    completed.runtime()
                );
                shared.stats.append(&completed).await;

                if let Some(dir) = reservation {
                    shared.provider.release_direct(&dir);
                } else if let Some(plot_name) = &completed.plot_file_name {
                    // Moving a plot off the volume it was just written to
                    // competes with the next job's writes; give it a head
                    // start.
                    let move_delay = if inter_dir == tmp_dir {
                        settings.move_delay()
                    } else {
                        Duration::ZERO
                    };
                    let lister: Arc<dyn DestinationLister> = shared.provider.clone();
                    shared
                        .scheduler
                        .schedule(inter_dir.join(plot_name), &name, lister, move_delay)
                        .await;
                } else {
                    warn!("{}: Job produced no plot file; skipping move", name);
                }
            }
            Err(e) => {
                error!("{}: Plot job failed: {}. Exiting queue", name, e);
                if let Some(dir) = reservation {
                    shared.provider.release_direct(&dir);
                }
                break;
            }
        }
    }

    remove_queue(&shared, &name);
    info!("{}: Queue exited", name);
}

fn remove_queue(shared: &Shared, name: &str) {
    shared
        .queues
        .lock()
        .expect("queue table lock poisoned")
        .remove(name);
}
