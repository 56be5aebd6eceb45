//! Types for the queue orchestrator.

use serde::Serialize;

/// Lifecycle phase of a tracked queue. Untracked queues are either not
/// configured yet or already stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePhase {
    /// Waiting out its staggered start delay.
    Delaying,
    /// Launching jobs back to back.
    Running,
}

/// Point-in-time view of the orchestrator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorStatus {
    /// Queues currently tracked (delaying or running).
    pub tracked_queues: usize,
    /// Queues past their start delay.
    pub running_queues: usize,
    /// Moves in flight, claimed or not.
    pub active_moves: usize,
    /// Moves still waiting to claim a destination volume.
    pub pending_moves: usize,
    /// Outstanding direct-destination reservations.
    pub direct_reservations: usize,
}
