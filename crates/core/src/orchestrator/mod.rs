//! Top-level queue orchestration.

mod runner;
mod stop;
mod types;

pub use runner::{PlotOrchestrator, TMP_DIR_NAME};
pub use stop::{StopSignal, STOP_FILE_NAME};
pub use types::{OrchestratorStatus, QueuePhase};
