//! plotforge-core: orchestration of long-running plot-production jobs and
//! migration of their output across a changing fleet of volumes.
//!
//! Components, leaf first:
//! - [`volume`]: volume discovery and destination selection with
//!   reservation-adjusted free-space accounting.
//! - [`transfer`]: the resilient single-file move primitive.
//! - [`moves`]: the concurrent move scheduler and claim registry.
//! - [`plotter`]: plot-job launching, progress parsing, supervision.
//! - [`orchestrator`]: per-queue lifecycle and the top-level control loop.

pub mod config;
pub mod moves;
pub mod orchestrator;
pub mod plotter;
pub mod stats;
pub mod testing;
pub mod transfer;
pub mod volume;

pub use config::{
    load_settings, load_settings_from_str, ConfigError, ConfigState, DestinationSpec, QueueSpec,
    ReloadOutcome, Settings,
};
pub use moves::{DestinationLister, MoveRegistry, MoveScheduler, MoveTaskSnapshot};
pub use orchestrator::{
    OrchestratorStatus, PlotOrchestrator, QueuePhase, StopSignal, STOP_FILE_NAME, TMP_DIR_NAME,
};
pub use plotter::{
    CompletedPlot, JobOutput, LaunchError, LaunchedJob, PlotError, PlotJobSpec, PlotLauncher,
    PlotSupervisor, ProcessPlotLauncher, ProgressEvent, ProgressTracker, TRANSCRIPT_DIR_NAME,
};
pub use stats::{StatsLog, STATS_LOG_NAME};
pub use transfer::{FileMover, TransferControls, TransferError};
pub use volume::{
    DestinationProvider, DestinationVolume, MountedVolume, SpaceProbe, SysinfoSpaceProbe,
    SysinfoVolumeSource, VolumeSource, DEST_DIR_NAME, FREE_SPACE_THRESHOLD, NO_WRITE_FILE,
};
