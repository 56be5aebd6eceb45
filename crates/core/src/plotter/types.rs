//! Types for plot job launching and supervision.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur while launching the external plotter.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Plotter executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("Failed to spawn plotter: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while running one plot job.
#[derive(Debug, Error)]
pub enum PlotError {
    #[error("Failed to launch plot job: {0}")]
    Launch(#[from] LaunchError),

    #[error("Failed to prepare plot directories: {0}")]
    Prepare(#[source] std::io::Error),
}

/// One attempt of a plot job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotJobSpec {
    /// Owning queue name.
    pub queue: String,
    /// Primary temp directory for the job.
    pub tmp_dir: PathBuf,
    /// Intermediate directory: a scratch dir, or the reserved destination
    /// directory when plotting direct.
    pub inter_dir: PathBuf,
    /// Whether `inter_dir` is the final destination (direct mode).
    pub direct: bool,
    /// Memory budget in MiB.
    pub memory_mib: u32,
    /// Worker threads.
    pub threads: u32,
}

/// A line of plotter output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutput {
    Stdout(String),
    Stderr(String),
}

/// A launched plot job. The `output` channel carries both stream's lines;
/// the channel closing marks end of stream and is the only completion
/// signal.
pub struct LaunchedJob {
    pub output: mpsc::UnboundedReceiver<JobOutput>,
}

/// The outcome of one finished plot job.
#[derive(Debug, Clone)]
pub struct CompletedPlot {
    pub queue: String,
    pub tmp_dir: PathBuf,
    pub inter_dir: PathBuf,
    pub direct: bool,
    /// Run identifier emitted by the plotter, when one was seen.
    pub run_id: Option<String>,
    /// Final plot file name, when the job produced one.
    pub plot_file_name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CompletedPlot {
    /// Wall-clock runtime of the job.
    pub fn runtime(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
