//! Supervision of one plot job: directory preparation, output stream
//! consumption, transcript logging, completion.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::launcher::PlotLauncher;
use super::progress::{ProgressEvent, ProgressTracker};
use super::types::{CompletedPlot, JobOutput, PlotError, PlotJobSpec};

/// Directory for per-run transcript logs.
pub const TRANSCRIPT_DIR_NAME: &str = "log";

/// Plotter scratch files cleaned up before a launch.
pub const TMP_FILE_EXT: &str = ".tmp";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Runs plot jobs one at a time and turns their output stream into a
/// [`CompletedPlot`]. The output channel closing is the completion
/// sentinel, so the callback fires exactly once per job.
pub struct PlotSupervisor {
    launcher: Arc<dyn PlotLauncher>,
    log_dir: PathBuf,
}

impl PlotSupervisor {
    pub fn new(launcher: Arc<dyn PlotLauncher>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            launcher,
            log_dir: log_dir.into(),
        }
    }

    /// Runs one job to completion.
    pub async fn run(&self, spec: PlotJobSpec) -> Result<CompletedPlot, PlotError> {
        let started_at = Utc::now();
        self.prepare(&spec).await?;

        let mut job = self.launcher.launch(&spec).await?;
        let mut tracker = ProgressTracker::new();
        let mut transcript = Transcript::new(self.log_dir.clone());

        while let Some(output) = job.output.recv().await {
            match output {
                JobOutput::Stdout(line) => {
                    match tracker.observe(&line) {
                        Some(ProgressEvent::RunId(id)) => {
                            debug!("{}: plot run id: {}", spec.queue, id);
                            transcript.bind_run_id(&id).await;
                        }
                        Some(ProgressEvent::FinalFile(name)) => {
                            info!("{}: final plot file: {}", spec.queue, name);
                            transcript.bind_final_file(&name).await;
                        }
                        Some(ProgressEvent::Phase(phase)) => {
                            info!("{}: entering phase {}", spec.queue, phase);
                        }
                        _ => {}
                    }
                    transcript.append(&line).await;
                }
                JobOutput::Stderr(line) => {
                    warn!("{}: plotter stderr: {}", spec.queue, line);
                }
            }
        }

        Ok(CompletedPlot {
            queue: spec.queue,
            tmp_dir: spec.tmp_dir,
            inter_dir: spec.inter_dir,
            direct: spec.direct,
            run_id: tracker.run_id().map(str::to_string),
            plot_file_name: tracker.final_file().map(str::to_string),
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn prepare(&self, spec: &PlotJobSpec) -> Result<(), PlotError> {
        fs::create_dir_all(&spec.tmp_dir)
            .await
            .map_err(PlotError::Prepare)?;
        fs::create_dir_all(&spec.inter_dir)
            .await
            .map_err(PlotError::Prepare)?;
        fs::create_dir_all(&self.log_dir)
            .await
            .map_err(PlotError::Prepare)?;

        remove_stale_tmp_files(&spec.tmp_dir).await;
        if !spec.direct {
            remove_stale_tmp_files(&spec.inter_dir).await;
        }
        Ok(())
    }
}

/// Deletes leftover plotter scratch files from an aborted earlier run.
async fn remove_stale_tmp_files(dir: &Path) {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to scan {} for stale files: {}", dir.display(), e);
            return;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_tmp = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(TMP_FILE_EXT))
            .unwrap_or(false);
        if is_tmp && path.is_file() {
            debug!("Removing stale temp file: {}", path.display());
            if let Err(e) = fs::remove_file(&path).await {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Per-run transcript log. Lines arriving before the run id is known are
/// buffered and flushed verbatim once it is; the file is renamed after the
/// final plot file name when that becomes known.
struct Transcript {
    dir: PathBuf,
    buffer: Vec<String>,
    file: Option<PathBuf>,
}

impl Transcript {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            buffer: Vec::new(),
            file: None,
        }
    }

    async fn append(&mut self, line: &str) {
        let stamped = format!("{}: {}", Utc::now().format(TIMESTAMP_FORMAT), line);
        match &self.file {
            None => self.buffer.push(stamped),
            Some(path) => append_line(path, &stamped).await,
        }
    }

    async fn bind_run_id(&mut self, run_id: &str) {
        if self.file.is_some() {
            return;
        }
        let path = self.dir.join(format!("{}.log", run_id));
        for line in self.buffer.drain(..) {
            append_line(&path, &line).await;
        }
        self.file = Some(path);
    }

    async fn bind_final_file(&mut self, plot_name: &str) {
        let Some(current) = self.file.clone() else {
            return;
        };
        let target = self.dir.join(format!("{}.log", plot_name));
        match fs::rename(&current, &target).await {
            Ok(()) => self.file = Some(target),
            Err(e) => warn!(
                "Failed to rename transcript {} -> {}: {}",
                current.display(),
                target.display(),
                e
            ),
        }
    }
}

async fn append_line(path: &Path, line: &str) {
    let result = async {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await
    }
    .await;
    if let Err(e) = result {
        warn!("Failed to write transcript {}: {}", path.display(), e);
    }
}
