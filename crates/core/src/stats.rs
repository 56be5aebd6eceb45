//! Append-only run-statistics log.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::plotter::CompletedPlot;

/// Default stats log file name, in the working directory.
pub const STATS_LOG_NAME: &str = "plotting.log";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Writes one line per completed plot job. Failures are logged and
/// swallowed; statistics never break the orchestrator.
pub struct StatsLog {
    path: PathBuf,
}

impl StatsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the record for one completed job.
    pub async fn append(&self, plot: &CompletedPlot) {
        let line = Self::format_record(plot);
        let result = async {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!("Failed to append stats to {}: {}", self.path.display(), e);
        }
    }

    fn format_record(plot: &CompletedPlot) -> String {
        format!(
            "{} {}\t{} {} -> {} {} {}\n",
            plot.finished_at.format(TIMESTAMP_FORMAT),
            format_runtime(plot.runtime()),
            plot.queue,
            plot.tmp_dir.display(),
            plot.inter_dir.display(),
            plot.run_id.as_deref().unwrap_or("-"),
            plot.plot_file_name.as_deref().unwrap_or("-"),
        )
    }
}

fn format_runtime(runtime: chrono::Duration) -> String {
    let secs = runtime.num_seconds().max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
