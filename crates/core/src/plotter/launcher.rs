//! Launching the external plotter process.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::types::{JobOutput, LaunchError, LaunchedJob, PlotJobSpec};

/// Starts one plot job and exposes its output streams as a line channel.
#[async_trait]
pub trait PlotLauncher: Send + Sync {
    async fn launch(&self, spec: &PlotJobSpec) -> Result<LaunchedJob, LaunchError>;
}

/// Launches the real plotter executable.
pub struct ProcessPlotLauncher {
    executable: PathBuf,
}

impl ProcessPlotLauncher {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    fn build_command(&self, spec: &PlotJobSpec) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(["plots", "create", "-k", "32", "-u", "128", "-n", "1"])
            .arg("-b")
            .arg(spec.memory_mib.to_string())
            .arg("-r")
            .arg(spec.threads.to_string())
            .arg("-t")
            .arg(&spec.tmp_dir)
            .arg("-2")
            .arg(&spec.inter_dir)
            .arg("-d")
            .arg(&spec.inter_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

#[async_trait]
impl PlotLauncher for ProcessPlotLauncher {
    async fn launch(&self, spec: &PlotJobSpec) -> Result<LaunchedJob, LaunchError> {
        if !self.executable.exists() {
            return Err(LaunchError::ExecutableNotFound(self.executable.clone()));
        }

        let mut child = self
            .build_command(spec)
            .spawn()
            .map_err(LaunchError::Spawn)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LaunchError::Spawn(std::io::Error::other("stdout not piped")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| LaunchError::Spawn(std::io::Error::other("stderr not piped")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_line_reader(stdout, tx.clone(), JobOutput::Stdout);
        spawn_line_reader(stderr, tx, JobOutput::Stderr);

        let queue = spec.queue.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("{}: plotter exited with {}", queue, status),
                Err(e) => warn!("{}: failed to reap plotter process: {}", queue, e),
            }
        });

        Ok(LaunchedJob { output: rx })
    }
}

/// Reads lines from one stream into the shared channel. The channel closes
/// once both readers have dropped their senders.
fn spawn_line_reader(
    stream: impl AsyncRead + Unpin + Send + 'static,
    tx: mpsc::UnboundedSender<JobOutput>,
    wrap: fn(String) -> JobOutput,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(wrap(line)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Error reading plotter output: {}", e);
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_executable() {
        let launcher = ProcessPlotLauncher::new("/nonexistent/plotter");
        let spec = PlotJobSpec {
            queue: "q1".to_string(),
            tmp_dir: "/tmp/a".into(),
            inter_dir: "/tmp/b".into(),
            direct: false,
            memory_mib: 3500,
            threads: 4,
        };
        let result = launcher.launch(&spec).await;
        assert!(matches!(result, Err(LaunchError::ExecutableNotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_streams_lines_until_exit() {
        // A shell stands in for the plotter; the channel must deliver both
        // streams and close when the process exits.
        let launcher = ProcessPlotLauncher::new("/bin/sh");
        let spec = PlotJobSpec {
            queue: "q1".to_string(),
            tmp_dir: "/tmp/a".into(),
            inter_dir: "/tmp/b".into(),
            direct: false,
            memory_mib: 3500,
            threads: 4,
        };
        // `sh plots create ...` fails immediately with output on stderr.
        let mut job = launcher.launch(&spec).await.unwrap();
        let mut saw_any = false;
        while let Some(output) = job.output.recv().await {
            match output {
                JobOutput::Stdout(_) | JobOutput::Stderr(_) => saw_any = true,
            }
        }
        assert!(saw_any);
    }
}
