//! Scriptable plot launcher for tests.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::plotter::{JobOutput, LaunchError, LaunchedJob, PlotJobSpec, PlotLauncher};

/// Script for one mock plot job.
#[derive(Debug, Clone)]
pub struct MockPlotScript {
    run_id: Option<String>,
    plot_name: Option<String>,
    plot_size: u64,
    pre_id_lines: Vec<String>,
    lines: Vec<String>,
    fail_launch: bool,
}

impl MockPlotScript {
    /// A job that emits the given run id and completes without a plot.
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: Some(run_id.to_string()),
            plot_name: None,
            plot_size: 0,
            pre_id_lines: Vec::new(),
            lines: Vec::new(),
            fail_launch: false,
        }
    }

    /// A job whose launch fails.
    pub fn failing() -> Self {
        Self {
            run_id: None,
            plot_name: None,
            plot_size: 0,
            pre_id_lines: Vec::new(),
            lines: Vec::new(),
            fail_launch: true,
        }
    }

    /// The job writes a plot of `size` bytes into the intermediate dir and
    /// announces it with a rename line.
    pub fn with_plot(mut self, name: &str, size: u64) -> Self {
        self.plot_name = Some(name.to_string());
        self.plot_size = size;
        self
    }

    /// Extra stdout line emitted after the run id.
    pub fn with_line(mut self, line: &str) -> Self {
        self.lines.push(line.to_string());
        self
    }

    /// Stdout line emitted before the run id is announced.
    pub fn with_pre_id_line(mut self, line: &str) -> Self {
        self.pre_id_lines.push(line.to_string());
        self
    }
}

/// One recorded launch.
#[derive(Debug, Clone)]
pub struct LaunchRecord {
    pub queue: String,
    pub tmp_dir: PathBuf,
    pub inter_dir: PathBuf,
    pub direct: bool,
    pub at: Instant,
}

/// [`PlotLauncher`] that replays queued scripts. Per-queue scripts are
/// preferred over the shared queue; when nothing is scripted a launch
/// fails, which terminates the owning queue. Tests push exactly as many
/// scripts as they expect launches.
#[derive(Debug, Default)]
pub struct MockLauncher {
    scripts: Mutex<VecDeque<MockPlotScript>>,
    queue_scripts: Mutex<std::collections::HashMap<String, VecDeque<MockPlotScript>>>,
    launches: Mutex<Vec<LaunchRecord>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_script(&self, script: MockPlotScript) {
        self.scripts
            .lock()
            .expect("mock launcher lock poisoned")
            .push_back(script);
    }

    /// Scripts the next launch for one specific queue.
    pub fn push_script_for(&self, queue: &str, script: MockPlotScript) {
        self.queue_scripts
            .lock()
            .expect("mock launcher lock poisoned")
            .entry(queue.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches
            .lock()
            .expect("mock launcher lock poisoned")
            .clone()
    }

    pub fn launch_count(&self) -> usize {
        self.launches
            .lock()
            .expect("mock launcher lock poisoned")
            .len()
    }
}

#[async_trait]
impl PlotLauncher for MockLauncher {
    async fn launch(&self, spec: &PlotJobSpec) -> Result<LaunchedJob, LaunchError> {
        self.launches
            .lock()
            .expect("mock launcher lock poisoned")
            .push(LaunchRecord {
                queue: spec.queue.clone(),
                tmp_dir: spec.tmp_dir.clone(),
                inter_dir: spec.inter_dir.clone(),
                direct: spec.direct,
                at: Instant::now(),
            });

        let per_queue = self
            .queue_scripts
            .lock()
            .expect("mock launcher lock poisoned")
            .get_mut(&spec.queue)
            .and_then(|scripts| scripts.pop_front());
        let script = per_queue.unwrap_or_else(|| {
            self.scripts
                .lock()
                .expect("mock launcher lock poisoned")
                .pop_front()
                .unwrap_or_else(MockPlotScript::failing)
        });

        if script.fail_launch {
            return Err(LaunchError::Spawn(std::io::Error::other(
                "mock launch failure",
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for line in &script.pre_id_lines {
            let _ = tx.send(JobOutput::Stdout(line.clone()));
        }
        if let Some(run_id) = &script.run_id {
            let _ = tx.send(JobOutput::Stdout(format!("ID: {}", run_id)));
        }
        for line in &script.lines {
            let _ = tx.send(JobOutput::Stdout(line.clone()));
        }
        if let Some(plot_name) = &script.plot_name {
            let plot_path = spec.inter_dir.join(plot_name);
            if let Some(parent) = plot_path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
            let body: Vec<u8> = (0..script.plot_size).map(|i| (i % 251) as u8).collect();
            tokio::fs::write(&plot_path, body)
                .await
                .map_err(LaunchError::Io)?;
            let _ = tx.send(JobOutput::Stdout(format!(
                "Renamed final file from \"{}.2.tmp\" to \"{}\"",
                plot_path.display(),
                plot_name
            )));
        }
        drop(tx);

        Ok(LaunchedJob { output: rx })
    }
}
