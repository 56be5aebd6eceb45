//! The external stop signal.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Default stop sentinel file name, in the working directory.
pub const STOP_FILE_NAME: &str = "plotting-stop";

/// Stop signal for the orchestrator: a sentinel file in the working
/// directory, plus an in-process flag for the daemon's signal handler.
///
/// The signal only prevents new launches; running jobs and in-progress
/// transfers drain to completion.
#[derive(Debug)]
pub struct StopSignal {
    file: PathBuf,
    flag: AtomicBool,
}

impl StopSignal {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            flag: AtomicBool::new(false),
        }
    }

    /// Path of the sentinel file being watched.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Raises the in-process stop flag.
    pub fn request(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether new launches must stop.
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.file.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stop_via_flag() {
        let signal = StopSignal::new("/nonexistent/stop-file");
        assert!(!signal.is_requested());
        signal.request();
        assert!(signal.is_requested());
    }

    #[test]
    fn test_stop_via_sentinel_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("plotting-stop");
        let signal = StopSignal::new(&file);
        assert!(!signal.is_requested());
        std::fs::write(&file, b"").unwrap();
        assert!(signal.is_requested());
    }
}
