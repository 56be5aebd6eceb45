//! Shared, reloadable settings.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{info, warn};

use super::loader::load_settings;
use super::types::{QueueSpec, Settings};
use super::ConfigError;

/// Outcome of a [`ConfigState::reload`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Settings differ from the previously loaded ones.
    Changed,
    /// Settings are identical to the previously loaded ones, or the
    /// reload failed and the previous settings remain in effect.
    Unchanged,
}

/// Settings shared between the orchestrator and its queue tasks.
///
/// Reload swaps the whole snapshot under a lock, so readers never observe
/// a half-updated parameter set. A reload that fails to parse keeps the
/// previous valid settings.
pub struct ConfigState {
    path: PathBuf,
    current: RwLock<Settings>,
}

impl ConfigState {
    /// Loads the initial settings; fails if the file is missing or invalid.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let settings = load_settings(&path)?;
        Ok(Self {
            path,
            current: RwLock::new(settings),
        })
    }

    /// Wraps an in-memory settings value; used by tests.
    pub fn from_settings(path: impl Into<PathBuf>, settings: Settings) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(settings),
        }
    }

    /// Path of the backing settings file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the settings file and reports whether anything changed.
    ///
    /// Parse errors leave the previous settings in effect and report
    /// [`ReloadOutcome::Unchanged`].
    pub fn reload(&self) -> ReloadOutcome {
        let fresh = match load_settings(&self.path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Config reload failed, keeping previous settings: {}", e);
                return ReloadOutcome::Unchanged;
            }
        };

        let mut current = self.current.write().expect("config lock poisoned");
        if *current == fresh {
            return ReloadOutcome::Unchanged;
        }

        log_queue_diff(&current, &fresh);
        *current = fresh;
        ReloadOutcome::Changed
    }

    /// A consistent snapshot of the current settings.
    pub fn settings(&self) -> Settings {
        self.current.read().expect("config lock poisoned").clone()
    }

    /// The current spec for one queue, if still configured.
    pub fn queue(&self, name: &str) -> Option<QueueSpec> {
        self.current
            .read()
            .expect("config lock poisoned")
            .queue(name)
            .cloned()
    }

    /// Names of all currently configured queues.
    pub fn queue_names(&self) -> Vec<String> {
        self.current
            .read()
            .expect("config lock poisoned")
            .queue_names()
    }
}

fn log_queue_diff(old: &Settings, new: &Settings) {
    for queue in &new.queues {
        match old.queue(&queue.name) {
            None => info!(
                "Config: queue added: {} ({} -> {:?})",
                queue.name,
                queue.source.display(),
                queue.destination
            ),
            Some(previous) if previous != queue => info!(
                "Config: queue changed: {}. Old: {} -> {:?}. New: {} -> {:?}",
                queue.name,
                previous.source.display(),
                previous.destination,
                queue.source.display(),
                queue.destination
            ),
            Some(_) => {}
        }
    }
    for queue in &old.queues {
        if new.queue(&queue.name).is_none() {
            info!("Config: queue removed: {}", queue.name);
        }
    }
    if old.memory_mib != new.memory_mib {
        info!("Config: memory_mib={}", new.memory_mib);
    }
    if old.threads != new.threads {
        info!("Config: threads={}", new.threads);
    }
    if old.queue_stagger_mins != new.queue_stagger_mins {
        info!("Config: queue_stagger_mins={}", new.queue_stagger_mins);
    }
    if old.move_delay_mins != new.move_delay_mins {
        info!("Config: move_delay_mins={}", new.move_delay_mins);
    }
}
