use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

/// Root settings document.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    /// Memory budget handed to each plot job, in MiB.
    #[serde(default = "default_memory_mib")]
    pub memory_mib: u32,

    /// Worker threads handed to each plot job.
    #[serde(default = "default_threads")]
    pub threads: u32,

    /// Minutes between the first launches of consecutive queues.
    #[serde(default = "default_queue_stagger_mins")]
    pub queue_stagger_mins: u64,

    /// Minutes to wait before moving a finished plot whose intermediate
    /// volume is the job's own temp volume.
    #[serde(default = "default_move_delay_mins")]
    pub move_delay_mins: u64,

    /// Path to the external plotter executable.
    #[serde(default)]
    pub plotter_exe: Option<PathBuf>,

    /// Configured plot queues.
    #[serde(default)]
    pub queues: Vec<QueueSpec>,
}

fn default_memory_mib() -> u32 {
    3500
}

fn default_threads() -> u32 {
    4
}

fn default_queue_stagger_mins() -> u64 {
    60
}

fn default_move_delay_mins() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            memory_mib: default_memory_mib(),
            threads: default_threads(),
            queue_stagger_mins: default_queue_stagger_mins(),
            move_delay_mins: default_move_delay_mins(),
            plotter_exe: None,
            queues: Vec::new(),
        }
    }
}

impl Settings {
    /// Stagger between the first launches of consecutive queues.
    pub fn queue_stagger(&self) -> Duration {
        Duration::from_secs(self.queue_stagger_mins * 60)
    }

    /// Delay before moving a plot off its own temp volume.
    pub fn move_delay(&self) -> Duration {
        Duration::from_secs(self.move_delay_mins * 60)
    }

    /// Looks up a queue by name.
    pub fn queue(&self, name: &str) -> Option<&QueueSpec> {
        self.queues.iter().find(|q| q.name == name)
    }

    /// Names of all configured queues.
    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|q| q.name.clone()).collect()
    }
}

/// One configured plot queue.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QueueSpec {
    /// Unique queue name.
    pub name: String,
    /// Volume holding the job's primary temp directory.
    pub source: PathBuf,
    /// Where the job writes its result before (or instead of) migration.
    pub destination: DestinationSpec,
}

/// Destination mode for a queue: write straight onto a reserved
/// destination volume, or into a scratch volume pending migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationSpec {
    /// Reserve a destination volume and plot directly onto it.
    Direct,
    /// Use the given volume as scratch space; the finished plot is
    /// handed to the move scheduler.
    Volume(PathBuf),
}

impl DestinationSpec {
    pub fn is_direct(&self) -> bool {
        matches!(self, DestinationSpec::Direct)
    }
}

impl Serialize for DestinationSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DestinationSpec::Direct => serializer.serialize_str("direct"),
            DestinationSpec::Volume(path) => path.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for DestinationSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == "direct" {
            Ok(DestinationSpec::Direct)
        } else {
            Ok(DestinationSpec::Volume(PathBuf::from(raw)))
        }
    }
}
