mod loader;
mod state;
mod types;

pub use loader::{load_settings, load_settings_from_str};
pub use state::{ConfigState, ReloadOutcome};
pub use types::{DestinationSpec, QueueSpec, Settings};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Settings file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse settings: {0}")]
    ParseError(String),

    #[error("Settings validation failed: {0}")]
    ValidationError(String),
}
