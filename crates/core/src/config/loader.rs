use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Settings, ConfigError};

/// Load settings from file with environment variable overrides
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let settings: Settings = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("PLOTFORGE_"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    validate_settings(&settings)?;

    Ok(settings)
}

/// Load settings from a TOML string (useful for testing)
pub fn load_settings_from_str(toml_str: &str) -> Result<Settings, ConfigError> {
    let settings: Settings =
        toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Reject settings no component could run with.
fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for queue in &settings.queues {
        if queue.name.is_empty() {
            return Err(ConfigError::ValidationError(
                "queue with empty name".to_string(),
            ));
        }
        if !seen.insert(queue.name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate queue name: {}",
                queue.name
            )));
        }
    }
    if settings.threads == 0 {
        return Err(ConfigError::ValidationError(
            "threads must be at least 1".to_string(),
        ));
    }
    Ok(())
}
