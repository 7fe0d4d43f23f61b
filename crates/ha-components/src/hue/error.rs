//! Hue integration errors

use thiserror::Error;

/// Errors raised by the Hue integration
#[derive(Debug, Error)]
pub enum HueError {
    /// Unload was asked for a host that has no bridge registered
    #[error("no bridge registered for host {host}")]
    NotRegistered { host: String },

    /// The config entry carries no `host`
    #[error("config entry {entry_id} has no host")]
    MissingHost { entry_id: String },

    /// The `hue:` block of configuration.yaml is invalid
    #[error("invalid hue configuration: {0}")]
    Config(#[from] ha_config::ConfigError),
}

/// Result type for the Hue integration
pub type HueResult<T> = Result<T, HueError>;
