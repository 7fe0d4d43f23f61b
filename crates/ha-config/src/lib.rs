//! YAML configuration for the hub
//!
//! Loads `configuration.yaml` with the custom tags integrations rely on:
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR` - Environment variable substitution
//!
//! The [`validation`] module holds the value coercions integrations use when
//! checking their own section of the loaded tree.
//!
//! # Example
//!
//! ```ignore
//! use ha_config::load_yaml;
//!
//! let config = load_yaml("/config", "configuration.yaml")?;
//! let hue = config.get("hue");
//! ```

mod error;
mod loader;
mod secrets;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, load_yaml_string, YamlLoader};
pub use secrets::Secrets;

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
