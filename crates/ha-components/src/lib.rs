//! Built-in Components
//!
//! Integrations that ship with the hub. Each integration lives in its own
//! module and plugs into the shared registries (config entries, services,
//! devices) handed to it at setup.

pub mod hue;
