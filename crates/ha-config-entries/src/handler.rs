//! Integration hooks for the config entry lifecycle

use std::collections::HashMap;

use async_trait::async_trait;

use crate::entry::ConfigEntry;
use crate::manager::ConfigEntries;

/// Result of setting up a config entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// The integration is running
    Loaded,
    /// The device is not reachable yet; the manager retries in the background
    NotReady(String),
}

/// Result of a config flow step
#[derive(Debug, Clone, PartialEq)]
pub enum FlowResult {
    /// Create a new entry with this data
    CreateEntry {
        title: String,
        data: HashMap<String, serde_json::Value>,
        unique_id: Option<String>,
    },
    /// Stop the flow without creating anything
    Abort { reason: String },
}

impl FlowResult {
    pub fn abort(reason: impl Into<String>) -> Self {
        FlowResult::Abort {
            reason: reason.into(),
        }
    }
}

/// Lifecycle hooks an integration registers for its domain
///
/// The manager is passed in on every call so handlers can update the entry
/// (for example its unique id) without holding a reference to it.
#[async_trait]
pub trait ConfigEntryHandler: Send + Sync {
    /// Set up an entry.
    ///
    /// `Err` is a permanent failure and moves the entry to `SetupError`.
    async fn setup_entry(
        &self,
        entries: &ConfigEntries,
        entry: &ConfigEntry,
    ) -> Result<SetupOutcome, String>;

    /// Tear down a loaded entry; `Ok(false)` means the integration could not
    /// release its resources.
    async fn unload_entry(&self, entries: &ConfigEntries, entry: &ConfigEntry)
        -> Result<bool, String>;

    /// Clean up after an entry was removed for good
    ///
    /// Called once the entry is unloaded and gone from storage.
    async fn remove_entry(&self, _entries: &ConfigEntries, _entry: &ConfigEntry) {}

    /// Handle an import from static configuration
    async fn import_flow(&self, _entries: &ConfigEntries, _data: serde_json::Value) -> FlowResult {
        FlowResult::abort("not_implemented")
    }
}
