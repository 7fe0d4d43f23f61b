//! Config Entries Manager
//!
//! Manages the lifecycle of configuration entries.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashMap;
use ha_registries::{Storable, Storage, StorageResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::entry::{ConfigEntry, ConfigEntrySource, ConfigEntryState, ConfigEntryUpdate};
use crate::handler::{ConfigEntryHandler, FlowResult, SetupOutcome};
use crate::state_machine::{calculate_retry_delay, InvalidTransition};

/// Storage key for config entries
pub const STORAGE_KEY: &str = "core.config_entries";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 5;

/// Config entries errors
#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("No config entry handler registered for domain {0}")]
    NoHandler(String),

    #[error("Cannot unload entry in state {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error("Setup failed: {0}")]
    SetupFailed(String),

    #[error("Unload failed: {0}")]
    UnloadFailed(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Storage error: {0}")]
    Storage(#[from] ha_registries::StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Config entries data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    /// All config entries
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// What an import flow ended with
#[derive(Debug, Clone)]
pub enum FlowOutcome {
    /// A new entry was created (and setup was attempted)
    Created(ConfigEntry),
    /// The handler aborted the flow
    Aborted { reason: String },
}

/// Config Entries Manager
///
/// Manages the lifecycle of configuration entries including:
/// - Loading/saving from storage
/// - Entry creation (import flows) and removal
/// - Setup/unload through the domain's [`ConfigEntryHandler`]
/// - Background setup retries for entries that are not ready
pub struct ConfigEntries {
    /// Storage backend
    storage: Arc<Storage>,

    /// Primary index: entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// Index: domain -> set of entry_ids
    by_domain: DashMap<String, HashSet<String>>,

    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    /// Lifecycle handlers by domain
    handlers: DashMap<String, Arc<dyn ConfigEntryHandler>>,

    /// Pending background retries by entry_id
    retry_tasks: DashMap<String, JoinHandle<()>>,
}

impl ConfigEntries {
    /// Create a new config entries manager
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            handlers: DashMap::new(),
            retry_tasks: DashMap::new(),
        }
    }

    /// Load entries from storage
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(storage_file) = self.storage.load::<ConfigEntriesData>().await? {
            info!(
                "Loading {} config entries from storage (v{}.{})",
                storage_file.data.entries.len(),
                storage_file.version,
                storage_file.minor_version
            );

            for entry in storage_file.data.entries {
                self.index_entry(&entry);
            }
        }
        Ok(())
    }

    /// Save entries to storage
    pub async fn save(&self) -> StorageResult<()> {
        let data = ConfigEntriesData {
            entries: self.entries.iter().map(|r| r.value().clone()).collect(),
        };

        self.storage.save(&data).await?;
        debug!("Saved {} config entries to storage", data.entries.len());
        Ok(())
    }

    /// Index an entry
    fn index_entry(&self, entry: &ConfigEntry) {
        let entry_id = entry.entry_id.clone();

        self.entries.insert(entry_id.clone(), entry.clone());

        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry_id.clone());

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert((entry.domain.clone(), unique_id.clone()), entry_id);
        }
    }

    /// Remove an entry from indexes
    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }

        self.entries.remove(&entry.entry_id);
    }

    /// Get an entry by ID
    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    /// Get all entries for a domain
    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        let ids: Vec<String> = self
            .by_domain
            .get(domain)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Get entry by unique_id
    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        let entry_id = self
            .by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .map(|r| r.value().clone())?;
        self.get(&entry_id)
    }

    /// Add a new config entry
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(&entry);
        self.save().await?;

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );

        Ok(entry)
    }

    /// Update an existing entry in place
    ///
    /// Runtime fields (state, tries) are left untouched.
    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let (previous_unique_id, updated) = {
            let mut entry = self
                .entries
                .get_mut(entry_id)
                .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

            let previous_unique_id = entry.unique_id.clone();
            if let Some(title) = update.title {
                entry.title = title;
            }
            if let Some(data) = update.data {
                entry.data = data;
            }
            if let Some(options) = update.options {
                entry.options = options;
            }
            if let Some(unique_id) = update.unique_id {
                entry.unique_id = unique_id;
            }
            if let Some(version) = update.version {
                entry.version = version;
            }
            if let Some(minor_version) = update.minor_version {
                entry.minor_version = minor_version;
            }
            entry.modified_at = Utc::now();

            (previous_unique_id, entry.clone())
        };

        if previous_unique_id != updated.unique_id {
            if let Some(old) = previous_unique_id {
                self.by_unique_id.remove(&(updated.domain.clone(), old));
            }
            if let Some(ref new) = updated.unique_id {
                self.by_unique_id.insert(
                    (updated.domain.clone(), new.clone()),
                    updated.entry_id.clone(),
                );
            }
        }

        self.save().await?;

        debug!("Updated config entry: {}", entry_id);
        Ok(updated)
    }

    /// Remove an entry, unloading it first if needed
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        self.cancel_retry(entry_id);

        let state = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?
            .state;
        if state != ConfigEntryState::NotLoaded {
            if let Err(e) = self.unload(entry_id).await {
                warn!("Removing entry {} after failed unload: {}", entry_id, e);
            }
        }

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        self.unindex_entry(&entry);
        self.save().await?;

        if let Some(handler) = self.handler(&entry.domain) {
            handler.remove_entry(self, &entry).await;
        }

        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry_id
        );

        Ok(entry)
    }

    /// Validate and apply a state transition
    fn transition(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        entry.try_set_state(state, reason)?;
        debug!("Entry {} state changed to {:?}", entry_id, state);
        Ok(())
    }

    /// Register the lifecycle handler for a domain
    pub fn register_handler(&self, domain: &str, handler: Arc<dyn ConfigEntryHandler>) {
        self.handlers.insert(domain.to_string(), handler);
        debug!("Registered config entry handler for domain: {}", domain);
    }

    fn handler(&self, domain: &str) -> Option<Arc<dyn ConfigEntryHandler>> {
        self.handlers.get(domain).map(|h| h.value().clone())
    }

    /// Set up an entry through its domain handler
    ///
    /// Returns the state the entry ended in. A handler that reports
    /// [`SetupOutcome::NotReady`] leaves the entry in `SetupRetry`; use
    /// [`ConfigEntries::setup_with_retry`] to keep retrying in the background.
    #[instrument(skip(self))]
    pub async fn setup(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntryState> {
        let lock = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?
            .setup_lock;
        let _guard = lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.is_disabled() {
            debug!("Skipping setup for disabled entry: {}", entry_id);
            return Ok(entry.state);
        }

        self.transition(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let Some(handler) = self.handler(&entry.domain) else {
            debug!(
                "No config entry handler for domain {}, marking as loaded",
                entry.domain
            );
            self.transition(entry_id, ConfigEntryState::Loaded, None)?;
            return Ok(ConfigEntryState::Loaded);
        };

        match handler.setup_entry(self, &entry).await {
            Ok(SetupOutcome::Loaded) => {
                self.transition(entry_id, ConfigEntryState::Loaded, None)?;
                info!("Setup completed for entry: {} ({})", entry.title, entry_id);
                Ok(ConfigEntryState::Loaded)
            }
            Ok(SetupOutcome::NotReady(reason)) => {
                self.transition(entry_id, ConfigEntryState::SetupRetry, Some(reason.clone()))?;
                if let Some(mut entry) = self.entries.get_mut(entry_id) {
                    entry.increment_tries();
                }
                info!(
                    "Config entry '{}' for {} integration not ready yet: {}",
                    entry.title, entry.domain, reason
                );
                Ok(ConfigEntryState::SetupRetry)
            }
            Err(reason) => {
                warn!("Setup failed for entry {}: {}", entry_id, reason);
                self.transition(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                Err(ConfigEntriesError::SetupFailed(reason))
            }
        }
    }

    /// Set up an entry and schedule background retries while it is not ready
    pub async fn setup_with_retry(
        self: &Arc<Self>,
        entry_id: &str,
    ) -> ConfigEntriesResult<ConfigEntryState> {
        let state = self.setup(entry_id).await?;
        if state == ConfigEntryState::SetupRetry {
            self.schedule_retry(entry_id);
        }
        Ok(state)
    }

    fn schedule_retry(self: &Arc<Self>, entry_id: &str) {
        if let Some(task) = self.retry_tasks.get(entry_id) {
            if !task.is_finished() {
                return;
            }
        }

        let manager = Arc::downgrade(self);
        let id = entry_id.to_string();
        let task = tokio::spawn(retry_setup(manager, id));
        self.retry_tasks.insert(entry_id.to_string(), task);
    }

    fn cancel_retry(&self, entry_id: &str) {
        if let Some((_, task)) = self.retry_tasks.remove(entry_id) {
            task.abort();
        }
    }

    /// Unload an entry
    ///
    /// Entries that never finished setup are reset without calling the
    /// handler. Returns an error if the handler fails to unload.
    #[instrument(skip(self))]
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        self.cancel_retry(entry_id);

        let lock = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?
            .setup_lock;
        let _guard = lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        match entry.state {
            ConfigEntryState::NotLoaded => return Ok(()),
            state if !state.is_recoverable() => {
                return Err(ConfigEntriesError::CannotUnload(state));
            }
            _ => {}
        }

        self.transition(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        let result = match (entry.state, self.handler(&entry.domain)) {
            (ConfigEntryState::Loaded, Some(handler)) => {
                handler.unload_entry(self, &entry).await
            }
            _ => Ok(true),
        };

        match result {
            Ok(true) => {
                self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
                info!("Unloaded entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            Ok(false) => {
                let reason = "integration did not release the entry".to_string();
                self.transition(entry_id, ConfigEntryState::FailedUnload, Some(reason.clone()))?;
                Err(ConfigEntriesError::UnloadFailed(reason))
            }
            Err(reason) => {
                warn!("Unload failed for entry {}: {}", entry_id, reason);
                self.transition(entry_id, ConfigEntryState::FailedUnload, Some(reason.clone()))?;
                Err(ConfigEntriesError::UnloadFailed(reason))
            }
        }
    }

    /// Reload an entry (unload + setup)
    pub async fn reload(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<ConfigEntryState> {
        self.unload(entry_id).await?;
        self.setup_with_retry(entry_id).await
    }

    /// Run the import flow for a domain
    ///
    /// The handler decides whether the data becomes a new entry. Created
    /// entries are set up right away; a setup failure is logged and does not
    /// undo the entry.
    #[instrument(skip(self, data))]
    pub async fn flow_import(
        self: &Arc<Self>,
        domain: &str,
        data: serde_json::Value,
    ) -> ConfigEntriesResult<FlowOutcome> {
        let handler = self
            .handler(domain)
            .ok_or_else(|| ConfigEntriesError::NoHandler(domain.to_string()))?;

        let (title, data, unique_id) = match handler.import_flow(self, data).await {
            FlowResult::Abort { reason } => {
                debug!("Import flow for {} aborted: {}", domain, reason);
                return Ok(FlowOutcome::Aborted { reason });
            }
            FlowResult::CreateEntry {
                title,
                data,
                unique_id,
            } => (title, data, unique_id),
        };

        let mut entry = ConfigEntry::new(domain, title)
            .with_data(data)
            .with_source(ConfigEntrySource::Import);
        if let Some(unique_id) = unique_id {
            entry = entry.with_unique_id(unique_id);
        }

        let entry = self.add(entry).await?;
        if let Err(e) = self.setup_with_retry(&entry.entry_id).await {
            warn!("Error setting up imported entry {}: {}", entry.title, e);
        }

        Ok(FlowOutcome::Created(
            self.get(&entry.entry_id).unwrap_or(entry),
        ))
    }

    /// Get all entry IDs
    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    /// Get count of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Setup all entries
    pub async fn setup_all(self: &Arc<Self>) -> Vec<ConfigEntriesResult<ConfigEntryState>> {
        let mut results = Vec::new();

        for entry_id in self.entry_ids() {
            results.push(self.setup_with_retry(&entry_id).await);
        }

        results
    }
}

/// Retry setup with backoff until the entry loads, fails, or leaves `SetupRetry`
async fn retry_setup(manager: Weak<ConfigEntries>, entry_id: String) {
    loop {
        let tries = match manager.upgrade().and_then(|m| m.get(&entry_id)) {
            Some(entry) if entry.state == ConfigEntryState::SetupRetry => entry.tries,
            _ => return,
        };

        let delay = calculate_retry_delay(tries.saturating_sub(1));
        debug!(
            "Retrying setup of entry {} in {:.1}s (attempt {})",
            entry_id,
            delay.as_secs_f64(),
            tries + 1
        );
        tokio::time::sleep(delay).await;

        let Some(manager) = manager.upgrade() else {
            return;
        };
        match manager.get(&entry_id) {
            Some(entry) if entry.state == ConfigEntryState::SetupRetry => {}
            _ => return,
        }

        match manager.setup(&entry_id).await {
            Ok(ConfigEntryState::SetupRetry) => continue,
            Ok(_) => return,
            Err(e) => {
                warn!("Giving up on setup retries for {}: {}", entry_id, e);
                return;
            }
        }
    }
}
