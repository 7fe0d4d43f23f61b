//! Device Registry
//!
//! Tracks physical devices by identifiers and connections so that an
//! integration re-registering the same hardware (after a restart, or from a
//! second config entry) merges into the existing record instead of
//! creating a duplicate.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::{Storable, Storage, StorageResult};

/// Storage key for device registry
pub const STORAGE_KEY: &str = "core.device_registry";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 12;

/// Connection type for network MAC addresses
pub const CONNECTION_NETWORK_MAC: &str = "mac";

/// A device identifier (domain, id) pair, e.g. `("hue", "001788fffe4a1b2c")`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentifier(pub String, pub String);

impl DeviceIdentifier {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self(domain.into(), id.into())
    }

    pub fn domain(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }

    fn key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

/// A device connection (type, id) pair, e.g. `("mac", "00:17:88:4a:1b:2c")`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceConnection(pub String, pub String);

impl DeviceConnection {
    /// Create a connection, normalising MAC addresses
    pub fn new(conn_type: impl Into<String>, id: impl Into<String>) -> Self {
        let conn_type = conn_type.into();
        let id = id.into();
        let id = if conn_type == CONNECTION_NETWORK_MAC {
            format_mac(&id)
        } else {
            id
        };
        Self(conn_type, id)
    }

    pub fn connection_type(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }

    fn key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

/// Format a MAC address as lowercase colon-separated pairs
///
/// Accepts colon, dash and dot (Cisco) notations as well as 12 bare hex
/// digits. Anything else is returned unchanged.
pub fn format_mac(mac: &str) -> String {
    let separators = |sep: char| mac.chars().filter(|c| *c == sep).count();

    if mac.len() == 17 && separators(':') == 5 {
        return mac.to_lowercase();
    }

    let bare = if mac.len() == 17 && separators('-') == 5 {
        mac.replace('-', "")
    } else if mac.len() == 14 && separators('.') == 2 {
        mac.replace('.', "")
    } else if mac.len() == 12 && mac.chars().all(|c| c.is_ascii_hexdigit()) {
        mac.to_string()
    } else {
        return mac.to_string();
    };

    let bare = bare.to_lowercase();
    bare.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair))
        .collect::<Vec<_>>()
        .join(":")
}

/// Device metadata supplied by an integration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub identifiers: Vec<DeviceIdentifier>,
    pub connections: Vec<DeviceConnection>,
    pub manufacturer: Option<String>,
    pub name: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
}

/// A registered device entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Internal UUID
    pub id: String,

    #[serde(default)]
    pub identifiers: Vec<DeviceIdentifier>,

    #[serde(default)]
    pub connections: Vec<DeviceConnection>,

    /// Config entries that reported this device
    #[serde(default)]
    pub config_entries: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_config_entry: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// User-set name, never overwritten by integrations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_by_user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Firmware version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl DeviceEntry {
    fn new(config_entry_id: &str, info: DeviceInfo) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            identifiers: info.identifiers,
            connections: info.connections,
            config_entries: vec![config_entry_id.to_string()],
            primary_config_entry: Some(config_entry_id.to_string()),
            name: info.name,
            name_by_user: None,
            manufacturer: info.manufacturer,
            model: info.model,
            sw_version: info.sw_version,
            created_at: now,
            modified_at: now,
        }
    }

    /// Merge newly reported info; returns whether anything changed
    fn merge(&mut self, config_entry_id: &str, info: DeviceInfo) -> bool {
        let before = (
            self.identifiers.len(),
            self.connections.len(),
            self.config_entries.len(),
            self.name.clone(),
            self.manufacturer.clone(),
            self.model.clone(),
            self.sw_version.clone(),
        );

        if !self.config_entries.iter().any(|id| id == config_entry_id) {
            self.config_entries.push(config_entry_id.to_string());
        }
        if self.primary_config_entry.is_none() {
            self.primary_config_entry = Some(config_entry_id.to_string());
        }
        for identifier in info.identifiers {
            if !self.identifiers.contains(&identifier) {
                self.identifiers.push(identifier);
            }
        }
        for connection in info.connections {
            if !self.connections.contains(&connection) {
                self.connections.push(connection);
            }
        }
        if info.name.is_some() {
            self.name = info.name;
        }
        if info.manufacturer.is_some() {
            self.manufacturer = info.manufacturer;
        }
        if info.model.is_some() {
            self.model = info.model;
        }
        if info.sw_version.is_some() {
            self.sw_version = info.sw_version;
        }

        let after = (
            self.identifiers.len(),
            self.connections.len(),
            self.config_entries.len(),
            self.name.clone(),
            self.manufacturer.clone(),
            self.model.clone(),
            self.sw_version.clone(),
        );
        before != after
    }

    /// Display name (user name or device name)
    pub fn display_name(&self) -> &str {
        self.name_by_user
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("")
    }
}

/// Device registry data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRegistryData {
    pub devices: Vec<DeviceEntry>,
}

impl Storable for DeviceRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Device Registry with identifier, connection and config-entry indexes
///
/// Entries are stored as `Arc<DeviceEntry>` so reads never clone the entry.
pub struct DeviceRegistry {
    storage: Arc<Storage>,

    /// Primary index: device_id -> DeviceEntry
    by_id: DashMap<String, Arc<DeviceEntry>>,

    /// Index: identifier key -> device_id
    by_identifier: DashMap<String, String>,

    /// Index: connection key -> device_id
    by_connection: DashMap<String, String>,

    /// Index: config_entry_id -> set of device_ids
    by_config_entry_id: DashMap<String, HashSet<String>>,
}

impl DeviceRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            by_id: DashMap::new(),
            by_identifier: DashMap::new(),
            by_connection: DashMap::new(),
            by_config_entry_id: DashMap::new(),
        }
    }

    /// Load from storage
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(storage_file) = self.storage.load::<DeviceRegistryData>().await? {
            info!(
                "Loading {} devices from storage (v{}.{})",
                storage_file.data.devices.len(),
                storage_file.version,
                storage_file.minor_version
            );

            for entry in storage_file.data.devices {
                self.index_entry(Arc::new(entry));
            }
        }
        Ok(())
    }

    /// Save to storage
    pub async fn save(&self) -> StorageResult<()> {
        let mut devices: Vec<DeviceEntry> =
            self.by_id.iter().map(|r| (**r.value()).clone()).collect();
        devices.sort_by_key(|d| d.created_at);

        self.storage.save(&DeviceRegistryData { devices }).await?;
        debug!("Saved {} devices to storage", self.by_id.len());
        Ok(())
    }

    fn index_entry(&self, entry: Arc<DeviceEntry>) {
        let device_id = entry.id.clone();

        for identifier in &entry.identifiers {
            self.by_identifier
                .insert(identifier.key(), device_id.clone());
        }
        for connection in &entry.connections {
            self.by_connection
                .insert(connection.key(), device_id.clone());
        }
        for config_entry_id in &entry.config_entries {
            self.by_config_entry_id
                .entry(config_entry_id.clone())
                .or_default()
                .insert(device_id.clone());
        }

        self.by_id.insert(device_id, entry);
    }

    fn unindex_entry(&self, entry: &DeviceEntry) {
        for identifier in &entry.identifiers {
            self.by_identifier.remove(&identifier.key());
        }
        for connection in &entry.connections {
            self.by_connection.remove(&connection.key());
        }
        for config_entry_id in &entry.config_entries {
            if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                ids.remove(&entry.id);
            }
        }
        self.by_id.remove(&entry.id);
    }

    /// Get device by ID
    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        self.by_id.get(device_id).map(|r| Arc::clone(r.value()))
    }

    /// Get device by identifier
    pub fn get_by_identifier(&self, domain: &str, id: &str) -> Option<Arc<DeviceEntry>> {
        let key = DeviceIdentifier::new(domain, id).key();
        let device_id = self.by_identifier.get(&key)?.value().clone();
        self.get(&device_id)
    }

    /// Get device by connection (MAC addresses are normalised first)
    pub fn get_by_connection(&self, conn_type: &str, id: &str) -> Option<Arc<DeviceEntry>> {
        let key = DeviceConnection::new(conn_type, id).key();
        let device_id = self.by_connection.get(&key)?.value().clone();
        self.get(&device_id)
    }

    /// Get all devices for a config entry
    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<DeviceEntry>> {
        let ids: Vec<String> = self
            .by_config_entry_id
            .get(config_entry_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    fn find(&self, info: &DeviceInfo) -> Option<Arc<DeviceEntry>> {
        info.identifiers
            .iter()
            .find_map(|i| self.get_by_identifier(i.domain(), i.id()))
            .or_else(|| {
                info.connections
                    .iter()
                    .find_map(|c| self.get_by_connection(c.connection_type(), c.id()))
            })
    }

    /// Get or create a device for a config entry
    ///
    /// Looks up by identifiers first, then connections. An existing device
    /// gets the config entry, any new identifiers/connections and the
    /// reported metadata merged in.
    pub fn get_or_create(&self, config_entry_id: &str, info: DeviceInfo) -> Arc<DeviceEntry> {
        let info = DeviceInfo {
            connections: info
                .connections
                .into_iter()
                .map(|c| DeviceConnection::new(c.0, c.1))
                .collect(),
            ..info
        };

        if let Some(existing) = self.find(&info) {
            debug!("Found existing device: {}", existing.id);

            let mut entry = (*existing).clone();
            if !entry.merge(config_entry_id, info) {
                return existing;
            }
            entry.modified_at = Utc::now();

            self.unindex_entry(&existing);
            let entry = Arc::new(entry);
            self.index_entry(Arc::clone(&entry));
            return entry;
        }

        let entry = Arc::new(DeviceEntry::new(config_entry_id, info));
        self.index_entry(Arc::clone(&entry));

        info!(
            "Registered new device: {:?} ({})",
            entry.name.as_deref().unwrap_or(""),
            entry.id
        );
        entry
    }

    /// Remove a device
    pub fn remove(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        let entry = self.get(device_id)?;
        self.unindex_entry(&entry);
        info!("Removed device: {}", device_id);
        Some(entry)
    }

    /// Detach a config entry from all its devices
    ///
    /// Devices left without any config entry are removed.
    pub fn clear_config_entry(&self, config_entry_id: &str) {
        for device in self.get_by_config_entry_id(config_entry_id) {
            if device.config_entries.len() <= 1 {
                self.remove(&device.id);
                continue;
            }

            let mut entry = (*device).clone();
            entry.config_entries.retain(|id| id != config_entry_id);
            if entry.primary_config_entry.as_deref() == Some(config_entry_id) {
                entry.primary_config_entry = entry.config_entries.first().cloned();
            }
            entry.modified_at = Utc::now();

            self.unindex_entry(&device);
            self.index_entry(Arc::new(entry));
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Arc<DeviceEntry>> + '_ {
        self.by_id.iter().map(|r| Arc::clone(r.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> (TempDir, DeviceRegistry) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path()));
        (temp_dir, DeviceRegistry::new(storage))
    }

    fn bridge_info(bridge_id: &str, mac: &str) -> DeviceInfo {
        DeviceInfo {
            identifiers: vec![DeviceIdentifier::new("hue", bridge_id)],
            connections: vec![DeviceConnection::new(CONNECTION_NETWORK_MAC, mac)],
            manufacturer: Some("Signify".to_string()),
            name: Some("Philips hue".to_string()),
            model: Some("BSB002".to_string()),
            sw_version: Some("1935144040".to_string()),
        }
    }

    #[test]
    fn test_format_mac() {
        assert_eq!(format_mac("AA:BB:CC:DD:EE:FF"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(format_mac("AA-BB-CC-DD-EE-FF"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(format_mac("aabb.ccdd.eeff"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(format_mac("AABBCCDDEEFF"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(format_mac("not-a-mac"), "not-a-mac");
    }

    #[test]
    fn test_create_device() {
        let (_dir, registry) = registry();

        let device = registry.get_or_create("entry-1", bridge_info("BRIDGE1", "00:17:88:AA:BB:CC"));

        assert_eq!(registry.len(), 1);
        assert_eq!(device.config_entries, vec!["entry-1".to_string()]);
        assert_eq!(device.primary_config_entry.as_deref(), Some("entry-1"));
        assert_eq!(device.manufacturer.as_deref(), Some("Signify"));
        assert_eq!(device.connections[0].id(), "00:17:88:aa:bb:cc");
        assert!(registry.get_by_identifier("hue", "BRIDGE1").is_some());
        assert!(registry
            .get_by_connection(CONNECTION_NETWORK_MAC, "00-17-88-AA-BB-CC")
            .is_some());
    }

    #[test]
    fn test_reregistering_merges() {
        let (_dir, registry) = registry();

        let first = registry.get_or_create("entry-1", bridge_info("BRIDGE1", "001788aabbcc"));
        let mut updated = bridge_info("BRIDGE1", "001788aabbcc");
        updated.sw_version = Some("1940094000".to_string());
        let second = registry.get_or_create("entry-1", updated);

        assert_eq!(registry.len(), 1);
        assert_eq!(first.id, second.id);
        assert_eq!(second.sw_version.as_deref(), Some("1940094000"));
    }

    #[test]
    fn test_unchanged_registration_returns_same_arc() {
        let (_dir, registry) = registry();

        let first = registry.get_or_create("entry-1", bridge_info("BRIDGE1", "001788aabbcc"));
        let second = registry.get_or_create("entry-1", bridge_info("BRIDGE1", "001788aabbcc"));

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_match_by_connection_adds_identifier() {
        let (_dir, registry) = registry();

        registry.get_or_create("entry-1", bridge_info("OLDID", "001788aabbcc"));
        let device = registry.get_or_create("entry-2", bridge_info("NEWID", "00:17:88:aa:bb:cc"));

        assert_eq!(registry.len(), 1);
        assert_eq!(device.identifiers.len(), 2);
        assert_eq!(device.config_entries.len(), 2);
        assert_eq!(registry.get_by_config_entry_id("entry-2").len(), 1);
    }

    #[test]
    fn test_clear_config_entry() {
        let (_dir, registry) = registry();

        registry.get_or_create("entry-1", bridge_info("A", "001788000001"));
        registry.get_or_create("entry-1", bridge_info("B", "001788000002"));
        registry.get_or_create("entry-2", bridge_info("B", "001788000002"));

        registry.clear_config_entry("entry-1");

        assert_eq!(registry.len(), 1);
        let remaining = registry.get_by_identifier("hue", "B").unwrap();
        assert_eq!(remaining.config_entries, vec!["entry-2".to_string()]);
        assert_eq!(remaining.primary_config_entry.as_deref(), Some("entry-2"));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path()));

        {
            let registry = DeviceRegistry::new(storage.clone());
            registry.get_or_create("entry-1", bridge_info("BRIDGE1", "001788aabbcc"));
            registry.save().await.unwrap();
        }

        let registry = DeviceRegistry::new(storage);
        registry.load().await.unwrap();

        let device = registry.get_by_identifier("hue", "BRIDGE1").unwrap();
        assert_eq!(device.model.as_deref(), Some("BSB002"));
        assert_eq!(device.display_name(), "Philips hue");
        assert_eq!(registry.get_by_config_entry_id("entry-1").len(), 1);
    }
}
