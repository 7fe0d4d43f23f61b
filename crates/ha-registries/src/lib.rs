//! Hub registries
//!
//! Persistent registries shared by integrations. Currently the
//! [`DeviceRegistry`], which records the physical devices (bridges, hubs)
//! an integration talks to.
//!
//! Registries persist as versioned JSON in the `.storage/` directory of the
//! config dir through [`Storage`].

pub mod device_registry;
pub mod storage;

// Re-export main types
pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};

pub use device_registry::{
    format_mac, DeviceConnection, DeviceEntry, DeviceIdentifier, DeviceInfo, DeviceRegistry,
    DeviceRegistryData, CONNECTION_NETWORK_MAC,
};
