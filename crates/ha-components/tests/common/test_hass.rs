//! Minimal hub for integration tests
//!
//! Wires the registries, config entries and the Hue integration together
//! over a temporary config directory, with [`MockBridgeFactory`] standing in
//! for real bridges.

use std::sync::Arc;
use std::time::Duration;

use ha_components::hue::{
    DispatchOptions, HueConfig, HueIntegration, DOMAIN, SERVICE_HUE_SCENE,
};
use ha_config_entries::{ConfigEntries, ConfigEntriesResult, ConfigEntry, FlowOutcome};
use ha_core::Context;
use ha_registries::{DeviceRegistry, Storage};
use ha_service_registry::{ServiceRegistry, ServiceResult};
use serde_json::json;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use super::mock_bridge::{MockBridge, MockBridgeFactory};

pub struct TestHass {
    pub config_dir: TempDir,
    pub storage: Arc<Storage>,
    pub services: Arc<ServiceRegistry>,
    pub devices: Arc<DeviceRegistry>,
    pub entries: Arc<ConfigEntries>,
    pub factory: Arc<MockBridgeFactory>,
    pub hue: Arc<HueIntegration>,
}

impl TestHass {
    pub fn new() -> Self {
        Self::with_dispatch_options(DispatchOptions::default())
    }

    pub fn with_call_timeout(timeout: Duration) -> Self {
        Self::with_dispatch_options(DispatchOptions {
            call_timeout: timeout,
        })
    }

    pub fn with_dispatch_options(options: DispatchOptions) -> Self {
        Self::build(TempDir::new().unwrap(), options)
    }

    /// Start a fresh hub over the same config directory, loading the
    /// persisted config entries and devices
    pub async fn restart(self) -> Self {
        let hass = Self::build(self.config_dir, DispatchOptions::default());
        hass.entries.load().await.unwrap();
        hass.devices.load().await.unwrap();
        hass
    }

    fn build(config_dir: TempDir, options: DispatchOptions) -> Self {
        let storage = Arc::new(Storage::new(config_dir.path()));
        let services = Arc::new(ServiceRegistry::new());
        let devices = Arc::new(DeviceRegistry::new(storage.clone()));
        let entries = Arc::new(ConfigEntries::new(storage.clone()));
        let factory = Arc::new(MockBridgeFactory::default());
        let hue = HueIntegration::with_dispatch_options(
            services.clone(),
            devices.clone(),
            factory.clone(),
            options,
        );

        Self {
            config_dir,
            storage,
            services,
            devices,
            entries,
            factory,
            hue,
        }
    }

    /// Mock bridge for `host`, created on first use
    pub fn bridge(&self, host: &str) -> Arc<MockBridge> {
        self.factory.bridge(host)
    }

    /// Parse a configuration.yaml snippet and set up the integration
    ///
    /// Waits for every import flow it starts.
    pub async fn setup_yaml(&self, yaml: &str) -> Vec<FlowOutcome> {
        let config = ha_config::load_yaml_string(
            self.config_dir.path(),
            yaml,
            "configuration.yaml",
        )
        .unwrap();
        let flows = self
            .hue
            .setup_from_config(&config, &self.entries)
            .await
            .unwrap();
        wait_for_flows(flows).await
    }

    pub async fn setup(&self, config: &HueConfig) -> Vec<FlowOutcome> {
        wait_for_flows(self.hue.async_setup(config, &self.entries).await).await
    }

    pub fn hue_entries(&self) -> Vec<ConfigEntry> {
        self.entries.get_by_domain(DOMAIN)
    }

    pub fn entry_for(&self, host: &str) -> ConfigEntry {
        self.hue_entries()
            .into_iter()
            .find(|entry| entry.data_str("host") == Some(host))
            .unwrap_or_else(|| panic!("no config entry for {}", host))
    }

    /// Call `hue.hue_activate_scene` through the service registry
    pub async fn activate_scene(&self, group_name: &str, scene_name: &str) -> ServiceResult {
        self.services
            .call(
                DOMAIN,
                SERVICE_HUE_SCENE,
                json!({ "group_name": group_name, "scene_name": scene_name }),
                Context::new(),
                false,
            )
            .await
    }
}

async fn wait_for_flows(
    flows: Vec<JoinHandle<ConfigEntriesResult<FlowOutcome>>>,
) -> Vec<FlowOutcome> {
    let mut outcomes = Vec::new();
    for flow in flows {
        outcomes.push(flow.await.unwrap().unwrap());
    }
    outcomes
}
