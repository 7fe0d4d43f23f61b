//! Hue setup and config entry lifecycle

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use ha_config_entries::{
    ConfigEntries, ConfigEntriesResult, ConfigEntry, ConfigEntryHandler, ConfigEntryUpdate,
    FlowOutcome, FlowResult, SetupOutcome,
};
use ha_core::ServiceCall;
use ha_registries::{
    DeviceConnection, DeviceIdentifier, DeviceInfo, DeviceRegistry, CONNECTION_NETWORK_MAC,
};
use ha_service_registry::{ServiceDescription, ServiceError, ServiceRegistry};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::bridge::{normalize_bridge_id, BridgeFactory, BridgeInfo, SceneCommand, UpdateState};
use super::config::HueConfig;
use super::data::{BridgeRegistration, HueData};
use super::error::{HueError, HueResult};
use super::scene::{DispatchOptions, SceneDispatcher};
use super::{scene_schema, CONF_HOST, DOMAIN, MANUFACTURER, SERVICE_HUE_SCENE};

/// The Hue integration
///
/// Registered with [`ConfigEntries`] as the handler for the `hue` domain.
pub struct HueIntegration {
    data: Arc<HueData>,
    services: Arc<ServiceRegistry>,
    devices: Arc<DeviceRegistry>,
    factory: Arc<dyn BridgeFactory>,
    dispatcher: Arc<SceneDispatcher>,
    shutdown: CancellationToken,
}

impl HueIntegration {
    pub fn new(
        services: Arc<ServiceRegistry>,
        devices: Arc<DeviceRegistry>,
        factory: Arc<dyn BridgeFactory>,
    ) -> Arc<Self> {
        Self::with_dispatch_options(services, devices, factory, DispatchOptions::default())
    }

    pub fn with_dispatch_options(
        services: Arc<ServiceRegistry>,
        devices: Arc<DeviceRegistry>,
        factory: Arc<dyn BridgeFactory>,
        options: DispatchOptions,
    ) -> Arc<Self> {
        let data = Arc::new(HueData::new());
        let shutdown = CancellationToken::new();
        let dispatcher = Arc::new(SceneDispatcher::new(
            data.clone(),
            options,
            shutdown.child_token(),
        ));

        Arc::new(Self {
            data,
            services,
            devices,
            factory,
            dispatcher,
            shutdown,
        })
    }

    pub fn data(&self) -> &Arc<HueData> {
        &self.data
    }

    pub fn dispatcher(&self) -> &Arc<SceneDispatcher> {
        &self.dispatcher
    }

    /// Set up the integration from configuration.yaml
    ///
    /// Registers the lifecycle handler and the scene service, remembers the
    /// options of every configured bridge and starts one import flow per host
    /// that has no config entry yet. The flows run as background tasks
    /// because creating an entry sets it up, which calls back into this
    /// integration.
    #[instrument(skip_all)]
    pub async fn async_setup(
        self: &Arc<Self>,
        config: &HueConfig,
        entries: &Arc<ConfigEntries>,
    ) -> Vec<JoinHandle<ConfigEntriesResult<FlowOutcome>>> {
        entries.register_handler(DOMAIN, self.clone());
        self.register_scene_service();

        let configured_hosts: HashSet<String> = entries
            .get_by_domain(DOMAIN)
            .iter()
            .filter_map(|entry| entry.data_str(CONF_HOST).map(str::to_string))
            .collect();

        let mut scheduled = HashSet::new();
        let mut flows = Vec::new();

        for bridge in &config.bridges {
            self.data.set_config(bridge.clone());

            if configured_hosts.contains(&bridge.host) || !scheduled.insert(bridge.host.clone()) {
                continue;
            }

            debug!("Starting import flow for Hue bridge at {}", bridge.host);
            let entries = entries.clone();
            let data = json!({ "host": bridge.host });
            flows.push(tokio::spawn(async move {
                entries.flow_import(DOMAIN, data).await
            }));
        }

        flows
    }

    /// Validate the `hue:` block of the full configuration tree, then run
    /// [`HueIntegration::async_setup`]
    pub async fn setup_from_config(
        self: &Arc<Self>,
        config: &ha_config::Value,
        entries: &Arc<ConfigEntries>,
    ) -> HueResult<Vec<JoinHandle<ConfigEntriesResult<FlowOutcome>>>> {
        let config = HueConfig::from_config(config)?;
        info!("Setting up Hue with {} configured bridges", config.bridges.len());
        Ok(self.async_setup(&config, entries).await)
    }

    fn register_scene_service(&self) {
        let dispatcher = self.dispatcher.clone();
        let mut description = ServiceDescription::new(DOMAIN, SERVICE_HUE_SCENE)
            .with_schema(scene_schema());
        description.name = Some("Activate Hue scene".to_string());
        description.description = Some("Activate a scene stored on a Hue bridge".to_string());

        self.services
            .register(description, move |call: ServiceCall| {
                let dispatcher = dispatcher.clone();
                async move {
                    let command = call
                        .parse::<SceneCommand>()
                        .map_err(|e| ServiceError::InvalidData(e.to_string()))?;
                    debug!(
                        context = %call.context.id,
                        "{} requested scene {} in group {}",
                        call.service_id(),
                        command.scene_name,
                        command.group_name
                    );
                    dispatcher.dispatch(&command).await;
                    Ok(None)
                }
            });
    }

    /// Cancel scene dispatches that are still running
    pub fn shutdown(&self) {
        info!("Shutting down Hue integration");
        self.shutdown.cancel();
    }

    async fn register_device(&self, entry: &ConfigEntry, info: &BridgeInfo) {
        self.devices.get_or_create(
            &entry.entry_id,
            DeviceInfo {
                identifiers: vec![DeviceIdentifier::new(DOMAIN, &info.bridge_id)],
                connections: vec![DeviceConnection::new(CONNECTION_NETWORK_MAC, &info.mac)],
                manufacturer: Some(MANUFACTURER.to_string()),
                name: Some(info.name.clone()),
                model: Some(info.model_id.clone()),
                sw_version: Some(info.sw_version.clone()),
            },
        );

        if let Err(e) = self.devices.save().await {
            warn!("Failed to save device registry: {}", e);
        }
    }
}

#[async_trait]
impl ConfigEntryHandler for HueIntegration {
    #[instrument(skip_all, fields(entry_id = %entry.entry_id))]
    async fn setup_entry(
        &self,
        entries: &ConfigEntries,
        entry: &ConfigEntry,
    ) -> Result<SetupOutcome, String> {
        let host = entry.data_str(CONF_HOST).ok_or_else(|| {
            HueError::MissingHost {
                entry_id: entry.entry_id.clone(),
            }
            .to_string()
        })?;

        let options = self.data.options_for(host);
        let bridge = self.factory.create(host, options);

        if !bridge.setup().await {
            return Ok(SetupOutcome::NotReady(format!(
                "Hue bridge at {} is not ready",
                host
            )));
        }

        let previous = self.data.insert_bridge(
            host,
            BridgeRegistration {
                bridge: bridge.clone(),
                options,
            },
        );
        // Another entry for the same host loaded first; its handle is orphaned
        if let Some(previous) = previous.filter(|p| !Arc::ptr_eq(&p.bridge, &bridge)) {
            if !previous.bridge.reset().await {
                warn!("Failed to reset replaced Hue bridge at {}", host);
            }
        }
        let info = bridge.info();

        if entry.unique_id.is_none() {
            let update = ConfigEntryUpdate::new().unique_id(normalize_bridge_id(&info.bridge_id));
            if let Err(e) = entries.update(&entry.entry_id, update).await {
                warn!("Failed to store unique id for {}: {}", host, e);
            }
        }

        self.register_device(entry, &info).await;

        if info.update_state() == UpdateState::ReadyToInstall {
            warn!("Please check for software updates of the bridge in the Philips Hue App.");
        }

        info!("Hue bridge {} at {} is set up", info.name, host);
        Ok(SetupOutcome::Loaded)
    }

    #[instrument(skip_all, fields(entry_id = %entry.entry_id))]
    async fn unload_entry(
        &self,
        _entries: &ConfigEntries,
        entry: &ConfigEntry,
    ) -> Result<bool, String> {
        let host = entry.data_str(CONF_HOST).unwrap_or_default();

        let Some(registration) = self.data.remove_bridge(host) else {
            let err = HueError::NotRegistered {
                host: host.to_string(),
            };
            error!("{}", err);
            return Err(err.to_string());
        };

        self.services.unregister(DOMAIN, SERVICE_HUE_SCENE);
        Ok(registration.bridge.reset().await)
    }

    async fn remove_entry(&self, _entries: &ConfigEntries, entry: &ConfigEntry) {
        self.devices.clear_config_entry(&entry.entry_id);
        if let Err(e) = self.devices.save().await {
            warn!("Failed to save device registry: {}", e);
        }
    }

    async fn import_flow(&self, entries: &ConfigEntries, data: serde_json::Value) -> FlowResult {
        let Some(host) = data.get(CONF_HOST).and_then(|h| h.as_str()) else {
            return FlowResult::abort("missing_host");
        };

        if entries
            .get_by_domain(DOMAIN)
            .iter()
            .any(|entry| entry.data_str(CONF_HOST) == Some(host))
        {
            return FlowResult::abort("already_configured");
        }

        FlowResult::CreateEntry {
            title: host.to_string(),
            data: HashMap::from([(CONF_HOST.to_string(), json!(host))]),
            unique_id: None,
        }
    }
}
