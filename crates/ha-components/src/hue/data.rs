//! Shared integration state
//!
//! Owned by [`super::HueIntegration`] and shared with the scene dispatcher.
//! Both maps are keyed by the bridge host.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use super::bridge::{BridgeOptions, HueBridge};
use super::config::BridgeConfig;

/// A bridge that finished setup, with the options it was created with
#[derive(Clone)]
pub struct BridgeRegistration {
    pub bridge: Arc<dyn HueBridge>,
    pub options: BridgeOptions,
}

impl fmt::Debug for BridgeRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeRegistration")
            .field("host", &self.bridge.host())
            .field("options", &self.options)
            .finish()
    }
}

/// Bridges and static configuration, by host
#[derive(Debug, Default)]
pub struct HueData {
    bridges: DashMap<String, BridgeRegistration>,
    configs: DashMap<String, BridgeConfig>,
}

impl HueData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the configuration.yaml options for a host
    pub fn set_config(&self, config: BridgeConfig) {
        self.configs.insert(config.host.clone(), config);
    }

    pub fn config(&self, host: &str) -> Option<BridgeConfig> {
        self.configs.get(host).map(|c| c.value().clone())
    }

    /// Options for a new bridge: configured values, or the defaults for
    /// hosts that only exist as config entries
    pub fn options_for(&self, host: &str) -> BridgeOptions {
        self.config(host)
            .map(|c| c.options())
            .unwrap_or_default()
    }

    /// Record a bridge that finished setup
    ///
    /// A host holds one registration. An existing one is replaced and
    /// handed back so the caller can tear it down.
    pub fn insert_bridge(
        &self,
        host: &str,
        registration: BridgeRegistration,
    ) -> Option<BridgeRegistration> {
        let previous = self.bridges.insert(host.to_string(), registration);
        if previous.is_some() {
            warn!("Replacing existing Hue bridge registration for {}", host);
        }
        previous
    }

    pub fn remove_bridge(&self, host: &str) -> Option<BridgeRegistration> {
        self.bridges.remove(host).map(|(_, r)| r)
    }

    pub fn bridge(&self, host: &str) -> Option<BridgeRegistration> {
        self.bridges.get(host).map(|r| r.value().clone())
    }

    pub fn contains_bridge(&self, host: &str) -> bool {
        self.bridges.contains_key(host)
    }

    /// Snapshot of all registered bridges
    pub fn bridges(&self) -> Vec<Arc<dyn HueBridge>> {
        self.bridges.iter().map(|r| r.bridge.clone()).collect()
    }

    pub fn bridge_count(&self) -> usize {
        self.bridges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hue::bridge::{BridgeInfo, SceneActivation, SceneCommand};
    use async_trait::async_trait;

    struct StubBridge(String);

    #[async_trait]
    impl HueBridge for StubBridge {
        fn host(&self) -> &str {
            &self.0
        }

        async fn setup(&self) -> bool {
            true
        }

        async fn reset(&self) -> bool {
            true
        }

        async fn activate_scene(&self, _: &SceneCommand, _: bool, _: bool) -> SceneActivation {
            SceneActivation::Activated
        }

        fn info(&self) -> BridgeInfo {
            serde_json::from_value(serde_json::json!({
                "bridgeid": "001788FFFE000001",
                "mac": "00:17:88:00:00:01",
                "name": "Stub",
                "modelid": "BSB002",
                "swversion": "1"
            }))
            .unwrap()
        }
    }

    fn registration(host: &str) -> BridgeRegistration {
        BridgeRegistration {
            bridge: Arc::new(StubBridge(host.to_string())),
            options: BridgeOptions::default(),
        }
    }

    #[test]
    fn test_options_fall_back_to_defaults() {
        let data = HueData::new();
        assert_eq!(data.options_for("1.2.3.4"), BridgeOptions::default());

        data.set_config(BridgeConfig {
            host: "1.2.3.4".to_string(),
            allow_unreachable: true,
            allow_hue_groups: false,
        });
        let options = data.options_for("1.2.3.4");
        assert!(options.allow_unreachable);
        assert!(!options.allow_groups);
    }

    #[test]
    fn test_one_registration_per_host() {
        let data = HueData::new();
        assert!(data.insert_bridge("1.2.3.4", registration("1.2.3.4")).is_none());
        let replaced = data.insert_bridge("1.2.3.4", registration("1.2.3.4"));
        assert_eq!(replaced.unwrap().bridge.host(), "1.2.3.4");
        assert!(data.insert_bridge("1.2.3.5", registration("1.2.3.5")).is_none());

        assert_eq!(data.bridge_count(), 2);
        assert_eq!(data.bridges().len(), 2);

        let removed = data.remove_bridge("1.2.3.4").unwrap();
        assert_eq!(removed.bridge.host(), "1.2.3.4");
        assert!(!data.contains_bridge("1.2.3.4"));
        assert!(data.remove_bridge("1.2.3.4").is_none());
    }
}
