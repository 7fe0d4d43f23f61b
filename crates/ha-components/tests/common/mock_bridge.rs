//! Scriptable Hue bridge
//!
//! Stands in for a real bridge connection. Each behaviour can be scripted
//! per test, and every call is recorded for assertions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ha_components::hue::{
    BridgeFactory, BridgeInfo, BridgeOptions, HueBridge, SceneActivation, SceneCommand,
};

use super::fixtures::bridge_config_json;

/// How a bridge answers scene activations
#[derive(Debug, Clone)]
pub enum SceneBehaviour {
    /// Return this result on every pass
    Always(SceneActivation),
    /// First result on the refreshed pass, second after a forced reload
    PerPass(SceneActivation, SceneActivation),
    /// Never answer
    Hang,
    /// Panic inside the call
    Panic,
}

/// One recorded `activate_scene` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneCall {
    pub command: SceneCommand,
    pub force_refresh: bool,
    pub hide_warnings: bool,
}

pub struct MockBridge {
    host: String,
    info: Mutex<BridgeInfo>,
    setup_ok: AtomicBool,
    reset_ok: AtomicBool,
    scene: Mutex<SceneBehaviour>,
    setups: AtomicUsize,
    resets: AtomicUsize,
    calls: Mutex<Vec<SceneCall>>,
}

impl MockBridge {
    /// Bridge that sets up fine and activates every scene
    pub fn new(host: &str) -> Arc<Self> {
        let last_octet = host.rsplit('.').next().unwrap_or("1");
        let suffix = format!("{:0>6}", last_octet);
        let bridge_id = format!("001788FFFE{}", suffix.to_uppercase());
        let mac = format!("00:17:88:{}:{}:{}", &suffix[0..2], &suffix[2..4], &suffix[4..6]);

        Arc::new(Self {
            host: host.to_string(),
            info: Mutex::new(
                serde_json::from_value(bridge_config_json(&bridge_id, &mac)).unwrap(),
            ),
            setup_ok: AtomicBool::new(true),
            reset_ok: AtomicBool::new(true),
            scene: Mutex::new(SceneBehaviour::Always(SceneActivation::Activated)),
            setups: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_setup_ok(&self, ok: bool) {
        self.setup_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_reset_ok(&self, ok: bool) {
        self.reset_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_scene(&self, behaviour: SceneBehaviour) {
        *self.scene.lock().unwrap() = behaviour;
    }

    pub fn set_info(&self, info: BridgeInfo) {
        *self.info.lock().unwrap() = info;
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<SceneCall> {
        self.calls.lock().unwrap().clone()
    }

    /// `(force_refresh, hide_warnings)` of each call, in order
    pub fn pass_flags(&self) -> Vec<(bool, bool)> {
        self.calls()
            .into_iter()
            .map(|c| (c.force_refresh, c.hide_warnings))
            .collect()
    }
}

#[async_trait]
impl HueBridge for MockBridge {
    fn host(&self) -> &str {
        &self.host
    }

    async fn setup(&self) -> bool {
        self.setups.fetch_add(1, Ordering::SeqCst);
        self.setup_ok.load(Ordering::SeqCst)
    }

    async fn reset(&self) -> bool {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.reset_ok.load(Ordering::SeqCst)
    }

    async fn activate_scene(
        &self,
        command: &SceneCommand,
        force_refresh: bool,
        hide_warnings: bool,
    ) -> SceneActivation {
        self.calls.lock().unwrap().push(SceneCall {
            command: command.clone(),
            force_refresh,
            hide_warnings,
        });

        let behaviour = self.scene.lock().unwrap().clone();
        match behaviour {
            SceneBehaviour::Always(result) => result,
            SceneBehaviour::PerPass(refreshed, reloaded) => {
                if force_refresh {
                    reloaded
                } else {
                    refreshed
                }
            }
            SceneBehaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                SceneActivation::failed("woke up")
            }
            SceneBehaviour::Panic => panic!("bridge connection dropped"),
        }
    }

    fn info(&self) -> BridgeInfo {
        self.info.lock().unwrap().clone()
    }
}

/// Hands out pre-built mock bridges by host, creating default ones on demand
#[derive(Default)]
pub struct MockBridgeFactory {
    bridges: DashMap<String, Arc<MockBridge>>,
    created: Mutex<Vec<(String, BridgeOptions)>>,
}

impl MockBridgeFactory {
    pub fn add(&self, bridge: Arc<MockBridge>) {
        self.bridges.insert(bridge.host.clone(), bridge);
    }

    /// The bridge for `host`, created with defaults if missing
    pub fn bridge(&self, host: &str) -> Arc<MockBridge> {
        self.bridges
            .entry(host.to_string())
            .or_insert_with(|| MockBridge::new(host))
            .clone()
    }

    /// Every `create` call so far
    pub fn created(&self) -> Vec<(String, BridgeOptions)> {
        self.created.lock().unwrap().clone()
    }
}

impl BridgeFactory for MockBridgeFactory {
    fn create(&self, host: &str, options: BridgeOptions) -> Arc<dyn HueBridge> {
        self.created
            .lock()
            .unwrap()
            .push((host.to_string(), options));
        self.bridge(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_follow_host() {
        let info = MockBridge::new("10.0.0.42").info();
        assert_eq!(info.bridge_id, "001788FFFE000042");
        assert_eq!(info.mac, "00:17:88:00:00:42");
    }
}
