//! Bridge handle contract
//!
//! The integration never talks HTTP itself. It drives bridges through the
//! [`HueBridge`] trait and reads their `/config` snapshot as [`BridgeInfo`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{DEFAULT_ALLOW_HUE_GROUPS, DEFAULT_ALLOW_UNREACHABLE};

/// "Activate scene X in group Y"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneCommand {
    pub group_name: String,
    pub scene_name: String,
}

impl SceneCommand {
    pub fn new(group_name: impl Into<String>, scene_name: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            scene_name: scene_name.into(),
        }
    }
}

/// Result of asking one bridge to activate a scene
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneActivation {
    Activated,
    /// The bridge could not activate the scene (unknown group or scene,
    /// unreachable, timed out)
    Failed(String),
}

impl SceneActivation {
    pub fn failed(reason: impl Into<String>) -> Self {
        SceneActivation::Failed(reason.into())
    }

    pub fn is_activated(&self) -> bool {
        matches!(self, SceneActivation::Activated)
    }
}

/// Per-bridge options from configuration.yaml
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Keep reporting lights the bridge marks unreachable as available
    pub allow_unreachable: bool,
    /// Expose Hue rooms and zones as light groups
    pub allow_groups: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            allow_unreachable: DEFAULT_ALLOW_UNREACHABLE,
            allow_groups: DEFAULT_ALLOW_HUE_GROUPS,
        }
    }
}

/// Firmware update state reported under `swupdate2.bridge.state`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateState {
    NoUpdates,
    Transferring,
    ReadyToInstall,
    Installing,
    AnyReadyToInstall,
    AllReadyToInstall,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeUpdate {
    #[serde(default)]
    pub state: UpdateState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwareUpdate {
    #[serde(default)]
    pub bridge: BridgeUpdate,
}

/// Bridge configuration snapshot, as served by the bridge's `/config`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeInfo {
    #[serde(rename = "bridgeid")]
    pub bridge_id: String,
    pub mac: String,
    pub name: String,
    #[serde(rename = "modelid")]
    pub model_id: String,
    #[serde(rename = "swversion")]
    pub sw_version: String,
    #[serde(default)]
    pub swupdate2: SoftwareUpdate,
}

impl BridgeInfo {
    pub fn update_state(&self) -> UpdateState {
        self.swupdate2.bridge.state
    }
}

/// A connection to one Hue bridge
#[async_trait]
pub trait HueBridge: Send + Sync {
    /// Address the bridge was created for
    fn host(&self) -> &str;

    /// Connect and authenticate; `false` means not reachable yet
    async fn setup(&self) -> bool;

    /// Release the connection; `false` if teardown failed
    async fn reset(&self) -> bool;

    /// Activate a scene by group and scene name
    ///
    /// `force_refresh` reloads groups and scenes from the bridge first.
    /// `hide_warnings` keeps "scene not found" style problems out of the log.
    async fn activate_scene(
        &self,
        command: &SceneCommand,
        force_refresh: bool,
        hide_warnings: bool,
    ) -> SceneActivation;

    /// Configuration snapshot, valid after a successful `setup`
    fn info(&self) -> BridgeInfo;
}

/// Builds bridge handles for config entries
pub trait BridgeFactory: Send + Sync {
    fn create(&self, host: &str, options: BridgeOptions) -> Arc<dyn HueBridge>;
}

impl<F> BridgeFactory for F
where
    F: Fn(&str, BridgeOptions) -> Arc<dyn HueBridge> + Send + Sync,
{
    fn create(&self, host: &str, options: BridgeOptions) -> Arc<dyn HueBridge> {
        self(host, options)
    }
}

/// Normalize a bridge id to the 12 hex digit form
///
/// Bridges report their id in different shapes depending on where it came
/// from: colon separated (zeroconf), with `fffe` spliced into the middle
/// (`/config` and N-UPnP), or already bare.
pub fn normalize_bridge_id(bridge_id: &str) -> String {
    let id = bridge_id.to_lowercase();

    if id.len() == 17 && id.matches(':').count() == 5 {
        return id.replace(':', "");
    }

    if id.len() == 16 && id.get(6..10) == Some("fffe") {
        return format!("{}{}", &id[..6], &id[10..]);
    }

    if id.len() == 12 {
        return id;
    }

    warn!("Received unexpected bridge id: {}", bridge_id);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bridge_id() {
        assert_eq!(normalize_bridge_id("00:17:88:01:09:aa"), "0017880109aa");
        assert_eq!(normalize_bridge_id("001788FFFE0109AA"), "0017880109aa");
        assert_eq!(normalize_bridge_id("0017880109AA"), "0017880109aa");
    }

    #[test]
    fn test_normalize_unexpected_id_lowercased() {
        assert_eq!(normalize_bridge_id("ABC"), "abc");
        // 16 characters without the fffe marker are left alone
        assert_eq!(normalize_bridge_id("001788AAAA0109AA"), "001788aaaa0109aa");
    }

    #[test]
    fn test_bridge_info_from_config_json() {
        let info: BridgeInfo = serde_json::from_value(serde_json::json!({
            "name": "Philips hue",
            "bridgeid": "001788FFFE4B2A7C",
            "mac": "00:17:88:4b:2a:7c",
            "modelid": "BSB002",
            "swversion": "1935144040",
            "apiversion": "1.35.0",
            "swupdate2": {
                "bridge": {"state": "readytoinstall", "lastinstall": "2019-06-01T10:00:00"},
                "state": "anyreadytoinstall"
            }
        }))
        .unwrap();

        assert_eq!(info.bridge_id, "001788FFFE4B2A7C");
        assert_eq!(info.model_id, "BSB002");
        assert_eq!(info.update_state(), UpdateState::ReadyToInstall);
    }

    #[test]
    fn test_update_state_defaults() {
        let info: BridgeInfo = serde_json::from_value(serde_json::json!({
            "name": "Philips hue",
            "bridgeid": "001788FFFE4B2A7C",
            "mac": "00:17:88:4b:2a:7c",
            "modelid": "BSB002",
            "swversion": "1935144040"
        }))
        .unwrap();
        assert_eq!(info.update_state(), UpdateState::Unknown);

        let state: UpdateState = serde_json::from_value(serde_json::json!("rebooting")).unwrap();
        assert_eq!(state, UpdateState::Unknown);
        let state: UpdateState = serde_json::from_value(serde_json::json!("noupdates")).unwrap();
        assert_eq!(state, UpdateState::NoUpdates);
    }

    #[test]
    fn test_scene_activation() {
        assert!(SceneActivation::Activated.is_activated());
        assert!(!SceneActivation::failed("scene not found").is_activated());
    }

    #[test]
    fn test_default_options() {
        let options = BridgeOptions::default();
        assert!(!options.allow_unreachable);
        assert!(options.allow_groups);
    }
}
