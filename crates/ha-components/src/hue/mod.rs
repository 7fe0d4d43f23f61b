//! Philips Hue integration
//!
//! Wires Hue bridges into the config entry lifecycle and exposes the
//! `hue.hue_activate_scene` service.
//!
//! - [`HueConfig`] parses the `hue:` block of `configuration.yaml`
//! - [`HueIntegration`] imports configured bridges as config entries and
//!   handles their setup and unload
//! - [`SceneDispatcher`] broadcasts scene activations to every bridge, with a
//!   single reload-and-retry pass when no bridge accepts the scene
//!
//! Talking to the bridge itself is left to a [`HueBridge`] implementation
//! produced by a [`BridgeFactory`].

mod bridge;
mod config;
mod data;
mod error;
mod integration;
mod scene;

pub use bridge::{
    normalize_bridge_id, BridgeFactory, BridgeInfo, BridgeOptions, BridgeUpdate, HueBridge,
    SceneActivation, SceneCommand, SoftwareUpdate, UpdateState,
};
pub use config::{BridgeConfig, HueConfig};
pub use data::{BridgeRegistration, HueData};
pub use error::{HueError, HueResult};
pub use integration::HueIntegration;
pub use scene::{DispatchOptions, DispatchOutcome, SceneDispatcher, ScenePass};

/// Integration domain
pub const DOMAIN: &str = "hue";

/// Scene activation service name
pub const SERVICE_HUE_SCENE: &str = "hue_activate_scene";
pub const ATTR_GROUP_NAME: &str = "group_name";
pub const ATTR_SCENE_NAME: &str = "scene_name";

pub const CONF_BRIDGES: &str = "bridges";
pub const CONF_HOST: &str = "host";
pub const CONF_ALLOW_UNREACHABLE: &str = "allow_unreachable";
pub const CONF_ALLOW_HUE_GROUPS: &str = "allow_hue_groups";

pub const DEFAULT_ALLOW_UNREACHABLE: bool = false;
pub const DEFAULT_ALLOW_HUE_GROUPS: bool = true;

/// Manufacturer recorded in the device registry
pub const MANUFACTURER: &str = "Signify";

/// JSON schema for `hue.hue_activate_scene` service data
pub fn scene_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "group_name": {"type": "string"},
            "scene_name": {"type": "string"}
        },
        "required": ["group_name", "scene_name"]
    })
}
