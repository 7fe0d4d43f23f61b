//! `hue:` block of configuration.yaml
//!
//! ```yaml
//! hue:
//!   bridges:
//!     - host: 192.168.1.2
//!       allow_unreachable: true
//!       allow_hue_groups: false
//! ```

use ha_config::validation::{boolean, ensure_list, ip_address, mapping, no_extra_keys};
use ha_config::{ConfigError, ConfigResult, Value};

use super::bridge::BridgeOptions;
use super::{
    CONF_ALLOW_HUE_GROUPS, CONF_ALLOW_UNREACHABLE, CONF_BRIDGES, CONF_HOST,
    DEFAULT_ALLOW_HUE_GROUPS, DEFAULT_ALLOW_UNREACHABLE, DOMAIN,
};

/// One statically configured bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Canonical IP address string
    pub host: String,
    pub allow_unreachable: bool,
    pub allow_hue_groups: bool,
}

impl BridgeConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            allow_unreachable: DEFAULT_ALLOW_UNREACHABLE,
            allow_hue_groups: DEFAULT_ALLOW_HUE_GROUPS,
        }
    }

    /// Options handed to the bridge when it is created
    pub fn options(&self) -> BridgeOptions {
        BridgeOptions {
            allow_unreachable: self.allow_unreachable,
            allow_groups: self.allow_hue_groups,
        }
    }

    fn from_value(value: &Value) -> ConfigResult<Self> {
        let map = mapping(CONF_BRIDGES, value)?;
        no_extra_keys(
            map,
            &[CONF_HOST, CONF_ALLOW_UNREACHABLE, CONF_ALLOW_HUE_GROUPS],
        )?;

        let host = map.get(CONF_HOST).ok_or_else(|| ConfigError::MissingKey {
            key: CONF_HOST.to_string(),
        })?;

        let flag = |key: &str, default: bool| match map.get(key) {
            Some(v) => boolean(key, v),
            None => Ok(default),
        };

        Ok(Self {
            host: ip_address(CONF_HOST, host)?,
            allow_unreachable: flag(CONF_ALLOW_UNREACHABLE, DEFAULT_ALLOW_UNREACHABLE)?,
            allow_hue_groups: flag(CONF_ALLOW_HUE_GROUPS, DEFAULT_ALLOW_HUE_GROUPS)?,
        })
    }
}

/// Validated `hue:` configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HueConfig {
    pub bridges: Vec<BridgeConfig>,
}

impl HueConfig {
    /// Extract the `hue:` block from the full configuration tree
    ///
    /// A missing or empty block yields no bridges. `bridges` may be a single
    /// mapping or a list of them.
    pub fn from_config(config: &Value) -> ConfigResult<Self> {
        let conf = match config.get(DOMAIN) {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(conf) => mapping(DOMAIN, conf)?,
        };
        no_extra_keys(conf, &[CONF_BRIDGES])?;

        let bridges = match conf.get(CONF_BRIDGES) {
            Some(value) => ensure_list(value)
                .iter()
                .map(BridgeConfig::from_value)
                .collect::<ConfigResult<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Self { bridges })
    }
}
