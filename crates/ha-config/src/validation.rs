//! Value coercions for integration config blocks
//!
//! These follow the hub's config validation helpers: lenient booleans,
//! "one item or a list", and IP addresses normalised back to strings.

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::{Mapping, Value};
use std::net::IpAddr;

/// Coerce a YAML value into a boolean
///
/// Accepts real booleans, numbers (anything but zero is `true`), and the
/// strings `true/false`, `yes/no`, `on/off`, `enable/disable`, `1/0`
/// (case-insensitive).
pub fn boolean(key: &str, value: &Value) -> ConfigResult<bool> {
    let invalid = || ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("invalid boolean value {:?}", value),
    };

    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0).ok_or_else(invalid),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" | "enable" => Ok(true),
            "0" | "false" | "no" | "off" | "disable" => Ok(false),
            _ => Err(invalid()),
        },
        _ => Err(invalid()),
    }
}

/// Wrap a single value in a list; null becomes an empty list
pub fn ensure_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Sequence(seq) => seq.clone(),
        other => vec![other.clone()],
    }
}

/// Coerce a scalar to a string
pub fn string(key: &str, value: &Value) -> ConfigResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("expected a string, got {:?}", value),
        }),
    }
}

/// Validate an IPv4 or IPv6 address and return its canonical string form
pub fn ip_address(key: &str, value: &Value) -> ConfigResult<String> {
    let raw = string(key, value)?;
    raw.parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("'{}' does not appear to be an IPv4 or IPv6 address", raw),
        })
}

/// Interpret a value as a mapping
pub fn mapping<'a>(key: &str, value: &'a Value) -> ConfigResult<&'a Mapping> {
    value.as_mapping().ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: "expected a dictionary".to_string(),
    })
}

/// Reject keys outside `allowed`
pub fn no_extra_keys(map: &Mapping, allowed: &[&str]) -> ConfigResult<()> {
    for key in map.keys() {
        match key.as_str() {
            Some(name) if allowed.contains(&name) => {}
            Some(name) => {
                return Err(ConfigError::ExtraKey {
                    key: name.to_string(),
                })
            }
            None => {
                return Err(ConfigError::ExtraKey {
                    key: format!("{:?}", key),
                })
            }
        }
    }
    Ok(())
}
