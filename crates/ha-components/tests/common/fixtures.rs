//! Test fixtures and data loading

use std::path::Path;

/// Load a fixture file as a string
///
/// Fixtures are stored in the `tests/fixtures/` directory.
pub fn load_fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);

    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to load fixture '{}' from {:?}: {}", name, path, e))
}

/// Load a fixture file as JSON
pub fn load_json_fixture(name: &str) -> serde_json::Value {
    let content = load_fixture(name);
    serde_json::from_str(&content)
        .unwrap_or_else(|e| panic!("Failed to parse fixture '{}' as JSON: {}", name, e))
}

/// Bridge `/config` response with the given id and MAC
pub fn bridge_config_json(bridge_id: &str, mac: &str) -> serde_json::Value {
    let mut config = load_json_fixture("hue_bridge_config.json");
    config["bridgeid"] = serde_json::json!(bridge_id);
    config["mac"] = serde_json::json!(mac);
    config
}
