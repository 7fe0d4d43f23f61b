//! Service call type for invoking hub services

use crate::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A call to a service registered by an integration
///
/// Services are addressed as `domain.service` (for example
/// `hue.hue_activate_scene`) and carry free-form JSON data that the
/// registry validates against the service schema before the handler runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCall {
    /// Integration domain owning the service (e.g., "hue")
    pub domain: String,

    /// Service name (e.g., "hue_activate_scene")
    pub service: String,

    /// Data passed to the service
    pub service_data: serde_json::Value,

    /// Context tracking who initiated this call
    pub context: Context,
}

impl ServiceCall {
    /// Create a new service call
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        service_data: serde_json::Value,
        context: Context,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            service_data,
            context,
        }
    }

    /// Full service identifier (domain.service)
    pub fn service_id(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }

    /// Get a single value from service_data
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.service_data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Deserialize the whole service_data payload into a typed command
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.service_data)
    }
}

/// Whether a service supports returning a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportsResponse {
    /// Service never returns a response
    #[default]
    None,
    /// Service may optionally return a response
    Optional,
    /// Service always returns a response
    Only,
}
