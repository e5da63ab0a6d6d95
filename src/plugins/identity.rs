//! Plugin identity

use serde::Serialize;

/// A configured plugin, immutable for the process lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginIdentity {
    /// Unique plugin name
    pub name: String,
    /// Resolved base URL the plugin serves its hooks on
    pub address: String,
    /// Execution context attached by an operator; carried, never interpreted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    /// Readiness path, `None` when readiness is implied by describe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_path: Option<String>,
}

impl PluginIdentity {
    /// Identity with a plain address and no readiness endpoint
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            service_account: None,
            ready_path: None,
        }
    }

    /// Set the readiness path
    pub fn with_ready_path(mut self, path: &str) -> Self {
        self.ready_path = Some(path.to_string());
        self
    }
}
