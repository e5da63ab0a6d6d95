//! Error types for kubeassist

use crate::plugins::Hook;
use std::time::Duration;
use thiserror::Error;

/// Main error type for kubeassist
#[derive(Error, Debug)]
pub enum KubeassistError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Errors raised while talking to a plugin or dispatching a tool call.
///
/// Application-level failures reported by a plugin (`success: false`) are
/// not errors here: they travel inside an `InvocationResult`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PluginError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Plugin '{plugin}' unreachable after {attempts} attempt(s): {message}")]
    Transport {
        plugin: String,
        message: String,
        attempts: u32,
        /// The connection was never established, so nothing reached the plugin
        connect: bool,
    },

    #[error("Plugin '{plugin}' answered with HTTP {status}")]
    Status { plugin: String, status: u16 },

    #[error("Plugin '{plugin}' sent a malformed response: {message}")]
    Protocol { plugin: String, message: String },

    #[error("Call to plugin '{plugin}' timed out after {elapsed:?}")]
    Timeout { plugin: String, elapsed: Duration },

    #[error("Call to plugin '{plugin}' was cancelled")]
    Cancelled { plugin: String },
}

impl PluginError {
    /// Fixed error code used when the error is folded into an `InvocationResult`
    pub fn code(&self) -> &'static str {
        match self {
            PluginError::UnknownTool(_) => "UNKNOWN_TOOL",
            PluginError::Transport { .. } | PluginError::Status { .. } => "TRANSPORT_ERROR",
            PluginError::Protocol { .. } => "PROTOCOL_ERROR",
            PluginError::Timeout { .. } => "TIMEOUT",
            PluginError::Cancelled { .. } => "CANCELLED",
        }
    }

    /// Whether a bounded retry may help
    pub fn is_transient(&self) -> bool {
        match self {
            PluginError::Transport { .. } => true,
            PluginError::Status { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }

    /// Whether `hook` may be sent again after this error.
    ///
    /// Invoke is not idempotent: it is only resent when the connection was
    /// never established.
    pub fn is_retryable(&self, hook: Hook) -> bool {
        match hook {
            Hook::Describe => self.is_transient(),
            Hook::Invoke => matches!(self, PluginError::Transport { connect: true, .. }),
        }
    }
}

/// Tool registry errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Tool '{tool}' from plugin '{plugin}' is already registered by plugin '{owner}'")]
    Conflict {
        tool: String,
        plugin: String,
        owner: String,
    },

    #[error("Tool not found: {0}")]
    NotFound(String),
}

/// Result type alias using KubeassistError
pub type Result<T> = std::result::Result<T, KubeassistError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(PluginError::UnknownTool("x".into()).code(), "UNKNOWN_TOOL");
        assert_eq!(
            PluginError::Timeout {
                plugin: "p".into(),
                elapsed: Duration::from_secs(1)
            }
            .code(),
            "TIMEOUT"
        );
        assert_eq!(
            PluginError::Cancelled { plugin: "p".into() }.code(),
            "CANCELLED"
        );
    }

    #[test]
    fn test_transient_classification() {
        let refused = PluginError::Transport {
            plugin: "p".into(),
            message: "connection refused".into(),
            attempts: 1,
            connect: true,
        };
        assert!(refused.is_transient());

        let unavailable = PluginError::Status {
            plugin: "p".into(),
            status: 503,
        };
        assert!(unavailable.is_transient());

        let bad_request = PluginError::Status {
            plugin: "p".into(),
            status: 400,
        };
        assert!(!bad_request.is_transient());

        let timeout = PluginError::Timeout {
            plugin: "p".into(),
            elapsed: Duration::from_millis(10),
        };
        assert!(!timeout.is_transient());
    }

    #[test]
    fn test_invoke_retries_only_failed_connects() {
        let refused = PluginError::Transport {
            plugin: "p".into(),
            message: "connection refused".into(),
            attempts: 1,
            connect: true,
        };
        let reset = PluginError::Transport {
            plugin: "p".into(),
            message: "connection reset".into(),
            attempts: 1,
            connect: false,
        };
        let gateway_timeout = PluginError::Status {
            plugin: "p".into(),
            status: 504,
        };

        assert!(refused.is_retryable(Hook::Invoke));
        assert!(!reset.is_retryable(Hook::Invoke));
        assert!(!gateway_timeout.is_retryable(Hook::Invoke));

        assert!(reset.is_retryable(Hook::Describe));
        assert!(gateway_timeout.is_retryable(Hook::Describe));
    }
}
