//! kubeassist - plugin invocation core for a Kubernetes operations assistant
//!
//! Discovers tool-serving plugins, routes tool calls to them and threads
//! per-session state across consecutive calls.

pub mod config;
pub mod error;
pub mod logging;
pub mod plugins;

pub use config::Config;
pub use error::{KubeassistError, Result};
pub use plugins::{PluginManager, Session, ToolExecutor};
