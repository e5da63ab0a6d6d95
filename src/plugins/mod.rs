//! Plugin invocation subsystem
//!
//! Plugins are out-of-process tool servers reached over HTTP. The manager
//! discovers what each one offers, keeps a tool registry, and dispatches
//! tool calls with opaque session state threaded between them.

mod client;
mod executor;
mod identity;
mod manager;
mod protocol;
mod registry;
mod session;

pub use client::{EndpointClient, RetryPolicy};
pub use executor::{PluginExecutor, ToolExecutor};
pub use identity::PluginIdentity;
pub use manager::{HealthReport, ManagerSettings, PluginHealth, PluginManager, PluginState};
pub use protocol::{
    DescribeResponse, ErrorInfo, Hook, InvocationRequest, InvocationResult, InvokeResponse,
    Outcome, PluginRequest, SessionState, ToolDefinition,
};
pub use registry::{RegisteredTool, ToolRegistry};
pub use session::{thread, Session};
