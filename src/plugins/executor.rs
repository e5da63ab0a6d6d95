//! Plugin executor
//!
//! Adapter the AI planning loop calls repeatedly. Every failure, including
//! unknown tools and transport problems, comes back as an `InvocationResult`
//! with a fixed error code and the caller's state preserved, so the loop
//! always has something structured to reason about.

use super::manager::PluginManager;
use super::protocol::{InvocationRequest, InvocationResult, SessionState};
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Uniform call surface for a multi-step planning loop
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run one tool call; the loop decides whether to continue
    async fn execute(&self, tool: &str, args: Value, state: SessionState) -> InvocationResult;
}

/// Executor bound to one session, dispatching through the plugin manager
#[derive(Clone)]
pub struct PluginExecutor {
    manager: PluginManager,
    session_id: String,
    cancel: Option<CancellationToken>,
}

impl PluginExecutor {
    /// Create a new plugin executor
    pub fn new(manager: PluginManager, session_id: &str) -> Self {
        Self {
            manager,
            session_id: session_id.to_string(),
            cancel: None,
        }
    }

    /// Abort in-flight calls when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Tool definitions the loop can choose from
    pub async fn available_tools(&self) -> Vec<super::protocol::ToolDefinition> {
        self.manager.list_tools().await
    }
}

#[async_trait]
impl ToolExecutor for PluginExecutor {
    async fn execute(&self, tool: &str, args: Value, state: SessionState) -> InvocationResult {
        let request =
            InvocationRequest::new(&self.session_id, tool, args).with_state(state.clone());

        match self.manager.invoke(request, self.cancel.as_ref()).await {
            Ok(result) => result,
            Err(e) => {
                debug!(session = %self.session_id, tool = %tool, code = e.code(), "Folding dispatch error into result");
                InvocationResult::from_error(&self.session_id, &e, state)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::client::tests::{describe_then_hang, fast_client};
    use crate::plugins::identity::PluginIdentity;
    use crate::plugins::manager::ManagerSettings;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unknown_tool_folds_into_result() {
        let manager = PluginManager::new(vec![], fast_client(), ManagerSettings::default());
        let executor = manager.executor("s-1");

        let mut state = SessionState::new();
        state.insert("k".to_string(), json!("v"));
        let result = executor.execute("missing.tool", json!({}), state.clone()).await;

        assert!(!result.is_success());
        assert_eq!(result.error().unwrap().code, "UNKNOWN_TOOL");
        assert_eq!(result.session_id, "s-1");
        assert_eq!(result.state, state);
    }

    #[tokio::test]
    async fn test_timeout_folds_into_result_without_state_change() {
        let address = describe_then_hang(json!({
            "name": "slow",
            "version": "1",
            "tools": [{"name": "slow.op", "inputSchema": {}}]
        }))
        .await;

        let manager = PluginManager::new(
            vec![PluginIdentity::new("slow", &address)],
            fast_client().with_timeouts(Duration::from_secs(2), Duration::from_millis(150)),
            ManagerSettings::default(),
        );
        manager.discover_all().await;
        assert!(manager.has_tool("slow.op").await);

        let mut state = SessionState::new();
        state.insert("counter".to_string(), json!(4));
        let result = manager
            .executor("s-2")
            .execute("slow.op", json!({}), state.clone())
            .await;

        assert_eq!(result.error().unwrap().code, "TIMEOUT");
        assert_eq!(result.state, state);
    }
}
