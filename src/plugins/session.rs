//! Session state threading
//!
//! A session is the caller-owned sequence of invocations sharing one id.
//! The state returned by call N becomes, unmodified, the state of call N+1.
//! The core never looks inside it.

use super::executor::{PluginExecutor, ToolExecutor};
use super::manager::PluginManager;
use super::protocol::{InvocationRequest, InvocationResult, SessionState};
use crate::error::PluginError;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Carry the state of a finished call into the next request
pub fn thread(previous: &InvocationResult, next: InvocationRequest) -> InvocationRequest {
    next.with_state(previous.state.clone())
}

/// Sequential session; calls borrow it mutably so they cannot overlap
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    state: SessionState,
    calls: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Start a session with a fresh id
    pub fn new() -> Self {
        Self::with_id(&uuid::Uuid::new_v4().to_string())
    }

    /// Start a session with a caller-supplied id
    pub fn with_id(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: SessionState::new(),
            calls: 0,
        }
    }

    /// Resume a session from previously saved state
    pub fn resume(id: &str, state: SessionState) -> Self {
        Self {
            state,
            ..Self::with_id(id)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current carried state
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Number of completed calls
    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// Build the next request, carrying the current state
    pub fn request(&self, tool: &str, args: Value) -> InvocationRequest {
        InvocationRequest::new(&self.id, tool, args).with_state(self.state.clone())
    }

    /// Take the state of a finished call
    pub fn absorb(&mut self, result: &InvocationResult) {
        self.state = result.state.clone();
        self.calls += 1;
        debug!(session = %self.id, calls = self.calls, "Session state advanced");
    }

    /// Executor adapter bound to this session
    pub fn executor(&self, manager: &PluginManager) -> PluginExecutor {
        manager.executor(&self.id)
    }

    /// Direct call through the manager.
    ///
    /// On error the state is left untouched.
    pub async fn invoke(
        &mut self,
        manager: &PluginManager,
        tool: &str,
        args: Value,
        cancel: Option<&CancellationToken>,
    ) -> Result<InvocationResult, PluginError> {
        let request = self.request(tool, args);
        let result = manager.invoke(request, cancel).await?;
        self.absorb(&result);
        Ok(result)
    }

    /// Call through an executor adapter
    pub async fn execute(
        &mut self,
        executor: &dyn ToolExecutor,
        tool: &str,
        args: Value,
    ) -> InvocationResult {
        let result = executor.execute(tool, args, self.state.clone()).await;
        self.absorb(&result);
        result
    }
}
