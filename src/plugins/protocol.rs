//! Plugin protocol definitions
//!
//! Defines the JSON request/response format every plugin serves over HTTP.
//! One request envelope carries either the `describe` or the `invoke` hook.

use crate::error::PluginError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::warn;

/// Opaque per-session state threaded between calls
pub type SessionState = Map<String, Value>;

/// Protocol operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hook {
    Describe,
    Invoke,
}

impl std::fmt::Display for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hook::Describe => write!(f, "describe"),
            Hook::Invoke => write!(f, "invoke"),
        }
    }
}

/// Tool definition as declared by a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (e.g., "kubectl.get")
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Structural description of accepted arguments
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// Request envelope sent to a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "hook", rename_all = "lowercase")]
pub enum PluginRequest {
    Describe,
    Invoke {
        #[serde(rename = "sessionId")]
        session_id: String,
        payload: InvokePayload,
    },
}

/// Payload of an invoke request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokePayload {
    pub tool: String,
    pub args: Value,
    #[serde(default)]
    pub state: SessionState,
}

impl PluginRequest {
    /// Hook this request targets
    pub fn hook(&self) -> Hook {
        match self {
            PluginRequest::Describe => Hook::Describe,
            PluginRequest::Invoke { .. } => Hook::Invoke,
        }
    }
}

/// Response to the describe hook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeResponse {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Raw tool entries; each is decoded on its own in `into_tools`
    #[serde(default)]
    pub tools: Vec<Value>,
}

impl DescribeResponse {
    /// Validate the response and return the tools that may be registered.
    ///
    /// Duplicate names reject the whole response. Individually malformed
    /// tools are dropped with a warning.
    pub fn into_tools(self, plugin: &str) -> Result<Vec<ToolDefinition>, PluginError> {
        if self.name != plugin {
            warn!(
                plugin = %plugin,
                described = %self.name,
                "Plugin describes itself under a different name"
            );
        }

        let mut decoded = Vec::with_capacity(self.tools.len());
        for (index, raw) in self.tools.into_iter().enumerate() {
            match serde_json::from_value::<ToolDefinition>(raw) {
                Ok(tool) => decoded.push(tool),
                Err(e) => warn!(plugin = %plugin, index, "Dropping undecodable tool: {}", e),
            }
        }

        let mut seen = HashSet::new();
        for tool in &decoded {
            if !seen.insert(tool.name.as_str()) {
                return Err(PluginError::Protocol {
                    plugin: plugin.to_string(),
                    message: format!("duplicate tool '{}' in describe response", tool.name),
                });
            }
        }

        let tools = decoded
            .into_iter()
            .filter(|tool| match check_tool(tool) {
                Ok(()) => true,
                Err(reason) => {
                    warn!(plugin = %plugin, tool = %tool.name, "Dropping tool: {}", reason);
                    false
                }
            })
            .collect();

        Ok(tools)
    }
}

/// Check a single tool definition
fn check_tool(tool: &ToolDefinition) -> Result<(), String> {
    if tool.name.trim().is_empty() {
        return Err("empty tool name".to_string());
    }

    let schema = tool
        .input_schema
        .as_object()
        .ok_or_else(|| "inputSchema is not an object".to_string())?;

    match schema.get("type") {
        None => Ok(()),
        Some(Value::String(t)) if t == "object" => Ok(()),
        Some(other) => Err(format!("inputSchema type must be \"object\", got {}", other)),
    }
}

/// Error detail carried by a failed invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorInfo {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            details: None,
        }
    }
}

/// Raw invoke response as it appears on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResponse {
    #[serde(rename = "sessionId", default)]
    pub session_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl InvokeResponse {
    /// Convert into an `InvocationResult`.
    ///
    /// `carried` is the state the request was sent with; it is kept when a
    /// failed call returns no state of its own.
    pub fn into_result(
        self,
        plugin: &str,
        session_id: &str,
        carried: SessionState,
    ) -> Result<InvocationResult, PluginError> {
        let protocol = |message: &str| PluginError::Protocol {
            plugin: plugin.to_string(),
            message: message.to_string(),
        };

        if !self.session_id.is_empty() && self.session_id != session_id {
            warn!(
                plugin = %plugin,
                expected = %session_id,
                received = %self.session_id,
                "Invoke response carries a different session id"
            );
        }

        let state = match self.state {
            Some(Value::Object(map)) => map,
            Some(Value::Null) | None if !self.success => carried,
            Some(Value::Null) | None => SessionState::new(),
            Some(_) => return Err(protocol("state is not an object")),
        };

        let outcome = match (self.success, self.error) {
            (true, None) => Outcome::Success(self.result.unwrap_or(Value::Null)),
            (false, Some(error)) => Outcome::Failure(error),
            (true, Some(_)) => return Err(protocol("successful response carries an error")),
            (false, None) => return Err(protocol("failed response carries no error")),
        };

        Ok(InvocationResult {
            session_id: session_id.to_string(),
            outcome,
            state,
        })
    }
}

/// A call to a named tool within a session
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    /// Caller-supplied correlation id, never interpreted
    pub session_id: String,
    pub tool: String,
    /// Passed through to the plugin as-is
    pub args: Value,
    /// State carried from the previous call (empty on the first call)
    pub state: SessionState,
}

impl InvocationRequest {
    /// Create a first-call request with empty state
    pub fn new(session_id: &str, tool: &str, args: Value) -> Self {
        Self {
            session_id: session_id.to_string(),
            tool: tool.to_string(),
            args,
            state: SessionState::new(),
        }
    }

    /// Attach carried-forward state
    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = state;
        self
    }

    /// Build the wire envelope
    pub fn to_wire(&self) -> PluginRequest {
        PluginRequest::Invoke {
            session_id: self.session_id.clone(),
            payload: InvokePayload {
                tool: self.tool.clone(),
                args: self.args.clone(),
                state: self.state.clone(),
            },
        }
    }
}

/// Outcome of an invocation; success and error are mutually exclusive
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Failure(ErrorInfo),
}

/// Result of an invocation, as seen by callers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "InvokeResponse")]
pub struct InvocationResult {
    pub session_id: String,
    pub outcome: Outcome,
    /// Always present so a session can recover after a failed call
    pub state: SessionState,
}

impl InvocationResult {
    /// Create a success result
    pub fn success(session_id: &str, result: Value, state: SessionState) -> Self {
        Self {
            session_id: session_id.to_string(),
            outcome: Outcome::Success(result),
            state,
        }
    }

    /// Create a failure result
    pub fn failure(session_id: &str, error: ErrorInfo, state: SessionState) -> Self {
        Self {
            session_id: session_id.to_string(),
            outcome: Outcome::Failure(error),
            state,
        }
    }

    /// Fold a dispatch error into a failure that keeps the caller's state
    pub fn from_error(session_id: &str, error: &PluginError, state: SessionState) -> Self {
        Self::failure(
            session_id,
            ErrorInfo::new(error.code(), &error.to_string()),
            state,
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    /// Success payload, if any
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Success(value) => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    /// Error detail, if any
    pub fn error(&self) -> Option<&ErrorInfo> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure(error) => Some(error),
        }
    }
}

impl From<InvocationResult> for InvokeResponse {
    fn from(result: InvocationResult) -> Self {
        let (success, result_value, error) = match result.outcome {
            Outcome::Success(value) => (true, Some(value), None),
            Outcome::Failure(error) => (false, None, Some(error)),
        };
        Self {
            session_id: result.session_id,
            success,
            result: result_value,
            state: Some(Value::Object(result.state)),
            error,
        }
    }
}
