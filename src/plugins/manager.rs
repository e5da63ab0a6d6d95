//! Plugin manager
//!
//! Owns the configured plugins and drives their lifecycle:
//!
//! ```text
//! Pending --(ready + describe + register)--> Ready
//!    |                                         |
//!    +--(readiness/describe/conflict fails)--> Unreachable --(rediscovery)--> Pending
//! ```
//!
//! Startup discovery runs one task per plugin, so a slow or dead plugin never
//! holds up the others. Dispatch resolves a tool name through the registry
//! and sends the invoke hook to the owning plugin.

use super::client::EndpointClient;
use super::executor::PluginExecutor;
use super::identity::PluginIdentity;
use super::protocol::{InvocationRequest, InvocationResult, ToolDefinition};
use super::registry::ToolRegistry;
use crate::config::{Config, StartupConfig};
use crate::error::{KubeassistError, PluginError};
use crate::logging::AuditLogger;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Pending,
    Ready,
    Unreachable,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginState::Pending => write!(f, "pending"),
            PluginState::Ready => write!(f, "ready"),
            PluginState::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Health of one plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginHealth {
    pub name: String,
    pub address: String,
    pub state: PluginState,
    pub tool_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Operator-facing health snapshot
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub plugins: Vec<PluginHealth>,
    /// Aggregate number of registered tools
    pub tool_count: usize,
}

impl HealthReport {
    /// Plugins currently in `state`
    pub fn count(&self, state: PluginState) -> usize {
        self.plugins.iter().filter(|p| p.state == state).count()
    }

    /// True when at least one plugin is not ready
    pub fn is_degraded(&self) -> bool {
        self.plugins.iter().any(|p| p.state != PluginState::Ready)
    }

    pub fn plugin(&self, name: &str) -> Option<&PluginHealth> {
        self.plugins.iter().find(|p| p.name == name)
    }
}

/// Discovery timing
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSettings {
    /// Readiness budget per plugin
    pub startup_deadline: Duration,
    /// Delay between readiness probes
    pub poll_interval: Duration,
    /// Background re-discovery period; `None` disables it
    pub rediscover_interval: Option<Duration>,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from(&StartupConfig::default())
    }
}

impl From<&StartupConfig> for ManagerSettings {
    fn from(config: &StartupConfig) -> Self {
        Self {
            startup_deadline: config.deadline(),
            poll_interval: config.poll_interval(),
            rediscover_interval: config.rediscover_interval(),
        }
    }
}

/// Plugin manager; cheap to clone, all clones share state
#[derive(Clone)]
pub struct PluginManager {
    plugins: Arc<HashMap<String, PluginIdentity>>,
    order: Arc<Vec<String>>,
    client: EndpointClient,
    registry: ToolRegistry,
    health: Arc<RwLock<HashMap<String, PluginHealth>>>,
    settings: ManagerSettings,
    audit: Option<Arc<Mutex<AuditLogger>>>,
}

impl PluginManager {
    /// Create a manager; every plugin starts out Pending
    pub fn new(
        identities: Vec<PluginIdentity>,
        client: EndpointClient,
        settings: ManagerSettings,
    ) -> Self {
        let now = Utc::now();
        let mut plugins = HashMap::new();
        let mut order = Vec::new();
        let mut health = HashMap::new();

        for identity in identities {
            if plugins.contains_key(&identity.name) {
                warn!(plugin = %identity.name, "Duplicate plugin identity ignored");
                continue;
            }
            health.insert(
                identity.name.clone(),
                PluginHealth {
                    name: identity.name.clone(),
                    address: identity.address.clone(),
                    state: PluginState::Pending,
                    tool_count: 0,
                    version: None,
                    last_error: None,
                    updated_at: now,
                },
            );
            order.push(identity.name.clone());
            plugins.insert(identity.name.clone(), identity);
        }

        Self {
            plugins: Arc::new(plugins),
            order: Arc::new(order),
            client,
            registry: ToolRegistry::new(),
            health: Arc::new(RwLock::new(health)),
            settings,
            audit: None,
        }
    }

    /// Build a manager from loaded configuration
    pub fn from_config(config: &Config) -> Result<Self, KubeassistError> {
        let client = EndpointClient::new(&config.client)?;
        let identities = config.plugin_identities()?;
        let manager = Self::new(identities, client, ManagerSettings::from(&config.startup));

        Ok(if config.logging.audit {
            manager.with_audit(AuditLogger::new(config.logging.clone()))
        } else {
            manager
        })
    }

    /// Record every invocation to an audit log
    pub fn with_audit(mut self, logger: AuditLogger) -> Self {
        self.audit = Some(Arc::new(Mutex::new(logger)));
        self
    }

    /// Discover every configured plugin concurrently.
    ///
    /// Always completes; failures are reflected in the returned report.
    pub async fn discover_all(&self) -> HealthReport {
        let started = Instant::now();
        self.discover_concurrently(self.order.to_vec()).await;

        let report = self.health().await;
        info!(
            ready = report.count(PluginState::Ready),
            unreachable = report.count(PluginState::Unreachable),
            tools = report.tool_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Plugin discovery finished"
        );
        report
    }

    /// Run discovery for one plugin again (e.g. after it restarted).
    ///
    /// Returns `None` for an unknown plugin name.
    pub async fn rediscover(&self, name: &str) -> Option<PluginState> {
        let identity = self.plugins.get(name)?;
        Some(self.discover_plugin(identity).await)
    }

    /// Move every Unreachable plugin back through discovery.
    ///
    /// Returns how many became Ready.
    pub async fn rediscover_unreachable(&self) -> usize {
        let unreachable: Vec<String> = {
            let health = self.health.read().await;
            self.order
                .iter()
                .filter(|name| {
                    health
                        .get(*name)
                        .map(|h| h.state == PluginState::Unreachable)
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        self.discover_concurrently(unreachable).await
    }

    /// One discovery task per plugin; returns how many ended Ready
    async fn discover_concurrently(&self, names: Vec<String>) -> usize {
        let mut tasks = JoinSet::new();
        for name in names {
            let manager = self.clone();
            tasks.spawn(async move { manager.rediscover(&name).await });
        }

        let mut ready = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(PluginState::Ready)) => ready += 1,
                Ok(_) => {}
                Err(e) => error!("Discovery task failed: {}", e),
            }
        }
        ready
    }

    /// Periodically retry Unreachable plugins until `cancel` fires
    pub fn spawn_rediscovery(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let recovered = manager.rediscover_unreachable().await;
                        if recovered > 0 {
                            info!(recovered, "Plugins recovered by re-discovery");
                        }
                    }
                }
            }
            debug!("Re-discovery loop stopped");
        })
    }

    /// Start the re-discovery loop if the settings enable one
    pub fn spawn_configured_rediscovery(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let interval = self.settings.rediscover_interval?;
        debug!(interval_secs = interval.as_secs(), "Starting re-discovery loop");
        Some(self.spawn_rediscovery(interval, cancel))
    }

    async fn discover_plugin(&self, identity: &PluginIdentity) -> PluginState {
        self.update_health(&identity.name, PluginState::Pending, |_| {})
            .await;

        match self.try_discover(identity).await {
            Ok((version, count)) => {
                info!(
                    plugin = %identity.name,
                    version = %version,
                    tools = count,
                    service_account = identity.service_account.as_deref().unwrap_or("-"),
                    "Plugin ready"
                );
                self.update_health(&identity.name, PluginState::Ready, |h| {
                    h.tool_count = count;
                    h.version = Some(version);
                    h.last_error = None;
                })
                .await;
                PluginState::Ready
            }
            Err(e) => {
                let removed = self.registry.unregister(&identity.name).await;
                warn!(
                    plugin = %identity.name,
                    address = %identity.address,
                    removed_tools = removed,
                    "Plugin unreachable: {}",
                    e
                );
                self.update_health(&identity.name, PluginState::Unreachable, |h| {
                    h.tool_count = 0;
                    h.last_error = Some(e.to_string());
                })
                .await;
                PluginState::Unreachable
            }
        }
    }

    async fn try_discover(
        &self,
        identity: &PluginIdentity,
    ) -> Result<(String, usize), KubeassistError> {
        self.wait_ready(identity).await?;

        let described = self.client.describe(identity).await?;
        let version = described.version.clone();
        let tools = described.into_tools(&identity.name)?;
        let count = self.registry.register(&identity.name, tools).await?;

        Ok((version, count))
    }

    /// Poll readiness until it succeeds or the startup deadline elapses
    async fn wait_ready(&self, identity: &PluginIdentity) -> Result<(), PluginError> {
        let deadline = self.settings.startup_deadline;
        let interval = self.settings.poll_interval;
        let started = Instant::now();
        let mut last_error = None;

        let polling = async {
            loop {
                match self.client.probe_ready(identity).await {
                    Ok(()) => return,
                    Err(e) => {
                        debug!(plugin = %identity.name, "Not ready yet: {}", e);
                        last_error = Some(e);
                    }
                }
                tokio::time::sleep(interval).await;
            }
        };
        let outcome = tokio::time::timeout(deadline, polling).await;

        match outcome {
            Ok(()) => Ok(()),
            Err(_) => Err(last_error.unwrap_or(PluginError::Timeout {
                plugin: identity.name.clone(),
                elapsed: started.elapsed(),
            })),
        }
    }

    async fn update_health<F>(&self, name: &str, state: PluginState, apply: F)
    where
        F: FnOnce(&mut PluginHealth),
    {
        let mut health = self.health.write().await;
        if let Some(entry) = health.get_mut(name) {
            entry.state = state;
            entry.updated_at = Utc::now();
            apply(entry);
        }
    }

    /// Direct invoke for deterministic call sites.
    ///
    /// An unknown tool fails with `UnknownTool` without any network call.
    /// Plugin-reported failures come back as `Ok` with a failure outcome.
    pub async fn invoke(
        &self,
        request: InvocationRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<InvocationResult, PluginError> {
        let started = Instant::now();
        let identity = match self.route(&request.tool).await {
            Ok(identity) => identity,
            Err(e) => {
                debug!(session = %request.session_id, tool = %request.tool, "Unknown tool");
                self.record(&request, None, &Err(e.clone()), started.elapsed());
                return Err(e);
            }
        };

        debug!(
            session = %request.session_id,
            tool = %request.tool,
            plugin = %identity.name,
            "Dispatching tool call"
        );

        let outcome = match self.client.invoke(identity, &request, cancel).await {
            Ok(response) => {
                response.into_result(&identity.name, &request.session_id, request.state.clone())
            }
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(result) if !result.is_success() => {
                if let Some(err) = result.error() {
                    info!(tool = %request.tool, plugin = %identity.name, code = %err.code, "Tool reported failure");
                }
            }
            Err(e) => warn!(tool = %request.tool, plugin = %identity.name, "Tool call failed: {}", e),
            _ => {}
        }

        self.record(&request, Some(&identity.name), &outcome, started.elapsed());
        outcome
    }

    /// Resolve a tool name to its owning plugin
    async fn route(&self, tool: &str) -> Result<&PluginIdentity, PluginError> {
        let owner = self
            .registry
            .resolve(tool)
            .await
            .map_err(|_| PluginError::UnknownTool(tool.to_string()))?;
        self.plugins
            .get(&owner)
            .ok_or_else(|| PluginError::UnknownTool(tool.to_string()))
    }

    fn record(
        &self,
        request: &InvocationRequest,
        plugin: Option<&str>,
        outcome: &Result<InvocationResult, PluginError>,
        elapsed: Duration,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };
        match audit.lock() {
            Ok(mut logger) => logger.log_invocation(request, plugin, outcome, elapsed),
            Err(e) => error!("Audit logger unavailable: {}", e),
        }
    }

    /// Executor adapter for a planning loop working on `session_id`
    pub fn executor(&self, session_id: &str) -> PluginExecutor {
        PluginExecutor::new(self.clone(), session_id)
    }

    /// All registered tool definitions
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        self.registry.list_all().await
    }

    /// Check if a tool is available
    pub async fn has_tool(&self, tool: &str) -> bool {
        self.registry.has_tool(tool).await
    }

    /// Current state of one plugin
    pub async fn state(&self, name: &str) -> Option<PluginState> {
        self.health.read().await.get(name).map(|h| h.state)
    }

    /// Health snapshot, in configuration order
    pub async fn health(&self) -> HealthReport {
        let plugins: Vec<PluginHealth> = {
            let health = self.health.read().await;
            self.order
                .iter()
                .filter_map(|name| health.get(name).cloned())
                .collect()
        };

        HealthReport {
            plugins,
            tool_count: self.registry.tool_count().await,
        }
    }

    /// Configured identity of a plugin
    pub fn plugin(&self, name: &str) -> Option<&PluginIdentity> {
        self.plugins.get(name)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}
