//! Plugin endpoint client
//!
//! Performs one request/response round trip against a plugin address.
//! Each call has an effective deadline covering all of its attempts; only
//! transient connection failures are retried, with exponential backoff.

use super::identity::PluginIdentity;
use super::protocol::{DescribeResponse, Hook, InvocationRequest, InvokeResponse, PluginRequest};
use crate::config::ClientConfig;
use crate::error::{ConfigError, PluginError};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for RetryPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            backoff_factor: config.backoff_factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (1-indexed)
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let delay_ms =
            self.base_delay.as_millis() as f64 * self.backoff_factor.powi(retry as i32 - 1);
        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64) as u64;
        Duration::from_millis(delay_ms)
    }

    pub fn should_retry(&self, retry: u32) -> bool {
        retry <= self.max_retries
    }
}

/// HTTP client shared by all plugin calls
#[derive(Debug, Clone)]
pub struct EndpointClient {
    http: reqwest::Client,
    describe_timeout: Duration,
    invoke_timeout: Duration,
    retry: RetryPolicy,
}

impl EndpointClient {
    /// Create a client from configuration
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            describe_timeout: config.describe_timeout(),
            invoke_timeout: config.invoke_timeout(),
            retry: RetryPolicy::from(config),
        })
    }

    /// Override the per-hook deadlines
    pub fn with_timeouts(mut self, describe: Duration, invoke: Duration) -> Self {
        self.describe_timeout = describe;
        self.invoke_timeout = invoke;
        self
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Deadline applied to a hook
    pub fn timeout_for(&self, hook: Hook) -> Duration {
        match hook {
            Hook::Describe => self.describe_timeout,
            Hook::Invoke => self.invoke_timeout,
        }
    }

    /// Call the describe hook
    pub async fn describe(&self, identity: &PluginIdentity) -> Result<DescribeResponse, PluginError> {
        self.send(identity, &PluginRequest::Describe, None).await
    }

    /// Call the invoke hook
    pub async fn invoke(
        &self,
        identity: &PluginIdentity,
        request: &InvocationRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<InvokeResponse, PluginError> {
        self.send(identity, &request.to_wire(), cancel).await
    }

    /// Send one request envelope and decode the response
    pub async fn send<T: DeserializeOwned>(
        &self,
        identity: &PluginIdentity,
        request: &PluginRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, PluginError> {
        let hook = request.hook();
        let deadline = self.timeout_for(hook);
        let started = Instant::now();

        debug!(plugin = %identity.name, %hook, "Sending plugin request");

        let attempts = tokio::time::timeout(deadline, self.send_with_retry(identity, request));
        let outcome = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(plugin = %identity.name, %hook, "Plugin request cancelled");
                    return Err(PluginError::Cancelled {
                        plugin: identity.name.clone(),
                    });
                }
                outcome = attempts => outcome,
            },
            None => attempts.await,
        };

        outcome.unwrap_or_else(|_| {
            warn!(plugin = %identity.name, %hook, ?deadline, "Plugin request timed out");
            Err(PluginError::Timeout {
                plugin: identity.name.clone(),
                elapsed: started.elapsed(),
            })
        })
    }

    /// Probe the readiness endpoint once
    pub async fn probe_ready(&self, identity: &PluginIdentity) -> Result<(), PluginError> {
        let Some(path) = identity.ready_path.as_deref() else {
            return Ok(());
        };

        let url = readiness_url(&identity.address, path).map_err(|e| PluginError::Transport {
            plugin: identity.name.clone(),
            message: format!("invalid readiness url: {}", e),
            attempts: 1,
            connect: false,
        })?;

        let response = self
            .http
            .get(url)
            .timeout(self.describe_timeout)
            .send()
            .await
            .map_err(|e| transport(identity, &e, 1))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PluginError::Status {
                plugin: identity.name.clone(),
                status: status.as_u16(),
            })
        }
    }

    async fn send_with_retry<T: DeserializeOwned>(
        &self,
        identity: &PluginIdentity,
        request: &PluginRequest,
    ) -> Result<T, PluginError> {
        let hook = request.hook();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(identity, request, attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable(hook) && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        plugin = %identity.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient plugin failure, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        identity: &PluginIdentity,
        request: &PluginRequest,
        attempt: u32,
    ) -> Result<T, PluginError> {
        let response = self
            .http
            .post(&identity.address)
            .json(request)
            .send()
            .await
            .map_err(|e| transport(identity, &e, attempt))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PluginError::Status {
                plugin: identity.name.clone(),
                status: status.as_u16(),
            });
        }

        response.json::<T>().await.map_err(|e| PluginError::Protocol {
            plugin: identity.name.clone(),
            message: e.to_string(),
        })
    }
}

/// Resolve `path` under the address, keeping any path prefix it carries
fn readiness_url(address: &str, path: &str) -> Result<url::Url, url::ParseError> {
    let mut base = url::Url::parse(address)?;
    if !base.path().ends_with('/') {
        let prefixed = format!("{}/", base.path());
        base.set_path(&prefixed);
    }
    base.join(path.trim_start_matches('/'))
}

fn transport(identity: &PluginIdentity, error: &reqwest::Error, attempts: u32) -> PluginError {
    PluginError::Transport {
        plugin: identity.name.clone(),
        message: error.to_string(),
        attempts,
        connect: error.is_connect(),
    }
}
