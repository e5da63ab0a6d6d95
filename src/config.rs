//! Configuration management for kubeassist
//!
//! Handles loading and merging configuration from multiple sources:
//! 1. Compiled defaults
//! 2. System config (/etc/kubeassist/config.toml)
//! 3. User config (~/.kubeassist/config.toml)
//! 4. CLI-specified config file
//! 5. Environment variables

use crate::error::ConfigError;
use crate::plugins::PluginIdentity;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client: ClientConfig,
    pub startup: StartupConfig,
    pub logging: LoggingConfig,
    pub plugins: Vec<PluginEntry>,
}

/// Plugin endpoint client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Deadline for a describe call in seconds
    pub describe_timeout: u64,
    /// Deadline for an invoke call in seconds
    pub invoke_timeout: u64,
    /// TCP connect timeout in seconds
    pub connect_timeout: u64,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Multiplier applied to the delay on each retry
    pub backoff_factor: f64,
    /// Upper bound for a single retry delay
    pub max_delay_ms: u64,
}

/// Startup discovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Readiness budget per plugin in seconds
    pub deadline: u64,
    /// Delay between readiness probes
    pub poll_interval_ms: u64,
    /// Default readiness path; empty means readiness is implied by describe
    pub ready_path: String,
    /// Re-discovery interval for unreachable plugins in seconds (0 disables)
    pub rediscover_interval: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level when RUST_LOG is unset
    pub level: String,
    /// Log format: pretty or json
    pub format: String,
    /// Write an audit record for every invocation
    pub audit: bool,
    /// Audit log file path
    pub audit_path: PathBuf,
    /// Maximum audit log size before rotation
    pub max_audit_size: u64,
    /// Number of rotated audit logs to keep
    pub audit_retention: u32,
    /// Redact secrets from audit records
    pub redact_secrets: bool,
}

/// A configured plugin, as written by the deployment layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginEntry {
    /// Unique plugin name
    pub name: String,
    /// Resolvable network address (http://host:port)
    pub address: Option<String>,
    /// Image reference; only used to tell the resolver this entry needs an address
    pub image: Option<String>,
    /// Port the image listens on
    pub port: Option<u16>,
    /// Service host for image-based entries (defaults to the plugin name)
    pub host: Option<String>,
    /// Execution context (service account) attached out of band
    pub service_account: Option<String>,
    /// Readiness path override
    pub ready_path: Option<String>,
}

/// One config file as written; absent keys leave earlier layers alone
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigLayer {
    client: ClientLayer,
    startup: StartupLayer,
    logging: LoggingLayer,
    plugins: Option<Vec<PluginEntry>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClientLayer {
    describe_timeout: Option<u64>,
    invoke_timeout: Option<u64>,
    connect_timeout: Option<u64>,
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
    backoff_factor: Option<f64>,
    max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StartupLayer {
    deadline: Option<u64>,
    poll_interval_ms: Option<u64>,
    ready_path: Option<String>,
    rediscover_interval: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingLayer {
    level: Option<String>,
    format: Option<String>,
    audit: Option<bool>,
    audit_path: Option<PathBuf>,
    max_audit_size: Option<u64>,
    audit_retention: Option<u32>,
    redact_secrets: Option<bool>,
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

// Default implementations

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            describe_timeout: 5,
            invoke_timeout: 120,
            connect_timeout: 3,
            max_retries: 2,
            base_delay_ms: 200,
            backoff_factor: 2.0,
            max_delay_ms: 2_000,
        }
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            deadline: 30,
            poll_interval_ms: 1_000,
            ready_path: "/healthz".to_string(),
            rediscover_interval: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            level: "warn".to_string(),
            format: "pretty".to_string(),
            audit: true,
            audit_path: home.join(".kubeassist/logs/invocations.log"),
            max_audit_size: 10 * 1024 * 1024, // 10MB
            audit_retention: 5,
            redact_secrets: true,
        }
    }
}

impl ClientConfig {
    pub fn describe_timeout(&self) -> Duration {
        Duration::from_secs(self.describe_timeout)
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_secs(self.invoke_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

impl StartupConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Re-discovery interval, `None` when disabled
    pub fn rediscover_interval(&self) -> Option<Duration> {
        (self.rediscover_interval > 0).then(|| Duration::from_secs(self.rediscover_interval))
    }
}

impl PluginEntry {
    /// Turn this entry into an address.
    ///
    /// Image-based entries map to the in-cluster service named after the
    /// plugin (or `host`). The image reference itself is never inspected.
    pub fn resolve_address(&self) -> Result<String, ConfigError> {
        let address = match (&self.address, &self.image) {
            (Some(address), None) => address.clone(),
            (None, Some(_)) => {
                let port = self.port.ok_or_else(|| {
                    ConfigError::MissingField(format!("plugins.{}.port", self.name))
                })?;
                let host = self.host.as_deref().unwrap_or(&self.name);
                format!("http://{}:{}", host, port)
            }
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(format!(
                    "plugin '{}' sets both address and image",
                    self.name
                )))
            }
            (None, None) => {
                return Err(ConfigError::MissingField(format!(
                    "plugins.{}.address",
                    self.name
                )))
            }
        };

        url::Url::parse(&address).map_err(|e| {
            ConfigError::Invalid(format!("plugin '{}' address {}: {}", self.name, address, e))
        })?;

        Ok(address)
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(cli_config: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // Load system config
        let system_config = Path::new("/etc/kubeassist/config.toml");
        if system_config.exists() {
            debug!("Loading system config from {:?}", system_config);
            config.merge_from_file(system_config)?;
        }

        // Load user config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".kubeassist/config.toml");
            if user_config.exists() {
                debug!("Loading user config from {:?}", user_config);
                config.merge_from_file(&user_config)?;
            }
        }

        // Load CLI-specified config
        if let Some(path) = cli_config {
            debug!("Loading CLI config from {:?}", path);
            config.merge_from_file(path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Merge configuration from a file
    fn merge_from_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;

        let layer: ConfigLayer = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;

        self.merge(layer);
        Ok(())
    }

    /// Merge a layer into this config; only keys the layer sets take effect
    fn merge(&mut self, layer: ConfigLayer) {
        let ConfigLayer {
            client,
            startup,
            logging,
            plugins,
        } = layer;

        set(&mut self.client.describe_timeout, client.describe_timeout);
        set(&mut self.client.invoke_timeout, client.invoke_timeout);
        set(&mut self.client.connect_timeout, client.connect_timeout);
        set(&mut self.client.max_retries, client.max_retries);
        set(&mut self.client.base_delay_ms, client.base_delay_ms);
        set(&mut self.client.backoff_factor, client.backoff_factor);
        set(&mut self.client.max_delay_ms, client.max_delay_ms);

        set(&mut self.startup.deadline, startup.deadline);
        set(&mut self.startup.poll_interval_ms, startup.poll_interval_ms);
        set(&mut self.startup.ready_path, startup.ready_path);
        set(&mut self.startup.rediscover_interval, startup.rediscover_interval);

        set(&mut self.logging.level, logging.level);
        set(&mut self.logging.format, logging.format);
        set(&mut self.logging.audit, logging.audit);
        set(&mut self.logging.audit_path, logging.audit_path);
        set(&mut self.logging.max_audit_size, logging.max_audit_size);
        set(&mut self.logging.audit_retention, logging.audit_retention);
        set(&mut self.logging.redact_secrets, logging.redact_secrets);

        // A layer that lists plugins owns the whole list
        set(&mut self.plugins, plugins);
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("KUBEASSIST_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(timeout) = std::env::var("KUBEASSIST_INVOKE_TIMEOUT") {
            match timeout.parse() {
                Ok(secs) => self.client.invoke_timeout = secs,
                Err(_) => debug!("Ignoring KUBEASSIST_INVOKE_TIMEOUT={}", timeout),
            }
        }
        if let Ok(path) = std::env::var("KUBEASSIST_AUDIT_LOG") {
            self.logging.audit_path = PathBuf::from(path);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.describe_timeout == 0 {
            return Err(ConfigError::Invalid(
                "client.describe_timeout must be > 0".to_string(),
            ));
        }
        if self.client.invoke_timeout == 0 {
            return Err(ConfigError::Invalid(
                "client.invoke_timeout must be > 0".to_string(),
            ));
        }
        if self.client.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "client.backoff_factor must be >= 1.0".to_string(),
            ));
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.format must be one of: {:?}",
                valid_formats
            )));
        }

        let mut seen = HashSet::new();
        for entry in &self.plugins {
            if entry.name.is_empty() {
                return Err(ConfigError::MissingField("plugins.name".to_string()));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate plugin name '{}'",
                    entry.name
                )));
            }
            entry.resolve_address()?;
        }

        Ok(())
    }

    /// Build the immutable plugin identities handed to the plugin manager
    pub fn plugin_identities(&self) -> Result<Vec<PluginIdentity>, ConfigError> {
        self.plugins
            .iter()
            .map(|entry| {
                let ready_path = entry
                    .ready_path
                    .clone()
                    .unwrap_or_else(|| self.startup.ready_path.clone());

                Ok(PluginIdentity {
                    name: entry.name.clone(),
                    address: entry.resolve_address()?,
                    service_account: entry.service_account.clone(),
                    ready_path: (!ready_path.is_empty()).then_some(ready_path),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn entry(name: &str, address: &str) -> PluginEntry {
        PluginEntry {
            name: name.to_string(),
            address: Some(address.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.client.describe_timeout, 5);
        assert!(config.client.invoke_timeout > config.client.describe_timeout);
        assert_eq!(config.startup.ready_path, "/healthz");
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_plugin_names() {
        let mut config = Config::default();
        config.plugins = vec![
            entry("kube-core", "http://a:8080"),
            entry("kube-core", "http://b:8080"),
        ];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate plugin name"));
    }

    #[test]
    fn test_image_entry_resolves_to_service_address() {
        let entry = PluginEntry {
            name: "kube-logs".to_string(),
            image: Some("registry.local/kube-logs:1.2".to_string()),
            port: Some(9090),
            ..Default::default()
        };
        assert_eq!(entry.resolve_address().unwrap(), "http://kube-logs:9090");

        let with_host = PluginEntry {
            host: Some("logs.ops.svc".to_string()),
            ..entry
        };
        assert_eq!(
            with_host.resolve_address().unwrap(),
            "http://logs.ops.svc:9090"
        );
    }

    #[test]
    fn test_image_entry_requires_port() {
        let entry = PluginEntry {
            name: "kube-logs".to_string(),
            image: Some("registry.local/kube-logs:1.2".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            entry.resolve_address(),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_address_and_image_are_exclusive() {
        let entry = PluginEntry {
            name: "both".to_string(),
            address: Some("http://both:1".to_string()),
            image: Some("img".to_string()),
            port: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            entry.resolve_address(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
            [client]
            invoke_timeout = 15
            max_retries = 4

            [logging]
            format = "json"

            [[plugins]]
            name = "kube-core"
            address = "http://kube-core:8080"

            [[plugins]]
            name = "kube-logs"
            image = "registry.local/kube-logs:1.2"
            port = 9090
            service_account = "kube-logs-reader"
            ready_path = ""
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.client.invoke_timeout, 15);
        assert_eq!(config.client.max_retries, 4);
        assert_eq!(config.client.describe_timeout, 5);
        assert_eq!(config.logging.format, "json");
        assert!(config.validate().is_ok());

        let identities = config.plugin_identities().unwrap();
        assert_eq!(identities.len(), 2);
        assert_eq!(identities[0].ready_path.as_deref(), Some("/healthz"));
        assert_eq!(identities[1].address, "http://kube-logs:9090");
        assert_eq!(
            identities[1].service_account.as_deref(),
            Some("kube-logs-reader")
        );
        assert!(identities[1].ready_path.is_none());
    }

    #[test]
    fn test_merge_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [startup]
            deadline = 2

            [[plugins]]
            name = "kube-core"
            address = "http://127.0.0.1:9000"
            "#
        )
        .unwrap();

        let mut config = Config::default();
        config.merge_from_file(file.path()).unwrap();

        assert_eq!(config.startup.deadline, 2);
        assert_eq!(config.plugins.len(), 1);
        assert_eq!(config.client, ClientConfig::default());
    }

    #[test]
    fn test_merge_keeps_earlier_plugins_when_layer_has_none() {
        let mut config = Config::default();
        config.plugins = vec![entry("kube-core", "http://a:8080")];

        config.merge(ConfigLayer::default());
        assert_eq!(config.plugins.len(), 1);
    }

    fn layer_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn test_later_layer_only_overrides_keys_it_sets() {
        let system = layer_file(
            r#"
            [client]
            max_retries = 4

            [startup]
            poll_interval_ms = 250

            [logging]
            audit = false
            redact_secrets = false
            "#,
        );
        let user = layer_file(
            r#"
            [client]
            invoke_timeout = 15

            [startup]
            deadline = 10
            "#,
        );

        let mut config = Config::default();
        config.merge_from_file(system.path()).unwrap();
        config.merge_from_file(user.path()).unwrap();

        assert_eq!(config.client.max_retries, 4);
        assert_eq!(config.client.invoke_timeout, 15);
        assert_eq!(config.startup.poll_interval_ms, 250);
        assert_eq!(config.startup.deadline, 10);
        assert!(!config.logging.audit);
        assert!(!config.logging.redact_secrets);
    }

    #[test]
    fn test_layer_can_restore_default_value() {
        let first = layer_file("[logging]\naudit = false\n");
        let second = layer_file("[logging]\naudit = true\n");

        let mut config = Config::default();
        config.merge_from_file(first.path()).unwrap();
        config.merge_from_file(second.path()).unwrap();
        assert!(config.logging.audit);
    }

    #[test]
    fn test_rediscover_interval_disabled() {
        let startup = StartupConfig {
            rediscover_interval: 0,
            ..Default::default()
        };
        assert!(startup.rediscover_interval().is_none());
    }
}
