//! Invocation audit log
//!
//! Appends one JSON line per tool invocation: who asked for what, which
//! plugin served it, how it ended and how long it took. Arguments are
//! redacted before they reach disk.

use crate::config::LoggingConfig;
use crate::error::PluginError;
use crate::plugins::{InvocationRequest, InvocationResult};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Secret patterns for redaction
static SECRET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // API keys and tokens
        Regex::new(
            r#"(?i)(api[_-]?key|token|secret|password|passwd|pwd)\s*[=:]\s*['"]?([^'"\s]+)['"]?"#,
        )
        .unwrap(),
        // Bearer tokens
        Regex::new(r"(?i)bearer\s+[a-zA-Z0-9._-]+").unwrap(),
        // AWS keys
        Regex::new(r"AKIA[A-Z0-9]{16}").unwrap(),
        // Private keys
        Regex::new(r"-----BEGIN\s+(?:RSA\s+)?PRIVATE\s+KEY-----").unwrap(),
        // Service account JWTs
        Regex::new(r"eyJ[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+").unwrap(),
        // Generic long alphanumeric strings that might be keys
        Regex::new(r"[a-zA-Z0-9_-]{32,}").unwrap(),
    ]
});

/// Argument keys whose values are never written
static SECRET_KEYS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(api[_-]?key|token|secret|password|passwd|pwd|kubeconfig|credentials?)$")
        .unwrap()
});

const REDACTED: &str = "[REDACTED]";

/// One audit line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    pub tool: String,
    /// Owning plugin; absent when the tool was unknown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    pub success: bool,
    /// Error code on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub duration_ms: u64,
    pub args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_preview: Option<String>,
}

/// How an invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    /// Plugin returned a success
    Invoke,
    /// Plugin reported an application failure
    Failure,
    /// The call never produced a plugin response
    Error,
}

/// Append-only invocation logger
pub struct AuditLogger {
    config: LoggingConfig,
    log_file: Option<BufWriter<File>>,
}

impl AuditLogger {
    /// Create a new audit logger
    pub fn new(config: LoggingConfig) -> Self {
        let log_file = if config.audit {
            Self::open_log_file(&config.audit_path)
        } else {
            None
        };

        Self { config, log_file }
    }

    /// Open or create the log file
    fn open_log_file(path: &Path) -> Option<BufWriter<File>> {
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create audit log directory: {}", e);
                return None;
            }
        }

        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(e) => {
                error!("Failed to open audit log {:?}: {}", path, e);
                None
            }
        }
    }

    /// Record one finished invocation
    pub fn log_invocation(
        &mut self,
        request: &InvocationRequest,
        plugin: Option<&str>,
        outcome: &Result<InvocationResult, PluginError>,
        elapsed: Duration,
    ) {
        if !self.config.audit {
            return;
        }

        let (event, code, result_preview) = match outcome {
            Ok(result) => match result.error() {
                None => (
                    AuditEvent::Invoke,
                    None,
                    result
                        .result()
                        .map(|value| truncate_preview(&self.redact_if_needed(&value.to_string()))),
                ),
                Some(err) => (AuditEvent::Failure, Some(err.code.clone()), None),
            },
            Err(e) => (AuditEvent::Error, Some(e.code().to_string()), None),
        };

        let record = AuditRecord {
            session_id: request.session_id.clone(),
            timestamp: Utc::now(),
            event,
            tool: request.tool.clone(),
            plugin: plugin.map(str::to_string),
            success: event == AuditEvent::Invoke,
            code,
            duration_ms: elapsed.as_millis() as u64,
            args: if self.config.redact_secrets {
                redact_value(&request.args)
            } else {
                request.args.clone()
            },
            result_preview,
        };

        self.maybe_rotate();
        self.write_record(&record);
    }

    fn write_record(&mut self, record: &AuditRecord) {
        if let Some(ref mut file) = self.log_file {
            match serde_json::to_string(record) {
                Ok(json) => {
                    if let Err(e) = writeln!(file, "{}", json) {
                        error!("Failed to write audit record: {}", e);
                    }
                    if let Err(e) = file.flush() {
                        warn!("Failed to flush audit log: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize audit record: {}", e);
                }
            }
        }
    }

    fn redact_if_needed(&self, text: &str) -> String {
        if self.config.redact_secrets {
            redact_secrets(text)
        } else {
            text.to_string()
        }
    }

    /// Rotate the log file once it outgrows the size limit
    pub fn maybe_rotate(&mut self) {
        let path = &self.config.audit_path;
        if let Ok(metadata) = fs::metadata(path) {
            if metadata.len() > self.config.max_audit_size {
                self.rotate_logs();
            }
        }
    }

    fn rotate_logs(&mut self) {
        let path = self.config.audit_path.clone();
        debug!("Rotating audit log {:?}", path);

        self.log_file = None;

        for i in (1..self.config.audit_retention).rev() {
            let old = format!("{}.{}", path.display(), i);
            let new = format!("{}.{}", path.display(), i + 1);
            let _ = fs::rename(&old, &new);
        }

        let rotated = format!("{}.1", path.display());
        if let Err(e) = fs::rename(&path, &rotated) {
            warn!("Failed to rotate audit log: {}", e);
        }

        self.log_file = Self::open_log_file(&path);
    }
}

/// Redact secrets from text
pub fn redact_secrets(text: &str) -> String {
    let mut result = text.to_string();

    for pattern in SECRET_PATTERNS.iter() {
        result = pattern.replace_all(&result, REDACTED).to_string();
    }

    result
}

/// Redact a JSON document: secret-named keys lose their value, strings are scrubbed
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    if SECRET_KEYS.is_match(key) {
                        (key.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (key.clone(), redact_value(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::String(s) => Value::String(redact_secrets(s)),
        other => other.clone(),
    }
}

/// Truncate text for preview
fn truncate_preview(text: &str) -> String {
    const MAX_PREVIEW: usize = 500;
    match text.char_indices().nth(MAX_PREVIEW) {
        Some((cut, _)) => format!("{}...[truncated]", &text[..cut]),
        None => text.to_string(),
    }
}
