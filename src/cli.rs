//! Command-line argument parsing for kubeassist

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kubeassist::plugins::SessionState;
use serde_json::Value;
use std::path::PathBuf;

/// kubeassist - tool plugins for a Kubernetes operations assistant
#[derive(Parser, Debug)]
#[command(name = "kubeassist")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Discover plugins and report their health
    Status {
        /// Print the health report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Discover plugins and list the tools they offer
    Tools,

    /// Invoke a single tool
    Invoke {
        /// Tool name, e.g. kubectl.get
        tool: String,

        /// Tool arguments as a JSON document
        #[arg(long, value_name = "JSON", default_value = "{}")]
        args: String,

        /// Session state carried in from a previous call (JSON object)
        #[arg(long, value_name = "JSON")]
        state: Option<String>,

        /// Session id (generated when omitted)
        #[arg(long, value_name = "ID")]
        session: Option<String>,
    },
}

/// Parse the `--args` value
pub fn parse_args(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).context("--args is not valid JSON")
}

/// Parse the `--state` value; it must be a JSON object
pub fn parse_state(raw: Option<&str>) -> Result<SessionState> {
    let Some(raw) = raw else {
        return Ok(SessionState::new());
    };

    match serde_json::from_str(raw).context("--state is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--state must be a JSON object, got {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_args_status() {
        let args = Args::parse_from(["kubeassist", "status"]);
        assert_eq!(args.command, Command::Status { json: false });
        assert!(args.config.is_none());
        assert!(!args.debug);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from([
            "kubeassist",
            "status",
            "--json",
            "--debug",
            "--config",
            "/tmp/config.toml",
        ]);
        assert!(args.debug);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/config.toml")));
        assert_eq!(args.command, Command::Status { json: true });
    }

    #[test]
    fn test_args_invoke() {
        let args = Args::parse_from([
            "kubeassist",
            "invoke",
            "kubectl.get",
            "--args",
            r#"{"kind":"pod"}"#,
            "--session",
            "s-1",
        ]);
        match args.command {
            Command::Invoke {
                tool,
                args,
                state,
                session,
            } => {
                assert_eq!(tool, "kubectl.get");
                assert_eq!(parse_args(&args).unwrap(), json!({"kind": "pod"}));
                assert!(state.is_none());
                assert_eq!(session.as_deref(), Some("s-1"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_invoke_defaults_to_empty_args() {
        let args = Args::parse_from(["kubeassist", "invoke", "kubectl.get"]);
        match args.command {
            Command::Invoke { args, .. } => assert_eq!(parse_args(&args).unwrap(), json!({})),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_missing_subcommand_is_an_error() {
        assert!(Args::try_parse_from(["kubeassist"]).is_err());
    }

    #[test]
    fn test_parse_state() {
        assert!(parse_state(None).unwrap().is_empty());

        let state = parse_state(Some(r#"{"counter": 2}"#)).unwrap();
        assert_eq!(state.get("counter"), Some(&json!(2)));

        assert!(parse_state(Some("[1, 2]")).is_err());
        assert!(parse_state(Some("{not json")).is_err());
    }
}
