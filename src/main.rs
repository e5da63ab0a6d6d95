//! kubeassist - plugin invocation core for a Kubernetes operations assistant
//!
//! This is the main entry point for the kubeassist binary.

use anyhow::{bail, Context, Result};
use clap::Parser;
use kubeassist::config::{Config, LoggingConfig};
use kubeassist::plugins::{HealthReport, PluginManager, ToolExecutor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize logging
    init_logging(args.debug, &config.logging);

    info!("Starting kubeassist v{}", env!("CARGO_PKG_VERSION"));

    let manager = PluginManager::from_config(&config)?;

    // Ctrl-C cancels discovery or the in-flight call
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted");
                cancel.cancel();
            }
        });
    }

    let code = run(args.command, &manager, &cancel).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run(command: Command, manager: &PluginManager, cancel: &CancellationToken) -> Result<i32> {
    let report = tokio::select! {
        report = manager.discover_all() => report,
        _ = cancel.cancelled() => bail!("Discovery interrupted"),
    };
    // Stops with the process or on Ctrl-C
    let _rediscovery = manager.spawn_configured_rediscovery(cancel.child_token());

    match command {
        Command::Status { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_status(&report);
            }
            Ok(0)
        }
        Command::Tools => {
            let tools = manager.list_tools().await;
            println!("{}", serde_json::to_string_pretty(&tools)?);
            Ok(0)
        }
        Command::Invoke {
            tool,
            args,
            state,
            session,
        } => {
            let args = cli::parse_args(&args)?;
            let state = cli::parse_state(state.as_deref())?;
            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            debug!(session = %session, tool = %tool, "Invoking from the command line");

            let result = manager
                .executor(&session)
                .with_cancellation(cancel.clone())
                .execute(&tool, args, state)
                .await;

            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(if result.is_success() { 0 } else { 1 })
        }
    }
}

fn print_status(report: &HealthReport) {
    println!("{:<24} {:<12} {:>5}  ADDRESS", "PLUGIN", "STATE", "TOOLS");
    for plugin in &report.plugins {
        println!(
            "{:<24} {:<12} {:>5}  {}",
            plugin.name,
            plugin.state.to_string(),
            plugin.tool_count,
            plugin.address
        );
        if let Some(err) = &plugin.last_error {
            println!("  last error: {}", err);
        }
    }
    println!("{} tool(s) registered", report.tool_count);
}

/// Initialize the logging/tracing subsystem
fn init_logging(debug: bool, logging: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
