//! # marionette
//!
//! Control-plane server binary: loads configuration, wires the instance
//! manager and tool registry into the session server, and runs until
//! interrupted or asked to shut down by a client.

#![deny(unsafe_code)]

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use marionette_core::InstanceId;
use marionette_link::{InstanceManager, MessageCallback};
use marionette_server::Transport;
use marionette_telemetry::{init_telemetry, LogFormat};
use tracing::{debug, info};

use crate::config::AppConfig;

/// Marionette control-plane server.
#[derive(Parser, Debug)]
#[command(name = "marionette", version, about = "Drive running app instances over JSON-RPC")]
struct Cli {
    /// Path to a JSON config file.
    #[arg(long, env = "MARIONETTE_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Client transport: `websocket` or `tcp`.
    #[arg(long)]
    transport: Option<Transport>,

    /// Default log level (`trace`..`error`).
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format: `json`, `pretty` or `compact`.
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Cli {
    /// CLI flags take priority over file and environment values.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(transport) = self.transport {
            config.server.transport = transport;
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let telemetry = config.telemetry_config()?;
    init_telemetry(&telemetry).context("failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?cli.config,
        "starting marionette"
    );

    let on_message: MessageCallback = Arc::new(|instance_id: &InstanceId, line: &str| {
        debug!(instance_id = %instance_id, line, "instance message");
    });
    let instances =
        Arc::new(InstanceManager::new(&config.link_config()).with_message_callback(on_message));
    let tools = Arc::new(marionette_tools::create_default_registry());

    let handle = marionette_server::start(config.server_config(), tools, Arc::clone(&instances))
        .await
        .with_context(|| {
            format!(
                "failed to bind {}:{}",
                config.server.host, config.server.port
            )
        })?;

    info!(
        port = handle.port(),
        transport = %config.server.transport,
        instance_base_port = config.instances.base_port,
        "marionette ready"
    );

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl+c")?;
            info!("interrupted");
        }
        () = handle.shutdown_requested() => info!("shutdown requested by client"),
    }

    info!("shutting down");
    handle.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_config() {
        let cli = Cli::parse_from([
            "marionette",
            "--port",
            "7001",
            "--transport",
            "tcp",
            "--log-level",
            "warn",
            "--log-format",
            "pretty",
        ]);
        let mut config = AppConfig::default();
        config.server.port = 9999;
        cli.apply(&mut config);

        assert_eq!(config.server.port, 7001);
        assert_eq!(config.server.transport, Transport::Tcp);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        config.validate().unwrap();
    }

    #[test]
    fn absent_flags_leave_config_alone() {
        let cli = Cli::parse_from(["marionette"]);
        let mut config = AppConfig::default();
        cli.apply(&mut config);
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn invalid_transport_flag_is_rejected() {
        assert!(Cli::try_parse_from(["marionette", "--transport", "udp"]).is_err());
    }
}
