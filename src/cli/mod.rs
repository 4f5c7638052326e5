//! CLI commands for linkbroker using clap.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{load_settings, validate_settings, Settings};
use crate::logging;
use crate::server::run_server;

/// linkbroker - a WebSocket message broker for named instances.
#[derive(Parser, Debug)]
#[command(name = "linkbroker")]
#[command(version)]
#[command(about = "Relay messages between named instances over WebSocket", long_about = None)]
pub struct Commands {
    /// Settings file (JSON)
    #[arg(long, short, global = true, env = "LINKBROKER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the broker (default)
    Serve {
        /// Interface to listen on
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Print the effective settings as JSON
    Config,
}

impl Commands {
    /// Run the CLI command.
    pub async fn run(&self) -> Result<()> {
        let mut settings = load_settings(self.config.as_deref())
            .context("Failed to load settings")?;

        match self.command.clone().unwrap_or(Command::Serve {
            host: None,
            port: None,
        }) {
            Command::Serve { host, port } => {
                apply_flags(&mut settings, host, port);
                validate_settings(&settings)?;
                cmd_serve(settings).await
            }
            Command::Config => cmd_config(&settings),
        }
    }
}

fn apply_flags(settings: &mut Settings, host: Option<String>, port: Option<u16>) {
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }
}

async fn cmd_serve(settings: Settings) -> Result<()> {
    let _guard = logging::init(&settings.logging).context("Failed to initialize logging")?;

    tracing::info!(
        "Starting linkbroker on {}:{}",
        settings.server.host,
        settings.server.port
    );

    run_server(settings).await?;
    Ok(())
}

fn cmd_config(settings: &Settings) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_is_optional() {
        let args = Commands::try_parse_from(["linkbroker"]).unwrap();
        assert!(args.command.is_none());
    }

    #[test]
    fn test_serve_flags() {
        let args =
            Commands::try_parse_from(["linkbroker", "serve", "--host", "127.0.0.1", "-p", "9000"])
                .unwrap();
        assert_eq!(
            args.command,
            Some(Command::Serve {
                host: Some("127.0.0.1".to_string()),
                port: Some(9000),
            })
        );
    }

    #[test]
    fn test_flags_override_settings() {
        let mut settings = Settings::default();
        apply_flags(&mut settings, None, Some(9100));
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9100);
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(Commands::try_parse_from(["linkbroker", "serve", "--port", "http"]).is_err());
    }
}
