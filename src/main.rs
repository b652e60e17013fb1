//! RFC 868 time server.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                       TIME SERVER                        │
//!                 │                                                          │
//!   TCP connect   │  ┌──────────┐   ┌────────┐   ┌────────────┐              │
//!   ──────────────┼─▶│ listener │──▶│ intake │──▶│ dispatcher │──┐           │
//!                 │  └──────────┘   │ queue  │   └────────────┘  │ one task  │
//!                 │                 └────────┘                   │ per conn  │
//!                 │                                              ▼           │
//!   4 bytes + FIN │  ┌─────────────┐ ┌─────────────┐ ┌────────┐ ┌───────┐    │
//!   ◀─────────────┼──│ close-guard │◀│ panic-guard │◀│ logger │◀│ tuner │    │
//!                 │  └─────────────┘ └─────────────┘ └────────┘ └───┬───┘    │
//!                 │                                     ┌───────────▼──┐     │
//!                 │                                     │ time handler │     │
//!                 │                                     └──────────────┘     │
//!                 └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use time_server::config::loader::{finalize, load_config};
use time_server::config::{ConfigError, ServerConfig};
use time_server::handler::tune::options_from_config;
use time_server::lifecycle::signals::wait_for_signal;
use time_server::observability::init_logging;
use time_server::protocol::{rfc868_epoch, TimeHandler};
use time_server::{HandlerChain, Listener, Server};

const INVALID_CONFIGURATION: u8 = 2;
const START_FAILED: u8 = 3;
const SERVE_FAILED: u8 = 1;

#[derive(Parser)]
#[command(name = "time-server")]
#[command(about = "Serves the current time over TCP (RFC 868)", long_about = None)]
struct Cli {
    /// Port number to listen on (required unless set in the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Interface to bind
    #[arg(long)]
    bind: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn build_config(cli: &Cli) -> Result<ServerConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    if let Some(bind) = &cli.bind {
        config.listener.interface = bind.clone();
    }

    finalize(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(INVALID_CONFIGURATION);
        }
    };

    if let Err(e) = init_logging(&config.observability) {
        eprintln!("{}", e);
        return ExitCode::from(INVALID_CONFIGURATION);
    }

    let port = config.listener.port;
    let addr = match config.listener.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, "Invalid listener address");
            return ExitCode::from(INVALID_CONFIGURATION);
        }
    };

    let listener = match Listener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start");
            return ExitCode::from(START_FAILED);
        }
    };

    let handler = TimeHandler::new(rfc868_epoch()).write_timeout(config.connection.write_timeout());
    let chain = HandlerChain::standard(handler, options_from_config(&config.connection));
    let server = Server::builder(listener, chain)
        .intake_capacity(config.listener.intake_capacity)
        .build();

    let root = CancellationToken::new();

    // Signal handling lives outside the server core.
    tokio::spawn({
        let server = server.clone();
        async move {
            match wait_for_signal().await {
                Ok(signal) => tracing::info!(signal, "Shutdown signal received"),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install signal handlers");
                    return;
                }
            }

            match server.shutdown().await {
                Ok(()) => tracing::info!(port, "Server stopped"),
                Err(e) => tracing::warn!(port, error = %e, "Server stopped with error"),
            }
        }
    });

    tracing::info!(port, "Server started");

    let served = server.serve(root.clone()).await;
    // Waits for the drain if a signal started the shutdown.
    if let Err(e) = server.shutdown().await {
        tracing::warn!(port, error = %e, "Listener close reported an error");
    }
    root.cancel();

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(port, error = %e, "Server stopped");
            ExitCode::from(SERVE_FAILED)
        }
    }
}
