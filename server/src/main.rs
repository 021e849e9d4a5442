use anyhow::{Context, Result};
use clap::Parser;
use shared::config::{LiveConfig, load_config};
use shared::types::server_config::{AppConfig, ConfigError};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use server::{AppState, serve};

#[derive(Debug, Parser)]
#[command(name = "server", about = "Order-event broadcast hub (SSE)")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("{} not found, using built-in defaults", cli.config);
            AppConfig::default()
        }
        Err(e) => return Err(e).context(format!("Failed to load {}", cli.config)),
    };

    let addr = config.server.addr();
    let state = AppState::new(config);

    let listener = TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind to {}", addr))?;

    spawn_reload_on_sighup(cli.config.clone(), state.config.clone());

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown.cancel();
    });

    serve(listener, state).await?;
    info!("Server closed!");

    Ok(())
}

/// Re-read the config file on SIGHUP. A file that fails to load or validate
/// is logged and the running config is kept.
#[cfg(unix)]
fn spawn_reload_on_sighup(path: String, live: LiveConfig) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install SIGHUP handler: {}", e);
                return;
            }
        };

        while hangup.recv().await.is_some() {
            info!("SIGHUP received, reloading {}", path);
            match load_config(&path) {
                Ok(new) => {
                    live.reload(new).await;
                    info!("Configuration reloaded; new streams use the new settings");
                }
                Err(e) => warn!("Reload rejected, keeping current config: {}", e),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_sighup(_path: String, _live: LiveConfig) {}
