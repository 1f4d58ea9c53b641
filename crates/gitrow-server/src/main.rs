//! gitrow-server - HTTP front of the pack and ref row store

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use gitrow_server::{AppState, Backend, ServerError};
use libgitrow_core::config::{
    load_server_config, save_server_config, ServerConfig, SERVER_CONFIG_ENV,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "gitrow-server", about = "Serve git pushes and fetches from a row store", version)]
struct Cli {
    /// Config file (TOML); defaults to $GITROW_SERVER_CONFIG
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Data directory, overrides the config file
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Accepted bearer token (repeatable), added to the config file's list
    #[arg(long = "token")]
    tokens: Vec<String>,

    /// Write the effective configuration to this path and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn resolve_config(cli: &Cli) -> Result<ServerConfig, ServerError> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os(SERVER_CONFIG_ENV).map(PathBuf::from));
    let mut config = match path {
        Some(path) => load_server_config(&path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    config.tokens.extend(cli.tokens.iter().cloned());
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_env("GITROW_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };
    if let Some(path) = &cli.write_config {
        return match save_server_config(path, &config) {
            Ok(()) => {
                info!(path = %path.display(), "configuration written");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to write configuration: {}", e);
                ExitCode::from(e.exit_code() as u8)
            }
        };
    }
    if config.tokens.is_empty() {
        info!("no tokens configured, accepting unauthenticated requests");
    }

    let listen = config.listen;
    let backend = match Backend::open(config) {
        Ok(backend) => Arc::new(backend),
        Err(ServerError::Core(e)) => {
            error!("Failed to open data directory: {}", e);
            return ExitCode::from(e.exit_code() as u8);
        }
        Err(e) => {
            error!("Failed to open data directory: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let listener = match tokio::net::TcpListener::bind(listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", listen, e);
            return ExitCode::FAILURE;
        }
    };

    info!("gitrow-server starting");
    let result = gitrow_server::serve(listener, AppState::new(backend.clone()), setup_signal_handlers()).await;

    if let Err(e) = backend.store().flush() {
        error!("Final flush failed: {}", e);
    }
    match result {
        Ok(()) => {
            info!("gitrow-server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers() -> impl std::future::Future<Output = ()> {
    async {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        info!("Received shutdown signal");
    }
}
