use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use git_remote_gitrow::{ChainProvider, HelperError, ProtocolReader, ProtocolWriter, RemoteHelper};
use libgitrow_core::config::{default_helper_config_path, load_helper_config, HELPER_CONFIG_ENV};
use libgitrow_wire::{RemoteLocation, WireClient};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Invoked by git as `git-remote-gitrow <remote> <url>`
#[derive(Parser)]
#[command(name = "git-remote-gitrow", about = "git remote helper for gitrow servers", version)]
struct Cli {
    /// Remote name, or the URL itself when git has no named remote
    remote: String,

    /// Repository URL: https://<endpoint>/orgs/<org>/repos/<repo>
    url: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    // stdout belongs to git; logs go to stderr
    let filter = EnvFilter::try_from_env("GITROW_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    if let Err(e) = run(&cli).await {
        error!("{}", e);
        eprintln!("fatal: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: &Cli) -> Result<(), HelperError> {
    let url = cli.url.as_deref().unwrap_or(&cli.remote);
    let location = RemoteLocation::parse(url)?;

    let config_path = std::env::var_os(HELPER_CONFIG_ENV)
        .map(PathBuf::from)
        .or_else(default_helper_config_path);
    let mut config = load_helper_config(config_path.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok());

    let client = WireClient::new(location, Arc::new(ChainProvider::from_env()), &config)?;
    let repo = git2::Repository::open_from_env()?;

    let mut helper = RemoteHelper::new(client, repo);
    let stdin = io::stdin();
    let mut reader = ProtocolReader::new(stdin.lock());
    let mut writer = ProtocolWriter::new(io::stdout().lock());
    helper.run(&mut reader, &mut writer).await
}
