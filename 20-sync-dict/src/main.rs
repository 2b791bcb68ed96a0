use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use sync_dict::{
    Replicator, StoreConfig,
    cli::{Cli, Command, ServeArgs, Transport},
    client,
    transport::{line, ws},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Watch(args) => client::run(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let replicator = Replicator::new(
        args.initial,
        StoreConfig {
            versions: args.versions,
        },
    );
    let listener = TcpListener::bind(args.listen).await?;
    let addr = listener.local_addr()?;
    info!(
        transport = ?args.transport,
        versions = %args.versions,
        "sync-dict listening on {}",
        addr
    );

    let connections = replicator.connections();
    let served = match args.transport {
        Transport::Ws => ws::serve_until(listener, connections, ctrl_c()).await,
        Transport::Tcp => line::serve_until(listener, connections, ctrl_c()).await,
    };

    let stats = replicator.shutdown().await?;
    info!(
        actions = stats.actions,
        deliveries = stats.deliveries,
        failures = stats.failures,
        "dispatcher stopped"
    );
    served
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = ?err, "failed to install ctrl-c handler");
    }
}
