use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use replicated_kv::{
    cli::{Cli, Command, ServerArgs},
    client,
    config::{ReplicaConfig, ReplicationPolicy},
    server::Server,
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
        Command::Server(args) => run_server(args).await?,
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let addr = listener.local_addr()?;
    let config = ReplicaConfig::from_args(&args, addr)?;

    info!("{} listening on {}", config.role, addr);
    if let Some(leader) = &config.leader {
        info!(%leader, "forwarding writes to leader");
    }
    for secondary in config.membership.secondaries() {
        info!(%secondary, "replicating to secondary");
    }
    if config.policy == ReplicationPolicy::RejectStale {
        warn!("stale REPLICATION messages will be ignored instead of applied");
    }

    let server = Server::new(listener, config);
    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("server exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}
