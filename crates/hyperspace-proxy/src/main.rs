mod config;
mod coordinator_client;
mod http_server;
mod router;
mod topology;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::{Args, ProxyConfig};
use http_server::{build_client, coordinator_from, AppState};
use router::RoundRobin;
use topology::TopologyCache;

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start tokio runtime: {e}");
            return ExitCode::from(1);
        }
    };

    runtime.block_on(run(args))
}

async fn run(args: Args) -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    dotenv::dotenv().ok();

    let config = match ProxyConfig::load(&args.config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            return ExitCode::from(1);
        }
    };

    match bootstrap(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "proxy exited with error");
            ExitCode::from(1)
        }
    }
}

async fn bootstrap(config: ProxyConfig) -> anyhow::Result<()> {
    let coordinator = Arc::new(coordinator_from(&config));
    let topology = Arc::new(TopologyCache::new());

    // Populate synchronously once before serving, so the first
    // requests don't race an empty topology.
    if let Ok(roster) = coordinator.get_instance().await {
        tracing::info!(nodes = roster.nodes.len(), "initial roster loaded");
        let mut t = (*topology.snapshot()).clone();
        t.roster = roster;
        topology.publish_initial(t);
    }
    if let Ok(partitions) = coordinator.get_partition_config().await {
        tracing::info!(count = partitions.partitions.len(), "initial partition config loaded");
        let mut t = (*topology.snapshot()).clone();
        t.partitions = partitions;
        topology.publish_initial(t);
    }

    topology.clone().spawn_refresh_tasks(
        coordinator,
        std::time::Duration::from_secs(config.roster_refresh_secs),
        std::time::Duration::from_secs(config.partition_refresh_secs),
    );

    let state = Arc::new(AppState {
        topology,
        client: build_client(),
        round_robin: RoundRobin::new(),
    });

    let app = http_server::router(state);
    let addr = config.http_addr();
    tracing::info!(%addr, "proxy listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
