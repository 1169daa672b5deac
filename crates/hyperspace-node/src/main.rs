#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::unused_async)]

mod config;
mod http_server;
mod persistence;
mod raft;
mod scalar_storage;
mod vector_database;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use hyperspace_index::IndexFactory;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::{Args, NodeConfig};
use http_server::AppState;
use persistence::Persistence;
use raft::{RaftHarness, RaftParams};
use scalar_storage::ScalarStorage;
use vector_database::VectorDatabase;

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(run(args))
}

async fn run(args: Args) -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let _ = dotenv::dotenv();

    let config = match NodeConfig::load(&args.config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config {}: {e}", args.config_path.display());
            return ExitCode::from(1);
        }
    };

    match bootstrap(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal startup error");
            ExitCode::FAILURE
        }
    }
}

async fn bootstrap(args: Args, config: NodeConfig) -> anyhow::Result<()> {
    let fresh = args.fresh || config.fresh_start;
    let scalar = ScalarStorage::open(&config.db_path, fresh)?;

    let factory = IndexFactory::init(
        &config.index_kinds(),
        config.dim,
        config.metric(),
        config.m,
        config.ef_construction,
    );

    let persistence = Persistence::init(&config.wal_path, config.flush_on_write)?;

    let global_config = hyperspace_core::GlobalConfig::new(config.ef_search, config.ef_construction, config.m);
    let vector_db = Arc::new(VectorDatabase::with_config(factory, scalar, persistence, global_config));

    // Recovery on startup: load snapshot, then replay WAL entries
    // whose log_id is past the snapshot's watermark.
    vector_db.reload_database()?;
    info!(node_id = config.node_id, "recovery complete, starting consensus harness");

    let peers: Vec<(u64, String)> = config
        .peers
        .iter()
        .map(|p| (p.node_id, p.endpoint.clone()))
        .collect();
    let raft_log_path = config
        .wal_path
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."))
        .join(format!("raft-{}.log", config.node_id));

    let raft = Arc::new(
        RaftHarness::init(
            config.node_id,
            config.endpoint.clone(),
            raft_log_path,
            vector_db.clone(),
            &peers,
            RaftParams::default(),
        )
        .await?,
    );

    let state = Arc::new(AppState { vector_db, raft });
    let app = http_server::router(state);

    let addr = config.http_addr();
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
