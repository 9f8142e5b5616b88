//! Waypoint - caching gateway for a slow ledger backend

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waypoint::{
    cache::{spawn_cache_cleanup_task, start_flush_task},
    config::Args,
    projection::{spawn_engine_task, ProjectionEngine},
    server,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("waypoint={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Waypoint - Ledger Caching Gateway");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Ledger: {}", args.ledger_url);
    match &args.delivery_url {
        Some(url) => info!("Delivery mirror: {}", url),
        None => info!("Delivery mirror: disabled"),
    }
    info!("Reach budget: {} MB per level", args.reach_budget_mb);
    info!("Write profile: {}", args.write_profile);
    info!("======================================");

    let state = match server::AppState::new(args.clone()) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    // Projection engine consumes signals posted to /signals
    let engine = Arc::new(ProjectionEngine::new(Arc::clone(&state.projection)));
    let _engine_handle = spawn_engine_task(Arc::clone(&engine), state.signal_tx.subscribe());

    // Background flush of buffered writes to the ledger
    let mut flush = start_flush_task(
        Arc::clone(&state.buffer),
        Arc::clone(&state.ledger),
        Arc::clone(&state.projection),
    );
    tokio::spawn(async move {
        while let Some(failure) = flush.failures.recv().await {
            error!(
                operation_id = %failure.operation_id,
                doc_type = failure.doc_type,
                doc_id = failure.doc_id,
                attempts = failure.attempts,
                error = failure.error,
                "Write permanently failed"
            );
        }
    });
    info!("Write flush task started ({})", args.write_profile);

    // Periodic idle-entry expiry across reach pools; the handle must stay
    // alive or the task reads its dropped shutdown channel as a stop signal
    let _cleanup = args.entry_ttl_secs.map(|_| {
        info!(
            "Cache cleanup task started (every {}s)",
            args.cleanup_interval_secs
        );
        spawn_cache_cleanup_task(
            Arc::clone(&state.cache),
            std::time::Duration::from_secs(args.cleanup_interval_secs),
        )
    });

    if let Err(e) = server::run(state).await {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
