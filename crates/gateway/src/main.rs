//! sinkr service entry point.
//!
//! Multi-tenant realtime fan-out: WebSocket sinks, authenticated sources,
//! channels with presence and stored-message replay.

use anyhow::Result;
use gateway::{build_state, create_router, GatewayConfig, DEFAULT_MAX_CONNECTIONS_PER_SHARD};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::env;
use std::net::SocketAddr;
use store::Store;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting sinkr");

    // Read configuration from environment
    let http_port: u16 = env::var("HTTP_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .expect("HTTP_PORT must be a number");
    let metrics_port: u16 = env::var("METRICS_PORT")
        .unwrap_or_else(|_| "9094".to_string())
        .parse()
        .expect("METRICS_PORT must be a number");
    let database_path =
        env::var("DATABASE_PATH").unwrap_or_else(|_| "sinkr.db".to_string());
    let max_connections_per_shard: usize = env::var("MAX_CONNECTIONS_PER_OBJECT")
        .unwrap_or_else(|_| DEFAULT_MAX_CONNECTIONS_PER_SHARD.to_string())
        .parse()
        .expect("MAX_CONNECTIONS_PER_OBJECT must be a number");
    let coordination_secret = env::var("COORDINATION_SECRET").ok();

    info!("Configuration:");
    info!("  HTTP_PORT: {}", http_port);
    info!("  METRICS_PORT: {}", metrics_port);
    info!("  DATABASE_PATH: {}", database_path);
    info!("  MAX_CONNECTIONS_PER_OBJECT: {}", max_connections_per_shard);
    info!(
        "  COORDINATION_SECRET: {}",
        if coordination_secret.is_some() { "set" } else { "unset" }
    );

    // Start Prometheus metrics server
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_port))
        .install()
        .expect("Failed to start Prometheus exporter");
    info!("Prometheus metrics server started on port {}", metrics_port);

    // Open the store and reap state left behind by a previous process: a
    // peer row may only exist while its socket is live, and shard rows from
    // a dead process describe workers that no longer exist.
    let store = Store::open(&database_path)?;
    let reaped = store.reap_all_peers().await?;
    let cleared = store.clear_shards().await?;
    if reaped > 0 || cleared > 0 {
        info!(reaped, cleared, "reaped stale peers and shards from previous run");
    }

    let state = build_state(
        store,
        GatewayConfig {
            max_connections_per_shard,
            coordination_secret,
        },
    );
    let app = create_router(state);

    // Start HTTP server
    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("sinkr listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("sinkr stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
