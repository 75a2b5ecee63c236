//! gNB Dashboard
//!
//! Monitoring and control host for 5G base-station nodes.

use gnb_dashboard::map_data::MapDataLoader;
use gnb_dashboard::node::{HttpNodeClient, PollTimings};
use gnb_dashboard::roster::Roster;
use gnb_dashboard::store::RosterStore;
use gnb_dashboard::{api, bus, config};

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gnb_dashboard=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting gNB Dashboard v{} ({})",
        env!("GNB_VERSION"),
        env!("GNB_GIT_SHA")
    );

    // Load configuration
    let config = config::load_config()?;
    tracing::info!(
        "Configuration loaded, port: {}, node port: {}",
        config.port,
        config.node_port
    );

    // Create event bus
    let bus = bus::create_bus();

    // Roster, restored from the data directory
    let data_dir = config::get_data_dir();
    let client = Arc::new(HttpNodeClient::new(config.node_port));
    let roster = Arc::new(
        Roster::new(
            client,
            PollTimings::default(),
            RosterStore::new(&data_dir),
            bus.clone(),
        )
        .with_persist_interval(config.persist_interval()),
    );
    let loaded = roster.load_persisted().await;
    tracing::info!("Roster ready with {} node(s)", loaded);

    // Map aggregation service
    let map_url = match config.map_service_url.as_deref().map(url::Url::parse) {
        Some(Ok(url)) => Some(url.to_string()),
        Some(Err(e)) => {
            tracing::warn!("Invalid map_service_url, map polling disabled: {}", e);
            None
        }
        None => None,
    };
    let map = Arc::new(MapDataLoader::new(
        map_url,
        config.link_matrix_capacity,
        bus.clone(),
    ));

    // Background tasks
    let shutdown = CancellationToken::new();
    let roster_task = {
        let roster = roster.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { roster.run(shutdown).await })
    };
    let map_task = {
        let map = map.clone();
        let shutdown = shutdown.clone();
        let interval = config.map_poll_interval();
        tokio::spawn(async move { map.run(interval, shutdown).await })
    };

    let state = api::AppState::new(roster.clone(), map, bus);
    let app = api::router(state)
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    // Start server with graceful shutdown
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await?;

    // Cleanup: stop pollers and write the final roster
    tracing::info!("Shutting down...");
    shutdown.cancel();
    if let Err(e) = roster_task.await {
        tracing::warn!("Roster observer ended abnormally: {}", e);
    }
    if let Err(e) = map_task.await {
        tracing::warn!("Map poller ended abnormally: {}", e);
    }
    roster.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
