mod broadcast;
mod config;
mod errors;
mod feed;
mod ingest;
mod models;
mod routes;
mod state;
mod store;

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::broadcast::Broadcaster;
use crate::config::{Config, StoreBackend};
use crate::feed::registry::RegistryClient;
use crate::feed::FeedClient;
use crate::ingest::pipeline::Ingestor;
use crate::ingest::scheduler::{run_poll_loop, PollCycle};
use crate::ingest::sweeper::ExpirySweeper;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::{MemoryStore, RedisStore, TelemetryStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting birdnest tracker v{}", env!("CARGO_PKG_VERSION"));

    // One store handle for the whole process
    let store: Arc<dyn TelemetryStore> = match config.store_backend {
        StoreBackend::Redis => Arc::new(
            RedisStore::connect(&config.redis_url)
                .await
                .context("Could not connect to Redis")?,
        ),
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let feed = FeedClient::new(
        http.clone(),
        config.birdnest_api.clone(),
        config.fetch_timeout,
    );
    let registry = RegistryClient::new(
        http,
        config.drone_registry_api.clone(),
        config.fetch_timeout,
    );

    let broadcaster = Broadcaster::new(store.clone());
    let ingestor = Arc::new(Ingestor::new(
        store.clone(),
        Arc::new(registry),
        config.drone_ttl,
    ));
    let cycle = Arc::new(PollCycle::new(
        Arc::new(feed),
        ingestor,
        broadcaster.clone(),
        config.fetch_timeout,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!(
        "Polling every {}ms (fetch timeout {}ms, drone TTL {}s)",
        config.poll_interval.as_millis(),
        config.fetch_timeout.as_millis(),
        config.drone_ttl.as_secs()
    );
    let poller = tokio::spawn(run_poll_loop(
        config.poll_interval,
        shutdown_rx.clone(),
        move || {
            let cycle = cycle.clone();
            async move { cycle.run_logged().await }
        },
    ));

    let sweeper = tokio::spawn(ExpirySweeper::new(store.clone()).run(
        config.dedup_sweep_interval,
        config.dedup_retention,
        shutdown_rx.clone(),
    ));

    let state = AppState {
        store: store.clone(),
        broadcaster: broadcaster.clone(),
    };

    // Build router
    let app = build_router(state, &config.static_dir).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(config.frontend_url.as_deref())?),
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);

    // no new cycles start; an in-flight cycle finishes its merges first
    poller.await?;
    sweeper.await?;
    broadcaster.close().await;
    server.await??;

    drop(store);
    info!("Shutdown complete");
    Ok(())
}

fn cors_layer(frontend_url: Option<&str>) -> Result<CorsLayer> {
    Ok(match frontend_url {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                origin
                    .parse::<HeaderValue>()
                    .with_context(|| format!("FRONTEND_URL '{origin}' is not a valid origin"))?,
            )
            .allow_methods([Method::GET]),
        None => CorsLayer::permissive(),
    })
}
