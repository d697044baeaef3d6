mod backend_client;
mod config;
mod errors;
mod models;
mod routes;
mod state;
mod studio;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::backend_client::HttpBackend;
use crate::config::Config;
use crate::routes::build_router;
use crate::state::AppState;
use crate::studio::session::{spawn_idle_sweeper, SessionStore};

/// How often idle sessions are looked for.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

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

    info!("Starting Studio API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize backend client
    let backend = Arc::new(HttpBackend::new(
        config.backend_url.clone(),
        config.backend_timeout_secs,
    )?);
    info!(
        "Backend client initialized ({}, timeout {}s)",
        config.backend_url, config.backend_timeout_secs
    );
    info!(
        "Default provider: {}; locked sections: {:?}",
        config.default_provider, config.locked_sections
    );

    let state = AppState {
        config: config.clone(),
        backend,
        sessions: SessionStore::default(),
    };

    // Evict abandoned sessions in the background
    if config.session_idle_minutes > 0 {
        spawn_idle_sweeper(
            state.sessions.clone(),
            chrono::Duration::minutes(config.session_idle_minutes as i64),
            SWEEP_INTERVAL,
        );
        info!(
            "Idle sessions are evicted after {} minutes",
            config.session_idle_minutes
        );
    }

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the frontend host is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
