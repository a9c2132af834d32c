//! # Stratus Node
//!
//! Serves the progress channel and the session REST API.

use axum::{
    routing::{delete, get},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub mod api;
pub mod config;
pub mod state;

pub use config::{AuthMode, ConfigError, NodeConfig};
pub use state::AppState;

/// Install the global fmt subscriber, honouring `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(api::health::health_check))
        .route("/api/v1/sessions", get(api::sessions::list_sessions))
        .route("/api/v1/sessions/:id", get(api::sessions::get_session))
        .route("/api/v1/sessions/:id", delete(api::sessions::cancel_session))
        .route("/ws", get(api::ws::progress_channel))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Run the node until Ctrl-C.
pub async fn run_server(config: NodeConfig) -> anyhow::Result<()> {
    info!("🚀 Stratus Node starting...");
    if config.dry_run {
        warn!("Dry run: provisioning against an in-memory cloud");
    }

    let state = AppState::from_config(&config);
    let app = create_router(state);

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("🌐 Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Stratus Node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
