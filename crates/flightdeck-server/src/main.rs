use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use flightdeck_client::ReqwestFetcher;
use flightdeck_db::{Database, DatabaseConfig};
use flightdeck_server::config::ServerConfig;
use flightdeck_server::routes;
use flightdeck_server::state::AppState;

const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("flightdeck=info".parse()?))
        .with_target(false)
        .init();

    let config = ServerConfig::from_env()?;
    if config.admin_token.is_none() {
        tracing::warn!("FLIGHTDECK_ADMIN_TOKEN not set; write endpoints are disabled");
    }
    let addr = format!("0.0.0.0:{}", config.port);

    let db = Database::connect(&DatabaseConfig::from_env()?).await?;
    db.migrate().await?;

    let state = Arc::new(AppState::from_config(db, &config, ReqwestFetcher::new()?)?);

    let app = routes::router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
