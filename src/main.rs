use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fanout_hub::{broadcast, config::HubConfig, server, state::AppState};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fanout_hub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting fanout hub...");

    let config = HubConfig::from_env();
    let addr = config.bind;
    let status_interval = config.status_interval;

    let state = AppState::new(config).await;

    // Spawn background task for publishing connection figures to the status channel
    if let Some(interval) = status_interval {
        broadcast::spawn_status_reporter(state.hub.clone(), interval);
    }

    let app = server::build_router(state);

    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind {}: {}", addr, e));
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}
