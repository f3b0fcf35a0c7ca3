mod handlers;
mod language_config;
mod metrics;
mod routes;

use arbiter_harness::{AdapterRegistry, TemplateRenderer};
use axum::Router;
use language_config::LanguageRegistry;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

pub struct AppState {
    pub redis: ConnectionManager,
    pub languages: LanguageRegistry,
    pub adapters: AdapterRegistry,
    pub renderer: TemplateRenderer,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Arbiter API booting...");

    let languages = LanguageRegistry::load_default().map_err(|e| {
        error!("Failed to load language configurations: {}", e);
        e
    })?;
    info!("Enabled languages: {:?}", languages.enabled_languages());

    // Connect to Redis
    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let client = redis::Client::open(redis_url.as_str())?;
    let redis_conn = ConnectionManager::new(client).await?;
    info!("Connected to Redis: {}", redis_url);

    let state = Arc::new(AppState {
        redis: redis_conn,
        languages,
        adapters: AdapterRegistry::builtin(),
        renderer: TemplateRenderer::new(),
    });

    // Build router
    let app = Router::new().merge(routes::routes()).with_state(state);

    // Start server
    let addr = std::env::var("API_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = TcpListener::bind(&addr).await?;

    info!("HTTP server listening on {}", addr);
    info!("Ready to accept jobs");

    axum::serve(listener, app).await?;
    Ok(())
}
