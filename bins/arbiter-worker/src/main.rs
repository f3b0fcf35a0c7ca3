mod config;
mod engine;
#[cfg(test)]
mod engine_tests;
mod executor;

use arbiter_common::redis;
use arbiter_common::types::Language;
use arbiter_harness::{AdapterRegistry, Orchestrator};
use axum::{extract::State, routing::get, Json, Router};
use config::LanguageConfigManager;
use engine::DockerEngine;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

/// How long a shutdown waits for in-flight jobs.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct HealthState {
    language: Language,
    in_flight: Arc<AtomicUsize>,
    capacity: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Arbiter worker booting...");

    // Load language configurations
    let config_manager = LanguageConfigManager::load_default().map_err(|e| {
        error!("Failed to load language configurations: {:#}", e);
        error!("Make sure config/languages.json exists or set LANGUAGES_CONFIG");
        e
    })?;

    info!("Loaded language configurations for: {:?}", config_manager.list_languages());

    // Get language from environment
    let language_str = std::env::var("WORKER_LANGUAGE").unwrap_or_else(|_| "python".to_string());
    let language = match Language::from_str(&language_str) {
        Some(language) => language,
        None => {
            anyhow::bail!(
                "Invalid WORKER_LANGUAGE '{}', valid options: {:?}",
                language_str,
                Language::ALL.iter().map(|l| l.as_str()).collect::<Vec<_>>()
            );
        }
    };

    let language_config = config_manager.get_config(&language)?;
    info!(
        language = %language,
        image = %language_config.image,
        queue = %redis::queue_name(&language),
        max_parallel_jobs = config_manager.max_parallel_jobs(),
        "Worker configured"
    );

    let engine = DockerEngine::new_with_config(&config_manager)?;
    engine.ping().await?;
    engine.ensure_image(&language_config.image).await?;

    let stale_after = Duration::from_millis(language_config.max_wall_time_ms) + Duration::from_secs(60);
    match engine.cleanup_stale(stale_after).await {
        Ok(0) => {}
        Ok(removed) => info!(removed, "Removed stale sandbox containers"),
        Err(e) => warn!(error = %e, "Stale container cleanup failed"),
    }

    let orchestrator = Arc::new(Orchestrator::with_adapters(
        engine,
        AdapterRegistry::only(&[language]),
    ));

    // Connect to Redis
    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let client = ::redis::Client::open(redis_url.as_str())?;
    let redis_conn = ::redis::aio::ConnectionManager::new(client).await?;
    info!("Connected to Redis: {}", redis_url);

    let capacity = config_manager.max_parallel_jobs();
    let semaphore = Arc::new(Semaphore::new(capacity));
    let in_flight = Arc::new(AtomicUsize::new(0));

    let health_addr = std::env::var("WORKER_HEALTH_ADDR").unwrap_or_else(|_| "0.0.0.0:9090".to_string());
    let health = HealthState {
        language,
        in_flight: in_flight.clone(),
        capacity,
    };
    let listener = tokio::net::TcpListener::bind(&health_addr).await?;
    info!("Health endpoint listening on {}", health_addr);
    tokio::spawn(async move {
        let app = Router::new().route("/health", get(health_check)).with_state(health);
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Health server stopped");
        }
    });

    // Setup graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        warn!("Received shutdown signal, draining in-flight jobs...");
    };

    tokio::select! {
        result = worker_loop(redis_conn, language, orchestrator, semaphore.clone(), in_flight.clone()) => {
            if let Err(e) = result {
                error!(error = %e, "Worker loop stopped");
            }
        },
        _ = shutdown => {},
    }

    // Every permit back means every spawned job has stored its result
    match tokio::time::timeout(DRAIN_TIMEOUT, semaphore.acquire_many(capacity as u32)).await {
        Ok(_) => info!("All in-flight jobs finished"),
        Err(_) => warn!(
            in_flight = in_flight.load(Ordering::SeqCst),
            "Drain timed out, abandoning in-flight jobs"
        ),
    }

    info!("Worker shutdown complete");
    Ok(())
}

async fn health_check(State(state): State<HealthState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "arbiter-worker",
        "language": state.language,
        "in_flight": state.in_flight.load(Ordering::SeqCst),
        "capacity": state.capacity,
    }))
}

#[instrument(skip_all, fields(language = %language))]
async fn worker_loop(
    mut redis_conn: ::redis::aio::ConnectionManager,
    language: Language,
    orchestrator: Arc<Orchestrator<DockerEngine>>,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
) -> anyhow::Result<()> {
    loop {
        // Only pop when a slot is free, so queued jobs stay visible to other workers
        let permit = semaphore.clone().acquire_owned().await?;

        // BLPOP with 5 second timeout for graceful shutdown
        match redis::pop_job(&mut redis_conn, &language, 5.0).await {
            Ok(Some(job)) => {
                info!(
                    job_id = %job.id,
                    language = %job.language,
                    test_cases = job.test_cases.len(),
                    source_size = job.source_code.len(),
                    "Received job"
                );

                let orchestrator = orchestrator.clone();
                let in_flight = in_flight.clone();
                let mut conn = redis_conn.clone();
                in_flight.fetch_add(1, Ordering::SeqCst);

                tokio::spawn(async move {
                    let result = executor::execute_job(&orchestrator, &job).await;

                    // Persist result to Redis
                    match redis::store_result(&mut conn, &result).await {
                        Ok(()) => info!(job_id = %job.id, "Result persisted to Redis"),
                        Err(e) => error!(job_id = %job.id, error = %e, "Failed to persist result"),
                    }

                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    drop(permit);
                });
            }
            Ok(None) => {
                // Timeout - check for shutdown
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                drop(permit);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
