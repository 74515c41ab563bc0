mod logging;
mod routes;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use guard_core::{
    cache::ResultCache,
    config::Config,
    pipeline::{Pipeline, PipelineEvent},
    policy::PolicyThresholds,
    RunMode,
};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use crate::logging::BroadcastLayer;

// ── AppState ──────────────────────────────────────────────────────────────

pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub default_mode: RunMode,
    pub log_tx: broadcast::Sender<String>,
    pub log_ring: Arc<Mutex<VecDeque<String>>>,
}

// ── main ──────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (log_tx, _log_rx) = broadcast::channel::<String>(256);
    let log_ring = Arc::new(Mutex::new(VecDeque::new()));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guard_server=info,guard_core=info,guard_agent=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(BroadcastLayer { tx: log_tx.clone(), ring: Arc::clone(&log_ring) })
        .init();

    let config = Config::from_env()?;
    let policy = PolicyThresholds::load(&config.policy_path)
        .with_context(|| format!("loading policy from {}", config.policy_path))?;
    let cache = ResultCache::load(&config.cache_path)
        .with_context(|| format!("loading demo results from {}", config.cache_path))?;
    if cache.is_empty() {
        warn!(path = %config.cache_path, "demo cache is empty; run guard-populate to fill it");
    }

    let backend = guard_agent::backend_from_config(&config)?;
    info!(
        backend = backend.name(),
        default_mode = %config.default_mode,
        cached_samples = cache.len(),
        stage_timeout_s = config.stage_timeout_s,
        allow_degraded = config.allow_degraded_runs,
        "contract guard starting"
    );

    let (pipeline, pipeline_rx) =
        Pipeline::new(backend, Arc::new(policy), Arc::new(cache), config.run_options());

    // Mirror pipeline events into the log stream
    {
        let mut rx = pipeline_rx;
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(evt) => log_event(&evt),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
        });
    }

    let state = Arc::new(AppState {
        pipeline: Arc::new(pipeline),
        default_mode: config.default_mode,
        log_tx,
        log_ring,
    });

    let app = Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/samples", get(routes::list_samples))
        .route("/api/analyze", post(routes::analyze))
        .route("/api/events", get(routes::sse_events))
        .route("/api/logs", get(routes::sse_logs))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.web_bind, config.web_port);
    info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn log_event(evt: &PipelineEvent) {
    match evt {
        PipelineEvent::StageChanged { run_id, stage, status } => {
            info!(run_id = %run_id, stage = %stage, status = ?status, "stage changed")
        }
        PipelineEvent::Failed { run_id, kind, message, .. } => {
            warn!(run_id = %run_id, kind = %kind, "run failed: {message}")
        }
        other => tracing::debug!(run_id = %other.run_id(), kind = other.kind(), "pipeline event"),
    }
}
