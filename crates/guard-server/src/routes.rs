use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use guard_core::{pipeline::RunControl, GuardError, RunMode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream};
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::AppState;

// ── Request body types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct AnalyzeBody {
    pub text: String,
    pub mode: Option<RunMode>,
}

// ── Error mapping ─────────────────────────────────────────────────────────

pub(crate) fn status_for(err: &GuardError) -> StatusCode {
    match err {
        GuardError::UnknownSample { .. } => StatusCode::NOT_FOUND,
        GuardError::Extraction(_) | GuardError::Schema { .. } | GuardError::UnsupportedFlag { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        GuardError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        GuardError::Backend { .. } => StatusCode::BAD_GATEWAY,
        GuardError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        GuardError::Config(_)
        | GuardError::IncompleteState { .. }
        | GuardError::InvalidTransition { .. }
        | GuardError::AlreadyRecorded { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(err: &GuardError) -> Value {
    json!({
        "kind": err.kind(),
        "origin": err.origin(),
        "stage": err.stage(),
        "message": err.to_string(),
    })
}

// ── Handlers ──────────────────────────────────────────────────────────────

pub(crate) async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn list_samples(State(state): State<Arc<AppState>>) -> Json<Value> {
    let cache = &state.pipeline.cache;
    Json(json!({
        "samples": cache.summaries(),
        "portfolio": cache.portfolio(),
    }))
}

pub(crate) async fn analyze(State(state): State<Arc<AppState>>, Json(body): Json<AnalyzeBody>) -> Response {
    let mode = body.mode.unwrap_or(state.default_mode);
    let control = RunControl::new();
    // A dropped request cancels the run's in-flight stages.
    let _cancel_on_drop = control.drop_guard();

    let (run, result) = state.pipeline.run_with_control(&body.text, mode, &control).await;
    match result {
        Ok(()) => {
            info!(run_id = %run.id(), mode = %mode, "analysis served");
            (StatusCode::OK, Json(json!(run))).into_response()
        }
        Err(e) => {
            let status = status_for(&e);
            warn!(run_id = %run.id(), kind = e.kind(), status = status.as_u16(), "analysis failed: {e}");
            (status, Json(json!({ "error": error_body(&e), "run": run }))).into_response()
        }
    }
}

// SSE

pub(crate) async fn sse_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.pipeline.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|evt| {
        let evt = evt.ok()?;
        let data = serde_json::to_string(&evt).ok()?;
        Some(Ok(Event::default().event(evt.kind()).data(data)))
    });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)).text("ping"))
}

pub(crate) async fn sse_logs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    // Subscribe before snapshotting ring to avoid race
    let live_rx = state.log_tx.subscribe();
    let history: Vec<String> =
        state.log_ring.lock().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect();
    tokio::spawn(async move {
        for line in history {
            if tx.send(line).is_err() {
                return;
            }
        }
        let mut live_rx = live_rx;
        loop {
            match live_rx.recv().await {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });
    let stream =
        UnboundedReceiverStream::new(rx).map(|data| Ok::<_, std::convert::Infallible>(Event::default().data(data)));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)).text("ping"))
}
