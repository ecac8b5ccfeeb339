//! HTTP surface exposed to workers: `GET /work`, `POST /results`,
//! `GET /status`, `GET /healthz`, plus a background poller that shuts the
//! process down once all work has been committed.
//!
//! Grounded on `examples/original_source/dispatcher/server.py`'s FastAPI
//! routes and its `background_shutdown` loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use dispatcher_common::wire::{
    BatchResultResponse, BatchResultSubmission, BatchWorkResponse, StatusResponse, WorkItem,
    WorkStatus,
};
use serde::Deserialize;
use tokio::signal;

use crate::Coordinator;

#[derive(Clone)]
struct AppState {
    coordinator: Arc<Coordinator>,
    retry_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
struct WorkQuery {
    #[serde(default = "default_batch_size")]
    batch_size: usize,
}

fn default_batch_size() -> usize {
    1
}

async fn get_work(
    State(state): State<AppState>,
    Query(query): Query<WorkQuery>,
) -> impl IntoResponse {
    match state.coordinator.get_work_batch(query.batch_size) {
        Ok(items) if !items.is_empty() => {
            let items = items
                .into_iter()
                .map(|a| WorkItem {
                    work_id: a.work_id,
                    content: a.content,
                    result: None,
                })
                .collect();
            Json(BatchWorkResponse::ok(items))
        }
        Ok(_) => match state.coordinator.all_work_complete() {
            Ok(true) => Json(BatchWorkResponse::all_work_complete()),
            Ok(false) => Json(BatchWorkResponse::retry(state.retry_interval_secs)),
            Err(err) => {
                tracing::error!(error = %err, "failed to check completion status");
                Json(BatchWorkResponse::retry(state.retry_interval_secs))
            }
        },
        Err(err) => {
            tracing::error!(error = %err, "failed to assign work");
            Json(BatchWorkResponse::retry(state.retry_interval_secs))
        }
    }
}

async fn submit_results(
    State(state): State<AppState>,
    Json(submission): Json<BatchResultSubmission>,
) -> impl IntoResponse {
    let count = submission.items.len();
    let batch = submission
        .items
        .into_iter()
        .filter_map(|item| item.result.map(|result| (item.work_id, result)))
        .collect();

    match state.coordinator.complete_work_batch(batch) {
        Ok(()) => Json(BatchResultResponse {
            status: WorkStatus::Ok,
            count,
        }),
        Err(err) => {
            tracing::error!(error = %err, "failed to record results");
            Json(BatchResultResponse {
                status: WorkStatus::ServerUnavailable,
                count: 0,
            })
        }
    }
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let s = state.coordinator.status();
    Json(StatusResponse {
        last_committed_work_id: s.last_committed_work_id,
        next_work_id: s.next_work_id,
        leased_count: s.leased_count,
        pending_count: s.pending_count,
        heap_size: s.heap_size,
        expired_reissues: s.expired_reissues,
    })
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub fn router(coordinator: Arc<Coordinator>, retry_interval_secs: u64) -> Router {
    let state = AppState {
        coordinator,
        retry_interval_secs,
    };
    Router::new()
        .route("/work", get(get_work))
        .route("/results", post(submit_results))
        .route("/status", get(status))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Polls `all_work_complete` and triggers the given shutdown signal once
/// true, so the process can exit cleanly after the last line is committed.
pub async fn watch_for_completion(
    coordinator: Arc<Coordinator>,
    poll_interval: Duration,
    shutdown: tokio::sync::mpsc::Sender<()>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;
        match coordinator.all_work_complete() {
            Ok(true) => {
                tracing::info!("all work complete; requesting shutdown");
                let _ = shutdown.send(()).await;
                return;
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(error = %err, "completion check failed; will retry");
            }
        }
    }
}

pub async fn serve(
    addr: SocketAddr,
    coordinator: Arc<Coordinator>,
    retry_interval_secs: u64,
    completion_poll_interval: Duration,
) -> Result<(), std::io::Error> {
    let app = router(coordinator.clone(), retry_interval_secs);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "coordinator listening");

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel(1);
    tokio::spawn(watch_for_completion(
        coordinator.clone(),
        completion_poll_interval,
        shutdown_tx,
    ));

    let shutdown_signal = async move {
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = terminate_signal() => {}
            _ = shutdown_rx.recv() => {}
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    if let Err(err) = coordinator.close() {
        tracing::error!(error = %err, "failed to write final checkpoint");
    }
    Ok(())
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    term.recv().await;
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}
