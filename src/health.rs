//! Health Surface (§4.H, §6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::chain::supervisor::StreamState;
use crate::reconciler::Reconciler;
use crate::store::EventStore;

/// Stream is considered fresh if a block has landed within this window
/// (§4.H).
const STREAM_FRESHNESS_WINDOW: Duration = Duration::from_secs(5 * 60);

pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub stream_state: Arc<StreamState>,
    pub reconciler: Arc<Reconciler>,
    pub start_time: DateTime<Utc>,
    /// Flipped to `false` once shutdown begins, so `/status` can report
    /// `stopped` before the process actually exits.
    pub running: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn EventStore>,
        stream_state: Arc<StreamState>,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            store,
            stream_state,
            reconciler,
            start_time: Utc::now(),
            running: Arc::new(AtomicBool::new(true)),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct DatabaseHealth {
    connected: bool,
}

#[derive(Serialize)]
struct WebsocketHealth {
    connected: bool,
    last_block_time: DateTime<Utc>,
    block_age_secs: u64,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    database: DatabaseHealth,
    websocket: WebsocketHealth,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database_connected = state.store.ping().await.is_ok();

    let block_age = state.stream_state.last_block_age();
    let stream_connected = state.stream_state.is_connected();
    let stream_live = stream_connected && block_age < STREAM_FRESHNESS_WINDOW;
    let last_block_time = Utc::now()
        - chrono::Duration::from_std(block_age).unwrap_or_else(|_| chrono::Duration::zero());

    let healthy = database_connected && stream_live;

    let body = HealthBody {
        status: if healthy { "healthy" } else { "unhealthy" },
        database: DatabaseHealth { connected: database_connected },
        websocket: WebsocketHealth {
            connected: stream_connected,
            last_block_time,
            block_age_secs: block_age.as_secs(),
        },
    };

    let code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body))
}

#[derive(Serialize)]
struct StatusBody {
    status: &'static str,
    pending_bets: usize,
    start_time: DateTime<Utc>,
    database_connected: bool,
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let running = state.running.load(Ordering::Relaxed);
    let database_connected = state.store.ping().await.is_ok();

    Json(StatusBody {
        status: if running { "running" } else { "stopped" },
        pending_bets: state.reconciler.pending_count(),
        start_time: state.start_time,
        database_connected,
    })
}
