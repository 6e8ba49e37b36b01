//! Axum router and HTTP handlers for sse-daemon. `build_router` is the single
//! entry point; `main.rs` attaches tracing/CORS middleware on top of it.
//! Generalizes `mqk-daemon::routes`'s health/status/SSE-stream shape, and adds
//! the one HTTP surface this engine's spec calls for that the teacher never
//! had: the inbound Stripe webhook endpoint, wrapping `sse_router::process_webhook`
//! and mapping its `WebhookError` split to 400 (bad signature) vs 500 (other).

use std::{convert::Infallible, sync::Arc};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use sse_router::WebhookError;

use crate::state::{uptime_secs, AppState, BusMsg};

/// Builds the complete application router wired to the given shared state.
/// Middleware layers are attached by `main.rs`, not here, so scenario tests
/// can exercise the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/webhooks/stripe", post(webhook_stripe))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    service: &'static str,
    version: &'static str,
}

async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse { ok: true, service: st.build.service, version: st.build.version }),
    )
}

async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let mut snap = st.status.read().await.clone();
    snap.daemon_uptime_secs = uptime_secs();
    let _ = st.bus.send(BusMsg::Status(snap.clone()));
    (StatusCode::OK, Json(snap))
}

async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(rx: broadcast::Receiver<BusMsg>) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Status(_) => "status",
                    BusMsg::WorkerTick { .. } => "worker_tick",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}

/// `POST /webhooks/stripe` — signature header name follows Stripe's own
/// convention (`Stripe-Signature`), the library half (`process_webhook`)
/// handles everything past that.
async fn webhook_stripe(State(st): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = match headers.get("stripe-signature").and_then(|v| v.to_str().ok()) {
        Some(s) => s,
        None => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": "missing Stripe-Signature header" })))
                .into_response()
        }
    };

    match sse_router::process_webhook(&st.router, &body, signature).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(WebhookError::BadSignature(msg)) => {
            tracing::warn!(error = %msg, "webhook signature rejected");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
        }
        Err(WebhookError::Other(err)) => {
            tracing::error!(error = %err, "webhook processing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err.to_string() }))).into_response()
        }
    }
}
