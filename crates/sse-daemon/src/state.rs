//! Shared runtime state for sse-daemon. All types here are `Clone`-able (via
//! `Arc`); handlers receive `State<Arc<AppState>>` from Axum. Generalizes
//! `mqk-daemon::state`'s `AppState`/`BusMsg`/broadcast-heartbeat shape to this
//! engine's pool + Backfill/Router/Webhook-Reconcile handles.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::{broadcast, RwLock};

use sse_backfill::BackfillEngine;
use sse_registry::Registry;
use sse_router::RouterEngine;

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Status(StatusSnapshot),
    WorkerTick { object_name: String, processed: i64, has_more: bool },
}

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Point-in-time snapshot of daemon state, returned by `GET /v1/status` and
/// carried inside SSE `status` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    pub account_id: String,
    pub last_object_processed: Option<String>,
    pub queue_empty: bool,
}

/// Cloneable (Arc) handle shared across all Axum handlers and the worker tick
/// loop.
pub struct AppState {
    pub pool: PgPool,
    pub build: BuildInfo,
    pub account_id: String,
    pub registry: Registry,
    pub backfill: Arc<BackfillEngine>,
    pub router: RouterEngine,
    pub bus: broadcast::Sender<BusMsg>,
    pub status: RwLock<StatusSnapshot>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        account_id: String,
        registry: Registry,
        backfill: Arc<BackfillEngine>,
        router: RouterEngine,
    ) -> Arc<Self> {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        let initial_status = StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            account_id: account_id.clone(),
            last_object_processed: None,
            queue_empty: true,
        };

        Arc::new(AppState {
            pool,
            build: BuildInfo { service: "sse-daemon", version: env!("CARGO_PKG_VERSION") },
            account_id,
            registry,
            backfill,
            router,
            bus,
            status: RwLock::new(initial_status),
        })
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START.get_or_init(std::time::Instant::now).elapsed().as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
