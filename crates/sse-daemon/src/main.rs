//! sse-daemon entry point.
//!
//! Thin by design, following `mqk-daemon::main`: load config + secrets, wire
//! the pool and the per-crate engines, wire middleware, and start the HTTP
//! server plus the background worker tick loop. All route handlers live in
//! `routes.rs`; all shared state lives in `state.rs`; the queue-drain loop
//! lives in `worker.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

use sse_daemon::{routes, state, worker};

const ENV_CONFIG_PATHS: &str = "SSE_CONFIG_PATHS";
const ENV_DAEMON_ADDR: &str = "SSE_DAEMON_ADDR";
const ENV_WEBHOOK_URL: &str = "SSE_WEBHOOK_URL";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; silent if absent, since production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config_paths = std::env::var(ENV_CONFIG_PATHS).unwrap_or_default();
    let paths: Vec<&str> = config_paths.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    let (config_json, engine_config) = if paths.is_empty() {
        (serde_json::json!({}), sse_config::EngineConfig::default())
    } else {
        let loaded = sse_config::load_layered_yaml(&paths).context("load layered config")?;
        let cfg = sse_config::EngineConfig::from_config_json(&loaded.config_json);
        (loaded.config_json, cfg)
    };
    engine_config.validate_worker_interval().context("invalid worker interval in config")?;

    let secrets = sse_config::resolve_secrets(&config_json).context("resolve secrets")?;

    let pool = sse_db::connect_from_env().await.context("connect to postgres")?;
    sse_db::migrate(&pool).await.context("run migrations")?;

    let client = sse_stripe::build_client(
        &secrets.stripe_secret_key,
        secrets.stripe_connect_account_id.as_deref(),
        engine_config.stripe_api_version.as_deref(),
    );

    let account_id =
        sse_account::resolve_account_id_for_api_key(&pool, &client, &secrets.stripe_secret_key)
            .await
            .context("resolve account for configured stripe key")?;

    let retry_policy = sse_stripe::RetryPolicy::from_config(&engine_config);
    let upsert_engine =
        sse_upsert::UpsertEngine::new(pool.clone(), client.clone(), engine_config.auto_expand_lists, retry_policy);

    // `BackfillEngine` and the state handed to HTTP/SSE handlers each need
    // their own `Registry` instance (it is not `Clone`), so build the static
    // catalog twice from the same cloned client/upsert-engine handles — the
    // entries are just `Arc<dyn Fn>` closures, cheap to construct again.
    let registry_for_state =
        sse_backfill::build_production_registry(client.clone(), upsert_engine.clone(), engine_config.enable_sigma);
    let registry_for_backfill =
        sse_backfill::build_production_registry(client.clone(), upsert_engine.clone(), engine_config.enable_sigma);

    let backfill = sse_backfill::BackfillEngine::new(
        pool.clone(),
        client.clone(),
        registry_for_backfill,
        sse_schemas::DEFAULT_MAX_CONCURRENT_OBJECT_RUNS,
        engine_config.max_concurrent_customers,
        engine_config.backfill_related_entities,
        engine_config.enable_sigma,
        None,
    );

    let router_engine = sse_router::RouterEngine {
        pool: pool.clone(),
        client: client.clone(),
        upsert_engine,
        configured_api_key: secrets.stripe_secret_key.clone(),
        static_signing_secret: secrets.webhook_signing_secret.clone(),
        revalidate_via_api: engine_config.revalidate_via_api.clone(),
    };

    // Self-register this daemon's webhook endpoint when `SSE_WEBHOOK_URL` is
    // set. Reconciliation is idempotent, so re-running it on every boot is
    // safe even if Stripe already has the endpoint from a prior run.
    if let Ok(webhook_url) = std::env::var(ENV_WEBHOOK_URL) {
        let mirror = sse_webhook_reconcile::find_or_create_managed_webhook(
            &pool,
            &client,
            &account_id,
            &webhook_url,
            sse_webhook_reconcile::DEFAULT_ENABLED_EVENTS,
            env!("CARGO_PKG_VERSION"),
        )
        .await
        .context("reconcile managed webhook endpoint")?;
        info!(endpoint_id = %mirror.id, url = %mirror.url, "managed webhook endpoint reconciled");
    }

    let shared = state::AppState::new(pool, account_id, registry_for_state, backfill, router_engine);

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    worker::spawn_worker(Arc::clone(&shared), Duration::from_secs(engine_config.worker_interval_secs as u64));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("sse-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var(ENV_DAEMON_ADDR).ok()?.parse().ok()
}

/// CORS: allow only localhost origins, same posture as the teacher's daemon —
/// this engine's HTTP surface is an operator/ops-tooling surface, not a public API.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ];

    let origins: Vec<HeaderValue> = allowed_origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
