//! Event Router (§4.C): account resolution, static event-type dispatch, the
//! re-fetch policy, and `process_webhook` — the in-scope half of the webhook
//! endpoint (the HTTP route itself is out of scope; see §6).

use std::sync::Arc;

use sqlx::PgPool;
use stripe::Client;

use sse_upsert::UpsertEngine;

pub mod account_resolution;
pub mod dispatch;
pub mod refetch;
pub mod webhook;

pub use webhook::{process_webhook, WebhookError};

/// Everything `process_webhook` and its handlers need: the pool, the Stripe
/// client, the upsert engine, and the handful of recognized configuration
/// options named in §6 that bear on routing (the re-fetch set, which
/// account's key is configured for this endpoint, and the signing secret
/// resolution order).
pub struct RouterEngine {
    pub pool: PgPool,
    pub client: Client,
    pub upsert_engine: Arc<UpsertEngine>,
    pub configured_api_key: String,
    pub static_signing_secret: Option<String>,
    pub revalidate_via_api: Vec<String>,
}
