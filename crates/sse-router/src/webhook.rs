//! `process_webhook` (§4.C / §6): signature verification, event-id
//! idempotency, then dispatch. The HTTP frontend that maps `WebhookError` to
//! a status code is out of scope here — this is the library half only.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use stripe::Event;

use crate::{account_resolution, dispatch, RouterEngine};

/// Distinguishes a bad/unverifiable signature from every other failure, so
/// the (out-of-scope) HTTP frontend can map the former to 400 and the latter
/// to 500 without re-deriving that distinction from an opaque error string.
#[derive(Debug)]
pub enum WebhookError {
    BadSignature(String),
    Other(anyhow::Error),
}

impl std::fmt::Display for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookError::BadSignature(msg) => write!(f, "webhook signature verification failed: {msg}"),
            WebhookError::Other(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for WebhookError {}

impl From<anyhow::Error> for WebhookError {
    fn from(err: anyhow::Error) -> Self {
        WebhookError::Other(err)
    }
}

/// Resolves the HMAC secret to verify this payload against: the engine's
/// configured static secret if one exists, else a speculative (unverified)
/// read of the payload's `account` field used to look up that account's
/// managed-webhook signing secret.
async fn resolve_signing_secret(engine: &RouterEngine, payload: &str) -> Result<String> {
    if let Some(secret) = &engine.static_signing_secret {
        return Ok(secret.clone());
    }

    let speculative: Value = serde_json::from_str(payload).context("parse webhook payload as json")?;
    let account_id = speculative
        .get("account")
        .and_then(Value::as_str)
        .context("no static signing secret configured and the event carries no account field")?;

    sqlx::query_scalar::<_, String>(
        "select signing_secret from managed_webhooks where account_id = $1 and status = 'enabled' limit 1",
    )
    .bind(account_id)
    .fetch_optional(&engine.pool)
    .await
    .context("look up managed webhook signing secret")?
    .context("no managed webhook signing secret found for account")
}

/// Event-id idempotency ledger insert. Returns `true` iff this is the first
/// time this event id has been recorded.
async fn record_event_if_new(pool: &PgPool, event: &Event) -> Result<bool> {
    let event_type = format!("{:?}", event.type_);
    let result = sqlx::query("insert into _webhook_events (event_id, event_type) values ($1, $2) on conflict (event_id) do nothing")
        .bind(event.id.to_string())
        .bind(event_type)
        .execute(pool)
        .await
        .context("record webhook event idempotency")?;
    Ok(result.rows_affected() == 1)
}

pub async fn process_webhook(engine: &RouterEngine, body: &[u8], signature: &str) -> Result<(), WebhookError> {
    let payload = std::str::from_utf8(body)
        .map_err(|e| WebhookError::BadSignature(format!("invalid utf-8 payload: {e}")))?;

    let secret = resolve_signing_secret(engine, payload).await?;

    let event = stripe::Webhook::construct_event(payload, signature, &secret)
        .map_err(|e| WebhookError::BadSignature(e.to_string()))?;

    let is_new = record_event_if_new(&engine.pool, &event).await?;
    if !is_new {
        tracing::info!(event_id = %event.id, "duplicate webhook event, skipping");
        return Ok(());
    }

    let account_id =
        account_resolution::resolve_account_id(&engine.pool, &engine.client, &event, &engine.configured_api_key)
            .await?;

    dispatch::dispatch(engine, &account_id, &event).await?;
    Ok(())
}
