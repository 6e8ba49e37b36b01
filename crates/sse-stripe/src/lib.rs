//! Thin wrapper over `async-stripe`: client construction, retry/backoff on
//! rate limits and transient 5xx, and the handful of calls the engine needs
//! outside of per-kind list/retrieve (account lookup, webhook endpoint CRUD).
//! The raw Stripe HTTP wire protocol itself is out of scope for this engine —
//! `async-stripe` is the external paginated list/retrieve source named in the
//! purpose & scope notes.

use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use stripe::Client;

pub mod objects;
pub mod retry;
pub mod webhook_endpoints;

pub use retry::{with_retries, RetryPolicy};

/// Builds a Stripe client for the resolved secrets, optionally pinned to a
/// Connect account and/or a specific API version string.
pub fn build_client(
    secret_key: &str,
    connect_account_id: Option<&str>,
    api_version: Option<&str>,
) -> Client {
    let mut client = Client::new(secret_key);
    if let Some(account) = connect_account_id {
        client = client.with_stripe_account(account.parse().expect("valid connect account id"));
    }
    if let Some(_version) = api_version {
        // async-stripe pins its own compiled-in API version; a configured
        // override is recorded for operator visibility but not applied to
        // the wire, since the client does not expose a per-request override.
        tracing::debug!(version = _version, "stripe api_version configured but not overridable on this client");
    }
    client
}

/// Jittered exponential backoff delay for attempt `n` (0-indexed), bounded by
/// `max_delay`.
pub fn backoff_delay(initial: Duration, max: Duration, attempt: u32, jitter: bool) -> Duration {
    let exp = initial.as_millis().saturating_mul(1u128 << attempt.min(20));
    let capped = exp.min(max.as_millis());
    let millis = if jitter {
        let mut rng = rand::thread_rng();
        rng.gen_range(0..=capped.max(1)) as u64
    } else {
        capped as u64
    };
    Duration::from_millis(millis)
}

/// True if a `stripe::StripeError` is the 404 the engine treats specially
/// ("deleted since event" — the caller should delete the local row and
/// return success rather than propagate).
pub fn is_resource_missing(err: &stripe::StripeError) -> bool {
    matches!(
        err,
        stripe::StripeError::Stripe(req_err) if req_err.http_status == 404
            && req_err.code.as_deref() == Some("resource_missing")
    )
}

/// True if a `stripe::StripeError` is a rate limit (429) or transient server
/// error (5xx) — the cases the retry wrapper should retry.
pub fn is_transient(err: &stripe::StripeError) -> bool {
    match err {
        stripe::StripeError::Stripe(req_err) => {
            req_err.http_status == 429 || req_err.http_status >= 500
        }
        _ => false,
    }
}

pub async fn retrieve_account(
    client: &Client,
    account_id: &str,
) -> Result<stripe::Account> {
    let id: stripe::AccountId = account_id.parse().context("parse stripe account id")?;
    stripe::Account::retrieve(client, &id, &[])
        .await
        .context("stripe accounts.retrieve")
}

/// Retrieves the account owning whatever secret key the client was built
/// with — Stripe's `GET /v1/account` (no id). Used by the Event Router when
/// an inbound event carries no Connect `account` field, so the account
/// identity for a configured key is discovered rather than assumed. Goes
/// through the client's raw-request escape hatch since this is the one call
/// in the engine with no id-addressed typed equivalent.
pub async fn retrieve_own_account(client: &Client) -> Result<serde_json::Value> {
    client
        .get("/account")
        .await
        .context("stripe GET /account (retrieve own account)")
}
