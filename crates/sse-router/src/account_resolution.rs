//! Account-id resolution (§4.C step 1): the Connect `account` field on the
//! event wins when present; otherwise the configured API key is hashed and
//! looked up against `accounts.api_key_hashes`, falling back to a Stripe
//! "retrieve own account" call and an upsert on a cache miss.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use stripe::{Client, Event};

pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

async fn find_account_by_api_key_hash(pool: &PgPool, hash: &str) -> Result<Option<String>> {
    let row = sqlx::query("select id from accounts where $1 = any(api_key_hashes)")
        .bind(hash)
        .fetch_optional(pool)
        .await
        .context("find_account_by_api_key_hash")?;
    Ok(row.map(|r| r.try_get::<String, _>("id")).transpose()?)
}

/// Appends `hash` to the account's hash set and stores the latest account
/// payload. `ON CONFLICT` union of `api_key_hashes` lets the same account be
/// reachable under more than one configured key over its lifetime.
async fn upsert_account_with_hash(pool: &PgPool, account_id: &str, raw: &Value, hash: &str) -> Result<()> {
    sqlx::query(
        r#"
        insert into accounts (id, raw, api_key_hashes)
        values ($1, $2, array[$3])
        on conflict (id) do update
        set raw = excluded.raw,
            api_key_hashes = (
                select array_agg(distinct h) from unnest(accounts.api_key_hashes || excluded.api_key_hashes) as h
            ),
            last_synced_at = now(),
            updated_at = now()
        "#,
    )
    .bind(account_id)
    .bind(raw)
    .bind(hash)
    .execute(pool)
    .await
    .context("upsert_account_with_hash")?;
    Ok(())
}

/// Ensures an `accounts` row exists for `account_id` with no hash change —
/// used for the Connect fan-in case, where the account id comes from the
/// event itself rather than a configured key.
pub async fn ensure_account_exists(pool: &PgPool, account_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        insert into accounts (id, raw, api_key_hashes)
        values ($1, $2, '{}')
        on conflict (id) do nothing
        "#,
    )
    .bind(account_id)
    .bind(json!({ "id": account_id, "object": "account" }))
    .execute(pool)
    .await
    .context("ensure_account_exists")?;
    Ok(())
}

/// Resolves the account id for one inbound event, per §4.C step 1.
/// `configured_api_key` is the Stripe secret key configured for whichever
/// webhook endpoint delivered this event — used only when the event carries
/// no Connect `account` field.
pub async fn resolve_account_id(
    pool: &PgPool,
    client: &Client,
    event: &Event,
    configured_api_key: &str,
) -> Result<String> {
    if let Some(account_id) = &event.account {
        ensure_account_exists(pool, account_id).await?;
        return Ok(account_id.clone());
    }

    let hash = hash_api_key(configured_api_key);
    if let Some(account_id) = find_account_by_api_key_hash(pool, &hash).await? {
        return Ok(account_id);
    }

    let account = sse_stripe::retrieve_own_account(client).await?;
    let account_id = account
        .get("id")
        .and_then(Value::as_str)
        .context("stripe accounts.retrieve response missing id")?
        .to_string();
    upsert_account_with_hash(pool, &account_id, &account, &hash).await?;
    Ok(account_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_hashes_identically() {
        assert_eq!(hash_api_key("sk_test_abc"), hash_api_key("sk_test_abc"));
    }

    #[test]
    fn different_keys_hash_differently() {
        assert_ne!(hash_api_key("sk_test_abc"), hash_api_key("sk_test_def"));
    }
}
