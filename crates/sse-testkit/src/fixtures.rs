use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;

use sse_schemas::SyncRun;

/// Inserts a minimal account row, returning its id. Every scenario test needs
/// at least this much to satisfy the account foreign key on object tables.
pub async fn account(pool: &PgPool, account_id: &str) -> Result<()> {
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
    .context("fixtures::account")?;
    Ok(())
}

/// Creates (or returns the already-active) sync run for `account_id`, the
/// minimum setup a scenario test needs before it can create object runs.
pub async fn sync_run(pool: &PgPool, account_id: &str) -> Result<SyncRun> {
    sse_db::get_or_create_sync_run(pool, account_id, "test", 1)
        .await
        .context("fixtures::sync_run")?
        .context("fixtures::sync_run: unexpected exclusion race on a fresh account")
}

/// Creates a `pending` object run under `run`, returning nothing — callers
/// that need to observe or transition it go through `sse_db::runs` directly.
pub async fn object_run(pool: &PgPool, run: &SyncRun, object_name: &str) -> Result<()> {
    sse_db::create_object_runs(pool, &run.account_id, run.started_at, &[object_name])
        .await
        .context("fixtures::object_run")?;
    Ok(())
}

pub fn sync_timestamp(epoch_secs: i64) -> DateTime<Utc> {
    use chrono::TimeZone;
    Utc.timestamp_opt(epoch_secs, 0).single().expect("valid unix timestamp")
}
