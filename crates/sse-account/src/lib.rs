//! Account Lifecycle (§4.F): resolves the active Stripe account from an
//! API-key hash, upserts the account row on first successful lookup (hashes
//! accumulate by set union), and supports the dangerous cascade-delete used
//! to tear an account's mirror down entirely.

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};

use sse_registry::Registry;

/// SHA-256 hex digest of a Stripe secret key. Only the hash is ever stored —
/// the key itself never touches the destination database.
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Looks an already-hashed API key up in the account hash set. Callers that
/// hold the raw key should hash it with [`hash_api_key`] first.
pub async fn get_account_id_by_api_key(pool: &PgPool, key: &str) -> Result<Option<String>> {
    let hash = hash_api_key(key);
    let row = sqlx::query("select id from accounts where api_key_hashes @> array[$1]")
        .bind(&hash)
        .fetch_optional(pool)
        .await
        .context("get_account_id_by_api_key")?;
    Ok(row.map(|r| r.try_get::<String, _>("id")).transpose()?)
}

/// Resolves the account a configured Stripe secret key belongs to, the same
/// cache-then-retrieve path `sse-router`'s webhook account resolution takes
/// for the Connect-less case: a hash-set hit returns immediately; a miss
/// calls Stripe's "retrieve own account" and upserts the result with the new
/// hash folded in. Used by non-webhook entry points (`sse-daemon`, `sse-cli`)
/// that need an account id before they can call into the Backfill Controller
/// or Managed Webhook Reconciler.
pub async fn resolve_account_id_for_api_key(
    pool: &PgPool,
    client: &stripe::Client,
    api_key: &str,
) -> Result<String> {
    if let Some(account_id) = get_account_id_by_api_key(pool, api_key).await? {
        return Ok(account_id);
    }

    let account = sse_stripe::retrieve_own_account(client).await?;
    let account_id = account
        .get("id")
        .and_then(Value::as_str)
        .context("stripe accounts.retrieve response missing id")?
        .to_string();
    upsert_account(pool, &account_id, &account, &hash_api_key(api_key)).await?;
    Ok(account_id)
}

/// Inserts the account if absent, or merges `api_key_hash` into the existing
/// hash set (duplicates suppressed), overwrites the raw payload, and bumps
/// `last_synced_at`/`updated_at`.
pub async fn upsert_account(pool: &PgPool, account_id: &str, raw: &Value, api_key_hash: &str) -> Result<()> {
    sqlx::query(
        r#"
        insert into accounts (id, raw, api_key_hashes, last_synced_at, updated_at)
        values ($1, $2, array[$3], now(), now())
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
    .bind(api_key_hash)
    .execute(pool)
    .await
    .context("upsert_account")?;
    Ok(())
}

/// Per-table row count ahead of (or in place of) a dangerous delete.
#[derive(Debug, Clone)]
pub struct TableRowCount {
    pub table: &'static str,
    pub rows: i64,
}

/// Result of a [`dangerously_delete_account`] call: the per-table counts, and
/// whether the delete actually ran (`false` for a dry run).
#[derive(Debug, Clone)]
pub struct DeleteReport {
    pub counts: Vec<TableRowCount>,
    pub executed: bool,
}

/// Non-registry child tables with an `account_id` column that are not
/// themselves syncable object types in [`Registry`] (see its own doc comment
/// on `cascade_delete_object_tables`).
const EXTRA_CHILD_TABLES: &[&str] = &["subscription_items", "checkout_session_line_items", "entitlements"];

/// Full cascade-delete order: registry object tables (children before
/// parents), the extra child tables, then `accounts` absolute last.
fn full_delete_order(registry: &Registry) -> Vec<&'static str> {
    let mut order = registry.cascade_delete_object_tables();
    order.extend_from_slice(EXTRA_CHILD_TABLES);
    order.push("accounts");
    order
}

/// Counts rows per table in cascade order, and — unless `dry_run` — deletes
/// them in that order with `accounts` last. When `use_transaction` is `true`
/// the whole sequence is one atomic transaction; when `false`, each table is
/// an independent statement (recommended once totals exceed roughly 100,000
/// rows, where a single multi-table transaction risks a long-held lock).
pub async fn dangerously_delete_account(
    pool: &PgPool,
    registry: &Registry,
    account_id: &str,
    dry_run: bool,
    use_transaction: bool,
) -> Result<DeleteReport> {
    let order = full_delete_order(registry);

    let mut counts = Vec::with_capacity(order.len());
    for table in &order {
        let count: i64 = count_rows(pool, table, account_id).await?;
        counts.push(TableRowCount { table, rows: count });
    }

    if dry_run {
        return Ok(DeleteReport { counts, executed: false });
    }

    tracing::warn!(account_id, use_transaction, "dangerously_delete_account: executing cascade delete");

    if use_transaction {
        let mut tx = pool.begin().await.context("dangerously_delete_account: begin tx")?;
        for table in &order {
            delete_from(&mut tx, table, account_id).await?;
        }
        tx.commit().await.context("dangerously_delete_account: commit")?;
    } else {
        for table in &order {
            delete_from(pool, table, account_id).await?;
        }
    }

    Ok(DeleteReport { counts, executed: true })
}

async fn count_rows<'e, E>(executor: E, table: &str, account_id: &str) -> Result<i64>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let id_column = if table == "accounts" { "id" } else { "account_id" };
    let sql = format!("select count(*) from {table} where {id_column} = $1");
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(account_id)
        .fetch_one(executor)
        .await
        .with_context(|| format!("count rows in {table}"))?;
    Ok(count)
}

async fn delete_from<'e, E>(executor: E, table: &str, account_id: &str) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let id_column = if table == "accounts" { "id" } else { "account_id" };
    let sql = format!("delete from {table} where {id_column} = $1");
    sqlx::query(&sql)
        .bind(account_id)
        .execute(executor)
        .await
        .with_context(|| format!("delete from {table}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_api_key_is_deterministic_sha256_hex() {
        let a = hash_api_key("sk_test_abc");
        let b = hash_api_key("sk_test_abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_api_key("sk_test_xyz"));
    }

    #[test]
    fn full_delete_order_puts_accounts_last() {
        let registry = Registry::new(vec![]);
        let order = full_delete_order(&registry);
        assert_eq!(order.last(), Some(&"accounts"));
        assert!(order.contains(&"subscription_items"));
        assert!(order.contains(&"entitlements"));
    }
}
