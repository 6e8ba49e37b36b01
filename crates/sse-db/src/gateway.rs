//! Typed access to the destination DB: timestamp-protected upserts, generic
//! queries, and advisory locks. This is the sole enforcement point for
//! invariant #1 (no observation with an older `last_synced_at` may overwrite a
//! newer one) and invariant #6 (advisory locks always release).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgConnection;
use sqlx::{PgPool, Row};
use std::future::Future;

use sse_schemas::DEFAULT_UPSERT_CHUNK_SIZE;

/// One payload to upsert: the Stripe object id and its raw JSON body.
#[derive(Debug, Clone)]
pub struct ObjectRow {
    pub id: String,
    pub raw: Value,
}

/// Upsert a batch of object-table rows with timestamp protection (invariant
/// #1): on insert, `last_synced_at` is set to `sync_timestamp` (or `now()` if
/// `None`); on conflict, the payload and timestamp are overwritten only when
/// `sync_timestamp` is `Some` and strictly greater than the stored value (a
/// `NULL` stored value counts as older than anything). Writes fan out with at
/// most [`DEFAULT_UPSERT_CHUNK_SIZE`] statements in flight at once.
pub async fn upsert_object_rows(
    pool: &PgPool,
    table: &str,
    account_id: &str,
    items: &[ObjectRow],
    sync_timestamp: Option<DateTime<Utc>>,
) -> Result<()> {
    upsert_object_rows_chunked(pool, table, account_id, items, sync_timestamp, None).await
}

/// Same as [`upsert_object_rows`] but for a child table carrying an extra
/// parent-id column (`subscription_items`, `checkout_session_line_items`).
pub async fn upsert_child_rows(
    pool: &PgPool,
    table: &str,
    parent_id_column: &str,
    account_id: &str,
    items: &[(String, ObjectRow)], // (parent_id, row)
    sync_timestamp: Option<DateTime<Utc>>,
) -> Result<()> {
    let sql = format!(
        r#"
        insert into {table} (id, {parent_id_column}, account_id, raw, last_synced_at)
        values ($1, $2, $3, $4, coalesce($5::timestamptz, now()))
        on conflict (id, account_id) do update
        set raw = excluded.raw,
            last_synced_at = excluded.last_synced_at,
            {parent_id_column} = excluded.{parent_id_column}
        where $5::timestamptz is not null
          and ($5::timestamptz > {table}.last_synced_at or {table}.last_synced_at is null)
        "#,
        table = table,
        parent_id_column = parent_id_column,
    );

    let chunk_size = DEFAULT_UPSERT_CHUNK_SIZE;
    for chunk in items.chunks(chunk_size) {
        let mut futures = Vec::with_capacity(chunk.len());
        for (parent_id, row) in chunk {
            let fut = sqlx::query(&sql)
                .bind(&row.id)
                .bind(parent_id)
                .bind(account_id)
                .bind(&row.raw)
                .bind(sync_timestamp)
                .execute(pool);
            futures.push(fut);
        }
        for fut in futures {
            fut.await.with_context(|| format!("upsert_child_rows into {table}"))?;
        }
    }
    Ok(())
}

async fn upsert_object_rows_chunked(
    pool: &PgPool,
    table: &str,
    account_id: &str,
    items: &[ObjectRow],
    sync_timestamp: Option<DateTime<Utc>>,
    chunk_override: Option<usize>,
) -> Result<()> {
    let sql = format!(
        r#"
        insert into {table} (id, account_id, raw, last_synced_at)
        values ($1, $2, $3, coalesce($4::timestamptz, now()))
        on conflict (id, account_id) do update
        set raw = excluded.raw,
            last_synced_at = excluded.last_synced_at
        where $4::timestamptz is not null
          and ($4::timestamptz > {table}.last_synced_at or {table}.last_synced_at is null)
        "#,
        table = table,
    );

    let chunk_size = chunk_override.unwrap_or(DEFAULT_UPSERT_CHUNK_SIZE);
    for chunk in items.chunks(chunk_size) {
        let mut futures = Vec::with_capacity(chunk.len());
        for row in chunk {
            let fut = sqlx::query(&sql)
                .bind(&row.id)
                .bind(account_id)
                .bind(&row.raw)
                .bind(sync_timestamp)
                .execute(pool);
            futures.push(fut);
        }
        for fut in futures {
            fut.await
                .with_context(|| format!("upsert_object_rows into {table}"))?;
        }
    }
    Ok(())
}

/// Upsert many rows unconditionally (no timestamp protection). Used for
/// account rows and a handful of metadata tables where "last write wins" is
/// the intended semantics.
pub async fn upsert_many_unconditional(
    pool: &PgPool,
    table: &str,
    account_id: &str,
    items: &[ObjectRow],
) -> Result<()> {
    let sql = format!(
        r#"
        insert into {table} (id, account_id, raw, last_synced_at)
        values ($1, $2, $3, now())
        on conflict (id, account_id) do update
        set raw = excluded.raw,
            last_synced_at = excluded.last_synced_at
        "#,
        table = table,
    );

    for row in items {
        sqlx::query(&sql)
            .bind(&row.id)
            .bind(account_id)
            .bind(&row.raw)
            .execute(pool)
            .await
            .with_context(|| format!("upsert_many_unconditional into {table}"))?;
    }
    Ok(())
}

/// Given a table and a list of candidate ids, returns the subset not present
/// for this account. Used by parent-backfill to discover which referenced
/// parents still need to be fetched from Stripe.
pub async fn find_missing_ids(
    pool: &PgPool,
    table: &str,
    account_id: &str,
    candidate_ids: &[String],
) -> Result<Vec<String>> {
    if candidate_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!("select id from {table} where account_id = $1 and id = any($2)");
    let rows = sqlx::query(&sql)
        .bind(account_id)
        .bind(candidate_ids)
        .fetch_all(pool)
        .await
        .with_context(|| format!("find_missing_ids query against {table}"))?;

    let present: std::collections::HashSet<String> = rows
        .iter()
        .map(|r| r.try_get::<String, _>("id"))
        .collect::<Result<_, _>>()
        .context("find_missing_ids row decode")?;

    Ok(candidate_ids
        .iter()
        .filter(|id| !present.contains(*id))
        .cloned()
        .collect())
}

/// Deletes a single row by Stripe id, used by the Event Router for deletion
/// events (`product.deleted`, `customer.deleted`, etc).
pub async fn delete_by_id(pool: &PgPool, table: &str, account_id: &str, id: &str) -> Result<()> {
    let sql = format!("delete from {table} where id = $1 and account_id = $2");
    sqlx::query(&sql)
        .bind(id)
        .bind(account_id)
        .execute(pool)
        .await
        .with_context(|| format!("delete_by_id from {table}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Advisory locks
// ---------------------------------------------------------------------------

/// Maps an arbitrary string key to a stable 32-bit integer: for each byte,
/// `h = (h << 5) - h + byte` (equivalent to the classic `h * 31 + byte`
/// rolling hash), truncated to `i32` via wrapping arithmetic. Equal inputs
/// always produce equal hashes; distinct inputs collide only by chance.
pub fn lock_key_for(key: &str) -> i32 {
    let mut h: i32 = 0;
    for byte in key.bytes() {
        h = h.wrapping_shl(5).wrapping_sub(h).wrapping_add(byte as i32);
    }
    h
}

/// Holds a dedicated connection for the lifetime of an acquired
/// `pg_advisory_lock`. Always releases — either explicitly via [`release`],
/// or (if the guard is dropped without an explicit release, including during
/// an unwinding panic) by handing the connection to a detached task that
/// issues `pg_advisory_unlock` in the background.
///
/// [`release`]: AdvisoryLockGuard::release
pub struct AdvisoryLockGuard {
    conn: Option<sqlx::pool::PoolConnection<sqlx::Postgres>>,
    lock_id: i32,
}

impl AdvisoryLockGuard {
    pub async fn acquire(pool: &PgPool, key: &str) -> Result<Self> {
        let lock_id = lock_key_for(key);
        let mut conn = pool
            .acquire()
            .await
            .context("acquire dedicated connection for advisory lock")?;
        sqlx::query("select pg_advisory_lock($1)")
            .bind(lock_id)
            .execute(&mut *conn)
            .await
            .context("pg_advisory_lock")?;
        Ok(AdvisoryLockGuard {
            conn: Some(conn),
            lock_id,
        })
    }

    pub fn connection(&mut self) -> &mut PgConnection {
        self.conn.as_mut().expect("advisory lock connection already released")
    }

    pub async fn release(mut self) -> Result<()> {
        if let Some(mut conn) = self.conn.take() {
            sqlx::query("select pg_advisory_unlock($1)")
                .bind(self.lock_id)
                .execute(&mut *conn)
                .await
                .context("pg_advisory_unlock")?;
        }
        Ok(())
    }
}

impl Drop for AdvisoryLockGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let lock_id = self.lock_id;
            tokio::spawn(async move {
                let mut conn = conn;
                if let Err(e) = sqlx::query("select pg_advisory_unlock($1)")
                    .bind(lock_id)
                    .execute(&mut *conn)
                    .await
                {
                    tracing::warn!(error = %e, "failed to release advisory lock on drop");
                }
            });
        }
    }
}

/// Acquires the advisory lock named by `key`, runs `f` with a pinned
/// connection, and releases the lock before returning — on every exit path,
/// including `f` returning an error or panicking.
pub async fn with_lock<F, Fut, T>(pool: &PgPool, key: &str, f: F) -> Result<T>
where
    F: FnOnce(&mut PgConnection) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut guard = AdvisoryLockGuard::acquire(pool, key).await?;
    let result = f(guard.connection()).await;
    guard.release().await?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_hashes_identically() {
        assert_eq!(
            lock_key_for("webhook:acct_A:https://example.com"),
            lock_key_for("webhook:acct_A:https://example.com")
        );
    }

    #[test]
    fn distinct_keys_hash_differently() {
        let a = lock_key_for("webhook:acct_A:https://example.com/one");
        let b = lock_key_for("webhook:acct_A:https://example.com/two");
        assert_ne!(a, b);
    }

    #[test]
    fn empty_key_hashes_to_zero() {
        assert_eq!(lock_key_for(""), 0);
    }
}
