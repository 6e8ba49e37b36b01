//! Backing store for the queue-driven worker dispatch protocol (§6): a
//! Postgres-backed outbox table, `_worker_queue`, claimed with
//! `FOR UPDATE SKIP LOCKED` so multiple worker processes can drain it without
//! stepping on each other. The claiming, visibility-timeout, and re-enqueue
//! policy itself lives in `sse-daemon`'s tick loop — this module only owns
//! the table's CRUD.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};

/// One row of `_worker_queue`.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: i64,
    pub object_name: String,
    pub enqueued_at: DateTime<Utc>,
    pub visible_at: DateTime<Utc>,
}

fn row_to_message(row: &sqlx::postgres::PgRow) -> Result<QueuedMessage> {
    Ok(QueuedMessage {
        id: row.try_get("id")?,
        object_name: row.try_get("object_name")?,
        enqueued_at: row.try_get("enqueued_at")?,
        visible_at: row.try_get("visible_at")?,
    })
}

/// Enqueues one `{object: object_name}` message, immediately visible.
pub async fn enqueue(pool: &PgPool, object_name: &str) -> Result<()> {
    sqlx::query("insert into _worker_queue (object_name, enqueued_at, visible_at) values ($1, now(), now())")
        .bind(object_name)
        .execute(pool)
        .await
        .context("enqueue worker queue message")?;
    Ok(())
}

/// Enqueues one message per name, in the given order. Used to seed the queue
/// (§6: "enqueueing one message per supported object, in registry order").
pub async fn enqueue_many(pool: &PgPool, object_names: &[&str]) -> Result<()> {
    for name in object_names {
        enqueue(pool, name).await?;
    }
    Ok(())
}

/// True iff there is at least one message visible right now (not claimed, or
/// claimed but past its visibility timeout). Used to decide whether a tick
/// should seed the queue instead of draining it.
pub async fn is_empty(pool: &PgPool) -> Result<bool> {
    let row: (bool,) = sqlx::query_as("select not exists (select 1 from _worker_queue where visible_at <= now())")
        .fetch_one(pool)
        .await
        .context("worker queue is_empty check")?;
    Ok(row.0)
}

/// Claims up to `limit` visible messages with `FOR UPDATE SKIP LOCKED` so
/// concurrent worker processes never claim the same row twice, and bumps
/// `visible_at` forward by `visibility_timeout` (§6 default 60s) so a worker
/// that dies mid-processing yields the message back automatically once the
/// timeout elapses — no explicit lease-release call is needed on failure.
pub async fn claim_batch(
    pool: &PgPool,
    limit: i64,
    visibility_timeout: ChronoDuration,
    worker_id: &str,
) -> Result<Vec<QueuedMessage>> {
    let mut tx = pool.begin().await.context("claim_batch: begin tx")?;

    let rows = sqlx::query(
        r#"
        select id, object_name, enqueued_at, visible_at
        from _worker_queue
        where visible_at <= now()
        order by id
        limit $1
        for update skip locked
        "#,
    )
    .bind(limit)
    .fetch_all(&mut *tx)
    .await
    .context("claim_batch: select for update skip locked")?;

    let mut claimed = Vec::with_capacity(rows.len());
    for row in &rows {
        let id: i64 = row.try_get("id")?;
        sqlx::query(
            "update _worker_queue set claimed_by = $1, claimed_at = now(), visible_at = now() + $2::interval where id = $3",
        )
        .bind(worker_id)
        .bind(format!("{} seconds", visibility_timeout.num_seconds()))
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("claim_batch: mark claimed")?;
        claimed.push(row_to_message(row)?);
    }

    tx.commit().await.context("claim_batch: commit")?;
    Ok(claimed)
}

/// Deletes a message after its `process_next` call has succeeded.
pub async fn delete_message(pool: &PgPool, id: i64) -> Result<()> {
    sqlx::query("delete from _worker_queue where id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("delete worker queue message")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_timeout_interval_literal_is_well_formed() {
        let d = ChronoDuration::seconds(60);
        assert_eq!(format!("{} seconds", d.num_seconds()), "60 seconds");
    }
}
