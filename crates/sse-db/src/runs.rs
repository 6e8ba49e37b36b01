//! Sync-run and object-run CRUD: the state machine backing the Backfill
//! Controller. See the object-run state diagram in the component design notes
//! — `pending -> running -> {complete, error}`, all transitions atomic writes
//! guarded by a `WHERE status = '...'` predicate.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{PgPool, Row};

use sse_schemas::{Cursor, ObjectRun, ObjectRunStatus, SyncRun, DEADMAN_STALE_AFTER_SECS};

use crate::error::is_unique_violation;

const STALE_CONSTRAINT: &str = "uq_sync_runs_one_active_per_account";

fn truncate_to_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(dt.timestamp_millis())
        .single()
        .unwrap_or(dt)
}

fn row_to_sync_run(row: &sqlx::postgres::PgRow) -> Result<SyncRun> {
    Ok(SyncRun {
        account_id: row.try_get("account_id")?,
        started_at: row.try_get("started_at")?,
        max_concurrent: row.try_get("max_concurrent")?,
        closed_at: row.try_get("closed_at")?,
        triggered_by: row.try_get("triggered_by")?,
    })
}

fn row_to_object_run(row: &sqlx::postgres::PgRow) -> Result<ObjectRun> {
    let status_str: String = row.try_get("status")?;
    Ok(ObjectRun {
        account_id: row.try_get("account_id")?,
        run_started_at: row.try_get("run_started_at")?,
        object_name: row.try_get("object_name")?,
        status: ObjectRunStatus::from_db_str(&status_str)
            .with_context(|| format!("unknown object run status: {status_str}"))?,
        processed_count: row.try_get("processed_count")?,
        cursor: row.try_get("cursor")?,
        page_cursor: row.try_get("page_cursor")?,
        started_at: row.try_get("started_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
    })
}

/// Marks every `running` object run whose `updated_at` is older than
/// [`DEADMAN_STALE_AFTER_SECS`] as `error`, then closes every run that has at
/// least one object run and no remaining pending/running children.
pub async fn cancel_stale_runs(pool: &PgPool, account_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        update _sync_obj_runs
        set status = 'error',
            error_message = 'stale (no update in 5 min)',
            page_cursor = null,
            completed_at = now(),
            updated_at = now()
        where account_id = $1
          and status = 'running'
          and updated_at < now() - ($2 || ' seconds')::interval
        "#,
    )
    .bind(account_id)
    .bind(DEADMAN_STALE_AFTER_SECS.to_string())
    .execute(pool)
    .await
    .context("cancel_stale_runs: mark stale object runs")?;

    close_eligible_runs(pool, account_id).await
}

async fn close_eligible_runs(pool: &PgPool, account_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        update _sync_runs r
        set closed_at = now()
        where r.account_id = $1
          and r.closed_at is null
          and exists (
              select 1 from _sync_obj_runs o
              where o.account_id = r.account_id and o.run_started_at = r.started_at
          )
          and not exists (
              select 1 from _sync_obj_runs o
              where o.account_id = r.account_id
                and o.run_started_at = r.started_at
                and o.status in ('pending', 'running')
          )
        "#,
    )
    .bind(account_id)
    .execute(pool)
    .await
    .context("close_eligible_runs")?;
    Ok(())
}

/// Returns the currently active (unclosed) sync run for this account, if any.
pub async fn get_active_sync_run(pool: &PgPool, account_id: &str) -> Result<Option<SyncRun>> {
    let row = sqlx::query(
        r#"
        select account_id, started_at, max_concurrent, closed_at, triggered_by
        from _sync_runs
        where account_id = $1 and closed_at is null
        "#,
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await
    .context("get_active_sync_run")?;

    row.as_ref().map(row_to_sync_run).transpose()
}

/// Cancels stale runs, then returns the active run if one exists, else inserts
/// a new one (`started_at` truncated to millisecond precision). Invariant #2
/// is enforced by a partial unique index (`uq_sync_runs_one_active_per_account`
/// on `closed_at is null`), so a concurrent caller's insert collision surfaces
/// as a unique violation (SQLSTATE `23505`), not an exclusion violation — a
/// benign race with a concurrent caller. This returns `Ok(None)` and the
/// caller is expected to retry [`get_active_sync_run`].
pub async fn get_or_create_sync_run(
    pool: &PgPool,
    account_id: &str,
    triggered_by: &str,
    max_concurrent: i32,
) -> Result<Option<SyncRun>> {
    cancel_stale_runs(pool, account_id).await?;

    if let Some(active) = get_active_sync_run(pool, account_id).await? {
        return Ok(Some(active));
    }

    let started_at = truncate_to_millis(Utc::now());
    let insert = sqlx::query(
        r#"
        insert into _sync_runs (account_id, started_at, max_concurrent, triggered_by)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(account_id)
    .bind(started_at)
    .bind(max_concurrent)
    .bind(triggered_by)
    .execute(pool)
    .await;

    match insert {
        Ok(_) => Ok(Some(SyncRun {
            account_id: account_id.to_string(),
            started_at,
            max_concurrent,
            closed_at: None,
            triggered_by: triggered_by.to_string(),
        })),
        Err(e) if is_unique_violation(&e, STALE_CONSTRAINT) => Ok(None),
        Err(e) => Err(anyhow::Error::new(e).context("get_or_create_sync_run: insert failed")),
    }
}

/// Inserts `pending` object-run rows for `names`, ignoring rows that already
/// exist (a prior tick may have created some of them already).
pub async fn create_object_runs(
    pool: &PgPool,
    account_id: &str,
    run_started_at: DateTime<Utc>,
    names: &[&str],
) -> Result<()> {
    for name in names {
        sqlx::query(
            r#"
            insert into _sync_obj_runs (account_id, run_started_at, object_name, status)
            values ($1, $2, $3, 'pending')
            on conflict (account_id, run_started_at, object_name) do nothing
            "#,
        )
        .bind(account_id)
        .bind(run_started_at)
        .bind(name)
        .execute(pool)
        .await
        .with_context(|| format!("create_object_runs: {name}"))?;
    }
    Ok(())
}

pub async fn get_object_run(
    pool: &PgPool,
    account_id: &str,
    run_started_at: DateTime<Utc>,
    object_name: &str,
) -> Result<Option<ObjectRun>> {
    let row = sqlx::query(
        r#"
        select account_id, run_started_at, object_name, status, processed_count,
               cursor, page_cursor, started_at, updated_at, completed_at, error_message
        from _sync_obj_runs
        where account_id = $1 and run_started_at = $2 and object_name = $3
        "#,
    )
    .bind(account_id)
    .bind(run_started_at)
    .bind(object_name)
    .fetch_optional(pool)
    .await
    .context("get_object_run")?;

    row.as_ref().map(row_to_object_run).transpose()
}

/// Atomically transitions `pending -> running` iff fewer than `max_concurrent`
/// object runs in this sync run are already `running`. The count-then-update
/// is a single statement, so under concurrent callers the running-count can
/// briefly exceed `max_concurrent` by one per the spec's accepted race — it
/// never exceeds `max_concurrent + 1`.
pub async fn try_start_object_sync(
    pool: &PgPool,
    account_id: &str,
    run_started_at: DateTime<Utc>,
    object_name: &str,
    max_concurrent: i32,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        update _sync_obj_runs
        set status = 'running', updated_at = now()
        where account_id = $1
          and run_started_at = $2
          and object_name = $3
          and status = 'pending'
          and (
              select count(*) from _sync_obj_runs
              where account_id = $1 and run_started_at = $2 and status = 'running'
          ) < $4
        "#,
    )
    .bind(account_id)
    .bind(run_started_at)
    .bind(object_name)
    .bind(max_concurrent)
    .execute(pool)
    .await
    .context("try_start_object_sync")?;

    Ok(result.rows_affected() == 1)
}

pub async fn increment_object_progress(
    pool: &PgPool,
    account_id: &str,
    run_started_at: DateTime<Utc>,
    object_name: &str,
    delta: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        update _sync_obj_runs
        set processed_count = processed_count + $4, updated_at = now()
        where account_id = $1 and run_started_at = $2 and object_name = $3
        "#,
    )
    .bind(account_id)
    .bind(run_started_at)
    .bind(object_name)
    .bind(delta)
    .execute(pool)
    .await
    .context("increment_object_progress")?;
    Ok(())
}

pub async fn update_object_page_cursor(
    pool: &PgPool,
    account_id: &str,
    run_started_at: DateTime<Utc>,
    object_name: &str,
    page_cursor: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        update _sync_obj_runs
        set page_cursor = $4, updated_at = now()
        where account_id = $1 and run_started_at = $2 and object_name = $3
        "#,
    )
    .bind(account_id)
    .bind(run_started_at)
    .bind(object_name)
    .bind(page_cursor)
    .execute(pool)
    .await
    .context("update_object_page_cursor")?;
    Ok(())
}

/// Advances the object run's cursor monotonically: `GREATEST(old, candidate)`
/// under the cursor's own ordering (numeric if all-digits, else
/// byte-lexicographic). Reads then writes inside one transaction so a
/// concurrent page advance (there should be at most one owner per object run,
/// but this keeps the invariant airtight regardless).
pub async fn update_object_cursor(
    pool: &PgPool,
    account_id: &str,
    run_started_at: DateTime<Utc>,
    object_name: &str,
    candidate: &str,
) -> Result<()> {
    let mut tx = pool.begin().await.context("update_object_cursor: begin tx")?;

    let current: Option<String> = sqlx::query_scalar::<_, Option<String>>(
        r#"
        select cursor from _sync_obj_runs
        where account_id = $1 and run_started_at = $2 and object_name = $3
        for update
        "#,
    )
    .bind(account_id)
    .bind(run_started_at)
    .bind(object_name)
    .fetch_optional(&mut *tx)
    .await
    .context("update_object_cursor: read current")?
    .flatten();

    let new_cursor = Cursor::greatest(current.as_deref().map(Cursor::new).as_ref(), &Cursor::new(candidate));

    sqlx::query(
        r#"
        update _sync_obj_runs
        set cursor = $4, updated_at = now()
        where account_id = $1 and run_started_at = $2 and object_name = $3
        "#,
    )
    .bind(account_id)
    .bind(run_started_at)
    .bind(object_name)
    .bind(new_cursor.as_str())
    .execute(&mut *tx)
    .await
    .context("update_object_cursor: write")?;

    tx.commit().await.context("update_object_cursor: commit")?;
    Ok(())
}

/// `running -> complete`. Clears the page-cursor and checks whether the
/// parent run is now fully done.
pub async fn complete_object_sync(
    pool: &PgPool,
    account_id: &str,
    run_started_at: DateTime<Utc>,
    object_name: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        update _sync_obj_runs
        set status = 'complete', page_cursor = null, completed_at = now(), updated_at = now()
        where account_id = $1 and run_started_at = $2 and object_name = $3 and status = 'running'
        "#,
    )
    .bind(account_id)
    .bind(run_started_at)
    .bind(object_name)
    .execute(pool)
    .await
    .context("complete_object_sync")?;

    close_eligible_runs(pool, account_id).await
}

/// `{pending, running} -> error`. Clears the page-cursor and checks whether
/// the parent run is now fully done.
pub async fn fail_object_sync(
    pool: &PgPool,
    account_id: &str,
    run_started_at: DateTime<Utc>,
    object_name: &str,
    message: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        update _sync_obj_runs
        set status = 'error', error_message = $4, page_cursor = null,
            completed_at = now(), updated_at = now()
        where account_id = $1 and run_started_at = $2 and object_name = $3
          and status in ('pending', 'running')
        "#,
    )
    .bind(account_id)
    .bind(run_started_at)
    .bind(object_name)
    .bind(message)
    .execute(pool)
    .await
    .context("fail_object_sync")?;

    close_eligible_runs(pool, account_id).await
}

/// The boundary used to decide incremental vs historical mode: the maximum
/// cursor across every *completed* object run for this object, across all
/// sync runs.
pub async fn get_last_completed_cursor(
    pool: &PgPool,
    account_id: &str,
    object_name: &str,
) -> Result<Option<Cursor>> {
    let cursors: Vec<String> = sqlx::query_scalar(
        r#"
        select cursor from _sync_obj_runs
        where account_id = $1 and object_name = $2 and status = 'complete' and cursor is not null
        "#,
    )
    .bind(account_id)
    .bind(object_name)
    .fetch_all(pool)
    .await
    .context("get_last_completed_cursor")?;

    let owned: Vec<Cursor> = cursors.into_iter().map(Cursor::new).collect();
    Ok(Cursor::max_across(owned.iter()))
}

/// As [`get_last_completed_cursor`] but restricted to runs that started
/// strictly before `run_started_at` — the boundary `process_next` uses to
/// decide whether this run continues a historical backfill or starts fresh.
pub async fn get_last_cursor_before_run(
    pool: &PgPool,
    account_id: &str,
    object_name: &str,
    run_started_at: DateTime<Utc>,
) -> Result<Option<Cursor>> {
    let cursors: Vec<String> = sqlx::query_scalar(
        r#"
        select cursor from _sync_obj_runs
        where account_id = $1 and object_name = $2 and status = 'complete'
          and cursor is not null and run_started_at < $3
        "#,
    )
    .bind(account_id)
    .bind(object_name)
    .bind(run_started_at)
    .fetch_all(pool)
    .await
    .context("get_last_cursor_before_run")?;

    let owned: Vec<Cursor> = cursors.into_iter().map(Cursor::new).collect();
    Ok(Cursor::max_across(owned.iter()))
}

/// Closes the run regardless of remaining pending/running children. Used by
/// `process_until_done` at the end of a tick so a run invoked against a
/// partial object list never lingers open waiting on objects nobody asked it
/// to process.
pub async fn close_run_unconditionally(
    pool: &PgPool,
    account_id: &str,
    run_started_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        update _sync_runs
        set closed_at = now()
        where account_id = $1 and started_at = $2 and closed_at is null
        "#,
    )
    .bind(account_id)
    .bind(run_started_at)
    .execute(pool)
    .await
    .context("close_run_unconditionally")?;
    Ok(())
}
