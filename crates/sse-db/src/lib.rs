use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub mod error;
pub mod gateway;
pub mod queue;
pub mod runs;

pub use error::{is_exclusion_violation, is_unique_violation};
pub use gateway::{
    delete_by_id, find_missing_ids, lock_key_for, upsert_child_rows, upsert_many_unconditional,
    upsert_object_rows, with_lock, AdvisoryLockGuard, ObjectRow,
};
pub use queue::{claim_batch, delete_message, enqueue, enqueue_many, QueuedMessage};
pub use runs::{
    cancel_stale_runs, close_run_unconditionally, complete_object_sync, create_object_runs,
    fail_object_sync, get_active_sync_run, get_last_completed_cursor, get_last_cursor_before_run,
    get_object_run, get_or_create_sync_run, increment_object_progress, try_start_object_sync,
    update_object_cursor, update_object_page_cursor,
};

pub const ENV_DB_URL: &str = "SSE_DATABASE_URL";

/// Connect to Postgres using `SSE_DATABASE_URL`, with `max_connections` and
/// `keep_alive` taken from the engine configuration (§6's "DB pool" option).
pub async fn connect(database_url: &str, max_connections: u32, keep_alive: bool) -> Result<PgPool> {
    let mut options = PgPoolOptions::new().max_connections(max_connections);
    if keep_alive {
        options = options.test_before_acquire(true);
    }
    options
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url, 10, true).await
}

/// Runs the embedded SQLx migrations that define the destination schema.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_accounts_table: bool,
}

pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1 from information_schema.tables
            where table_schema = 'public' and table_name = 'accounts'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_accounts_table: exists,
    })
}
