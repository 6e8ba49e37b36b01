//! Test-only DB pool and fixture builders shared by every crate's
//! `tests/scenario_*.rs`. Mirrors the teacher workspace's own test-database
//! bootstrap (`testkit_db_pool`): connect using the same env var the
//! production binaries use, then apply migrations so tests always run
//! against current schema.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::PgPool;

pub mod fixtures;

/// Connects using `SSE_DATABASE_URL` and ensures migrations are applied.
/// Intended for integration tests only — every test using this must be
/// gated `required-features = ["testkit"]` in its crate's `Cargo.toml`.
pub async fn test_pool() -> Result<PgPool> {
    let pool = sse_db::connect_from_env()
        .await
        .context("sse-testkit: connect_from_env")?;
    sse_db::migrate(&pool).await.context("sse-testkit: migrate")?;
    Ok(pool)
}

/// Generates a unique-enough Stripe-looking account id for test isolation
/// between scenarios sharing one scratch database.
pub fn unique_account_id(prefix: &str) -> String {
    format!("{prefix}_{}", Utc::now().timestamp_nanos_opt().unwrap_or(0))
}
