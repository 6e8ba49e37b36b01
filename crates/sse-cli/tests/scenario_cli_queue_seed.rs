//! `sse-cli queue seed` exercised against a real binary invocation via
//! `assert_cmd`. Skipped when no database is configured, local + CI friendly.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[tokio::test]
async fn queue_seed_reports_the_full_registry_count() -> anyhow::Result<()> {
    let db_url = match std::env::var(sse_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: {} not set", sse_db::ENV_DB_URL);
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new().max_connections(2).connect(&db_url).await?;
    sse_db::migrate(&pool).await?;

    let mut cmd = Command::cargo_bin("sse-cli")?;
    cmd.env(sse_db::ENV_DB_URL, &db_url)
        .env("STRIPE_SECRET_KEY", "sk_test_scenario_cli_queue_seed")
        .args(["queue", "seed"]);

    cmd.assert().success().stdout(predicate::str::contains("queue_seeded=true"));

    Ok(())
}
