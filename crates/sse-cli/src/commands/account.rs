//! `sse-cli account delete` — the operator-facing entry point to the Account
//! Lifecycle's dangerous cascade delete. Prints a per-table row count report
//! always; only executes the delete when `--dry-run` is absent.

use anyhow::Result;

use crate::context::CliContext;

pub async fn delete(account: String, dry_run: bool, no_transaction: bool) -> Result<()> {
    let ctx = CliContext::bootstrap().await?;
    let registry = ctx.registry();

    let report =
        sse_account::dangerously_delete_account(&ctx.pool, &registry, &account, dry_run, !no_transaction).await?;

    for count in &report.counts {
        println!("table={} rows={}", count.table, count.rows);
    }
    println!("executed={}", report.executed);
    Ok(())
}
