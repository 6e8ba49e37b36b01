//! `sse-cli backfill run` — drains one object, or every registry object in
//! dependency order, to completion via the Backfill Controller: bootstrap,
//! resolve the account, print a handful of `key=value` result lines, and
//! delegate the actual work to `sse_backfill::process_until_done`.

use anyhow::Result;

use crate::context::CliContext;

pub async fn run(object: Option<String>, account: Option<String>) -> Result<()> {
    let ctx = CliContext::bootstrap().await?;
    let account_id = ctx.resolve_account(account).await?;

    let registry = ctx.registry();
    let backfill = sse_backfill::BackfillEngine::new(
        ctx.pool.clone(),
        ctx.client.clone(),
        registry,
        sse_schemas::DEFAULT_MAX_CONCURRENT_OBJECT_RUNS,
        ctx.config.max_concurrent_customers,
        ctx.config.backfill_related_entities,
        ctx.config.enable_sigma,
        None,
    );

    let object_vec: Option<Vec<&str>> = object.as_deref().map(|s| vec![s]);
    sse_backfill::process_until_done(&backfill, &account_id, object_vec.as_deref()).await?;

    println!("account_id={account_id}");
    println!("backfill_complete=true");
    if let Some(name) = object {
        println!("object={name}");
    } else {
        println!("object=all");
    }
    Ok(())
}
