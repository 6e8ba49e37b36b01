//! `sse-cli queue seed` — enqueues every registry object name into
//! `_worker_queue`, the same seed-when-empty behavior `sse-daemon`'s worker
//! tick loop runs automatically, exposed here so an operator can force a full
//! re-sweep without waiting for the queue to drain first.

use anyhow::Result;

use crate::context::CliContext;

pub async fn seed() -> Result<()> {
    let ctx = CliContext::bootstrap().await?;
    let registry = ctx.registry();
    let names = registry.names_in_order();

    sse_db::queue::enqueue_many(&ctx.pool, &names).await?;

    println!("queue_seeded=true");
    println!("object_count={}", names.len());
    Ok(())
}
