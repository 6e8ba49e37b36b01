//! `sse-cli webhook reconcile` — drives the Managed Webhook Reconciler
//! (`sse-webhook-reconcile::find_or_create_managed_webhook`) for one account
//! and target url, under the same advisory lock a running daemon would use,
//! so an operator can provision or repair a managed endpoint out of band.

use anyhow::Result;

use crate::context::CliContext;

pub async fn reconcile(url: String, account: Option<String>) -> Result<()> {
    let ctx = CliContext::bootstrap().await?;
    let account_id = ctx.resolve_account(account).await?;

    let mirror = sse_webhook_reconcile::find_or_create_managed_webhook(
        &ctx.pool,
        &ctx.client,
        &account_id,
        &url,
        sse_webhook_reconcile::DEFAULT_ENABLED_EVENTS,
        env!("CARGO_PKG_VERSION"),
    )
    .await?;

    println!("account_id={account_id}");
    println!("endpoint_id={}", mirror.id);
    println!("url={}", mirror.url);
    println!("status={}", mirror.status);
    Ok(())
}
