//! Managed Webhook Reconciler (§4.G): ensures exactly one enabled Stripe
//! webhook endpoint exists per `(account, target url)`, reconciling the
//! mirror row against Stripe's own state under an advisory lock so two
//! concurrent callers for the same account/url never race each other into
//! creating duplicate endpoints.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{PgConnection, Row};
use stripe::{Client, EventType, WebhookEndpoint};

use sse_db::with_lock;

/// Mirror row shape as read back after create/reuse.
#[derive(Debug, Clone)]
pub struct ManagedWebhook {
    pub id: String,
    pub account_id: String,
    pub url: String,
    pub signing_secret: String,
    pub enabled_events: Vec<String>,
    pub status: String,
}

/// The event types `sse-router::dispatch::classify` handles — the set a
/// newly provisioned managed endpoint should be enabled for. Kept here,
/// next to endpoint creation, rather than in `sse-router` since that crate's
/// dispatch table works from events already delivered and has no reason to
/// also know the provisioning-time list.
pub const DEFAULT_ENABLED_EVENTS: &[EventType] = &[
    EventType::ProductCreated,
    EventType::ProductUpdated,
    EventType::ProductDeleted,
    EventType::PriceCreated,
    EventType::PriceUpdated,
    EventType::PriceDeleted,
    EventType::PlanCreated,
    EventType::PlanUpdated,
    EventType::PlanDeleted,
    EventType::CustomerCreated,
    EventType::CustomerUpdated,
    EventType::CustomerDeleted,
    EventType::CustomerTaxIdCreated,
    EventType::CustomerTaxIdUpdated,
    EventType::CustomerTaxIdDeleted,
    EventType::CustomerSubscriptionCreated,
    EventType::CustomerSubscriptionUpdated,
    EventType::CustomerSubscriptionDeleted,
    EventType::CustomerSubscriptionScheduleCreated,
    EventType::CustomerSubscriptionScheduleUpdated,
    EventType::CustomerSubscriptionScheduleCanceled,
    EventType::CustomerSubscriptionScheduleReleased,
    EventType::InvoiceCreated,
    EventType::InvoiceUpdated,
    EventType::InvoiceFinalized,
    EventType::InvoicePaymentSucceeded,
    EventType::InvoicePaymentFailed,
    EventType::ChargeSucceeded,
    EventType::ChargeUpdated,
    EventType::ChargeFailed,
    EventType::ChargeRefunded,
    EventType::SetupIntentCreated,
    EventType::SetupIntentSucceeded,
    EventType::PaymentMethodAttached,
    EventType::PaymentMethodUpdated,
    EventType::PaymentIntentCreated,
    EventType::PaymentIntentSucceeded,
    EventType::PaymentIntentPaymentFailed,
    EventType::PaymentIntentCanceled,
    EventType::CreditNoteCreated,
    EventType::CreditNoteUpdated,
    EventType::ChargeDisputeCreated,
    EventType::ChargeDisputeUpdated,
    EventType::ChargeDisputeClosed,
    EventType::RadarEarlyFraudWarningCreated,
    EventType::RefundCreated,
    EventType::RefundUpdated,
    EventType::CheckoutSessionCompleted,
    EventType::CheckoutSessionExpired,
    EventType::EntitlementsActiveEntitlementSummaryUpdated,
];

fn lock_key(account_id: &str, url: &str) -> String {
    format!("webhook:{account_id}:{url}")
}

async fn mirror_row_for_url(conn: &mut PgConnection, account_id: &str, url: &str) -> Result<Option<ManagedWebhook>> {
    let row = sqlx::query(
        "select id, account_id, url, signing_secret, enabled_events, status from managed_webhooks \
         where account_id = $1 and url = $2",
    )
    .bind(account_id)
    .bind(url)
    .fetch_optional(&mut *conn)
    .await
    .context("mirror_row_for_url")?;

    row.map(|r| {
        Ok(ManagedWebhook {
            id: r.try_get("id")?,
            account_id: r.try_get("account_id")?,
            url: r.try_get("url")?,
            signing_secret: r.try_get("signing_secret")?,
            enabled_events: r.try_get("enabled_events")?,
            status: r.try_get("status")?,
        })
    })
    .transpose()
}

async fn delete_mirror_row(conn: &mut PgConnection, account_id: &str, endpoint_id: &str) -> Result<()> {
    sqlx::query("delete from managed_webhooks where account_id = $1 and id = $2")
        .bind(account_id)
        .bind(endpoint_id)
        .execute(&mut *conn)
        .await
        .context("delete_mirror_row")?;
    Ok(())
}

/// Best-effort: purges every mirror row for this account whose url differs
/// from the target, deleting the Stripe endpoint first on a best-effort
/// basis (a failure there is logged, not propagated — the mirror row is
/// still dropped so a stale row never blocks reconciliation).
async fn purge_stale_urls(client: &Client, conn: &mut PgConnection, account_id: &str, target_url: &str) -> Result<()> {
    let rows = sqlx::query("select id from managed_webhooks where account_id = $1 and url <> $2")
        .bind(account_id)
        .bind(target_url)
        .fetch_all(&mut *conn)
        .await
        .context("purge_stale_urls: list")?;

    for row in rows {
        let endpoint_id: String = row.try_get("id")?;
        if let Err(err) = sse_stripe::webhook_endpoints::delete(client, &endpoint_id).await {
            tracing::warn!(account_id, endpoint_id, error = %err, "best-effort delete of stale webhook endpoint failed");
        }
        delete_mirror_row(conn, account_id, &endpoint_id).await?;
    }
    Ok(())
}

/// Deletes every Stripe endpoint identified as managed by this engine
/// (`sse_stripe::webhook_endpoints::is_managed`) that is not the endpoint
/// currently mirrored for this account — orphans left behind by a crash
/// between create and mirror-insert, or by a deployment that changed urls
/// without going through this reconciler.
async fn delete_orphaned_managed_endpoints(client: &Client, mirrored_id: Option<&str>, account_id: &str) -> Result<()> {
    let endpoints = sse_stripe::webhook_endpoints::list_all(client).await.context("list stripe webhook endpoints")?;
    for endpoint in endpoints {
        if !sse_stripe::webhook_endpoints::is_managed(&endpoint) {
            continue;
        }
        if Some(endpoint.id.as_str()) == mirrored_id {
            continue;
        }
        tracing::warn!(account_id, endpoint_id = %endpoint.id, "deleting orphaned managed webhook endpoint");
        if let Err(err) = sse_stripe::webhook_endpoints::delete(client, &endpoint.id).await {
            tracing::warn!(account_id, endpoint_id = %endpoint.id, error = %err, "failed to delete orphaned endpoint");
        }
    }
    Ok(())
}

async fn insert_mirror_row(
    conn: &mut PgConnection,
    account_id: &str,
    endpoint: &WebhookEndpoint,
    signing_secret: &str,
) -> Result<ManagedWebhook> {
    let enabled_events: Vec<String> = endpoint.enabled_events.iter().map(|e| format!("{e:?}")).collect();
    sqlx::query(
        r#"
        insert into managed_webhooks (id, account_id, url, signing_secret, enabled_events, status, created_at)
        values ($1, $2, $3, $4, $5, $6, $7)
        on conflict (account_id, url) do update
        set id = excluded.id,
            signing_secret = excluded.signing_secret,
            enabled_events = excluded.enabled_events,
            status = excluded.status
        "#,
    )
    .bind(endpoint.id.as_str())
    .bind(account_id)
    .bind(&endpoint.url)
    .bind(signing_secret)
    .bind(&enabled_events)
    .bind(&endpoint.status)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await
    .context("insert_mirror_row")?;

    Ok(ManagedWebhook {
        id: endpoint.id.to_string(),
        account_id: account_id.to_string(),
        url: endpoint.url.clone(),
        signing_secret: signing_secret.to_string(),
        enabled_events,
        status: endpoint.status.clone(),
    })
}

/// Ensures exactly one enabled Stripe webhook endpoint exists for
/// `(account_id, url)`, reconciling mirror-vs-Stripe drift per §4.G's four
/// numbered steps. Always runs under `with_lock("webhook:<account>:<url>")`.
pub async fn find_or_create_managed_webhook(
    pool: &sqlx::PgPool,
    client: &Client,
    account_id: &str,
    url: &str,
    default_enabled_events: &[EventType],
    engine_version: &str,
) -> Result<ManagedWebhook> {
    with_lock(pool, &lock_key(account_id, url), |conn| async move {
        // 1. Reuse an existing mirror row for this exact url, if Stripe still
        // agrees it is enabled.
        if let Some(mirror) = mirror_row_for_url(conn, account_id, url).await? {
            match sse_stripe::webhook_endpoints::retrieve(client, &mirror.id).await {
                Ok(endpoint) if endpoint.status == "enabled" => return Ok(mirror),
                Ok(_disabled) => {
                    let _ = sse_stripe::webhook_endpoints::delete(client, &mirror.id).await;
                    delete_mirror_row(conn, account_id, &mirror.id).await?;
                }
                Err(err) if is_resource_missing(&err) => {
                    delete_mirror_row(conn, account_id, &mirror.id).await?;
                }
                Err(err) => return Err(err).context("retrieve mirrored webhook endpoint from stripe"),
            }
        }

        // 2. Purge any mirror rows left over from a different target url.
        purge_stale_urls(client, conn, account_id, url).await?;

        // 3. Sweep Stripe for orphaned endpoints this engine manages but no
        // longer mirrors (nothing is mirrored for this url at this point).
        delete_orphaned_managed_endpoints(client, None, account_id).await?;

        // 4. Create the endpoint and mirror it.
        let endpoint = sse_stripe::webhook_endpoints::create(client, url, default_enabled_events, engine_version)
            .await
            .context("create managed webhook endpoint")?;
        let signing_secret = endpoint
            .secret
            .clone()
            .context("stripe did not return a signing secret on endpoint create")?;
        insert_mirror_row(conn, account_id, &endpoint, &signing_secret).await
    })
    .await
}

fn is_resource_missing(err: &anyhow::Error) -> bool {
    err.downcast_ref::<stripe::StripeError>()
        .map(sse_stripe::is_resource_missing)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_scoped_to_account_and_url() {
        assert_eq!(lock_key("acct_1", "https://a"), "webhook:acct_1:https://a");
        assert_ne!(lock_key("acct_1", "https://a"), lock_key("acct_2", "https://a"));
    }
}
