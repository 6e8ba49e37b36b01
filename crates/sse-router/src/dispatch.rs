//! Static event-type dispatch table (§4.C step 3) and per-handler logic:
//! re-fetch, deletion, the entitlement-summary compare-and-replace, and
//! delegation to the Upsert Orchestrator.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use stripe::{Event, EventType};

use sse_db::gateway::ObjectRow;
use sse_registry::UpsertArgs;

use crate::{refetch, RouterEngine};

enum Action {
    Upsert { kind: &'static str },
    Delete { table: &'static str },
    EntitlementSummary,
    Ignored,
}

/// Groups event types by the registry kind (or special action) they feed.
/// Unknown/unhandled event types fall through to `Ignored` — logged, not an
/// error, per §4.C step 3.
fn classify(event_type: EventType) -> Action {
    use EventType::*;
    match event_type {
        ProductCreated | ProductUpdated => Action::Upsert { kind: "product" },
        ProductDeleted => Action::Delete { table: "products" },

        PriceCreated | PriceUpdated => Action::Upsert { kind: "price" },
        PriceDeleted => Action::Delete { table: "prices" },

        PlanCreated | PlanUpdated => Action::Upsert { kind: "plan" },
        PlanDeleted => Action::Delete { table: "plans" },

        CustomerCreated | CustomerUpdated => Action::Upsert { kind: "customer" },
        CustomerDeleted => Action::Delete { table: "customers" },

        CustomerTaxIdCreated | CustomerTaxIdUpdated => Action::Upsert { kind: "tax_id" },
        CustomerTaxIdDeleted => Action::Delete { table: "tax_ids" },

        // Subscription cancellation has no dedicated deletion event; the
        // `status = canceled` payload is stored via the normal upsert path.
        CustomerSubscriptionCreated | CustomerSubscriptionUpdated | CustomerSubscriptionDeleted => {
            Action::Upsert { kind: "subscription" }
        }

        CustomerSubscriptionScheduleCreated
        | CustomerSubscriptionScheduleUpdated
        | CustomerSubscriptionScheduleCanceled
        | CustomerSubscriptionScheduleReleased => Action::Upsert { kind: "subscription_schedules" },

        InvoiceCreated | InvoiceUpdated | InvoiceFinalized | InvoicePaymentSucceeded | InvoicePaymentFailed => {
            Action::Upsert { kind: "invoice" }
        }

        ChargeSucceeded | ChargeUpdated | ChargeFailed | ChargeRefunded => Action::Upsert { kind: "charge" },

        SetupIntentCreated | SetupIntentSucceeded => Action::Upsert { kind: "setup_intent" },

        PaymentMethodAttached | PaymentMethodUpdated => Action::Upsert { kind: "payment_method" },

        PaymentIntentCreated | PaymentIntentSucceeded | PaymentIntentPaymentFailed | PaymentIntentCanceled => {
            Action::Upsert { kind: "payment_intent" }
        }

        CreditNoteCreated | CreditNoteUpdated => Action::Upsert { kind: "credit_note" },

        ChargeDisputeCreated | ChargeDisputeUpdated | ChargeDisputeClosed => Action::Upsert { kind: "dispute" },

        RadarEarlyFraudWarningCreated => Action::Upsert { kind: "early_fraud_warning" },

        RefundCreated | RefundUpdated => Action::Upsert { kind: "refund" },

        CheckoutSessionCompleted | CheckoutSessionExpired => Action::Upsert { kind: "checkout_sessions" },

        EntitlementsActiveEntitlementSummaryUpdated => Action::EntitlementSummary,

        _ => Action::Ignored,
    }
}

pub async fn dispatch(engine: &RouterEngine, account_id: &str, event: &Event) -> Result<()> {
    match classify(event.type_) {
        Action::Ignored => {
            tracing::debug!(event_type = ?event.type_, event_id = %event.id, "unhandled stripe event type, ignoring");
            Ok(())
        }
        Action::Delete { table } => {
            let object = serde_json::to_value(&event.data.object).context("serialize event object")?;
            let id = object
                .get("id")
                .and_then(Value::as_str)
                .context("deletion event object missing id")?;
            sse_db::delete_by_id(&engine.pool, table, account_id, id).await
        }
        Action::EntitlementSummary => {
            let object = serde_json::to_value(&event.data.object).context("serialize event object")?;
            apply_entitlement_summary(engine, account_id, &object).await
        }
        Action::Upsert { kind } => {
            let object = serde_json::to_value(&event.data.object).context("serialize event object")?;
            handle_upsert(engine, account_id, kind, event.created, object).await
        }
    }
}

/// Re-fetches via Stripe when the engine is configured to revalidate this
/// kind and the payload is not already terminal, then delegates to the
/// matching `sse-upsert` function. The sync timestamp is `now()` when
/// re-fetched, else the event's own `created` timestamp (§4.C "Re-fetch
/// policy").
async fn handle_upsert(
    engine: &RouterEngine,
    account_id: &str,
    kind: &'static str,
    event_created: stripe::Timestamp,
    mut object: Value,
) -> Result<()> {
    let mut sync_timestamp: Option<DateTime<Utc>> = Utc.timestamp_opt(event_created, 0).single();

    if refetch::should_refetch(kind, &object, &engine.revalidate_via_api) {
        if let Some(id) = object.get("id").and_then(Value::as_str).map(str::to_string) {
            match sse_stripe::objects::retrieve(&engine.client, kind, &id, &engine.upsert_engine.retry_policy).await {
                Ok(fresh) => {
                    object = fresh;
                    sync_timestamp = Some(Utc::now());
                }
                Err(err) => {
                    let is_missing = err
                        .downcast_ref::<stripe::StripeError>()
                        .map(sse_stripe::is_resource_missing)
                        .unwrap_or(false);
                    if is_missing {
                        let table = sse_registry::table_name_for(kind);
                        sse_db::delete_by_id(&engine.pool, table, account_id, &id).await?;
                        return Ok(());
                    }
                    return Err(err).context("re-fetch during webhook handling failed");
                }
            }
        }
    }

    let args = UpsertArgs {
        items: vec![object],
        account_id: account_id.to_string(),
        backfill_related: true,
        sync_timestamp,
    };

    let upsert_engine = engine.upsert_engine.clone();
    match kind {
        "product" => sse_upsert::upsert_products(upsert_engine, args).await,
        "price" => sse_upsert::upsert_prices(upsert_engine, args).await,
        "plan" => sse_upsert::upsert_plans(upsert_engine, args).await,
        "customer" => sse_upsert::upsert_customers(upsert_engine, args).await,
        "subscription" => sse_upsert::upsert_subscriptions(upsert_engine, args).await,
        "subscription_schedules" => sse_upsert::upsert_subscription_schedules(upsert_engine, args).await,
        "invoice" => sse_upsert::upsert_invoices(upsert_engine, args).await,
        "charge" => sse_upsert::upsert_charges(upsert_engine, args).await,
        "setup_intent" => sse_upsert::upsert_setup_intents(upsert_engine, args).await,
        "payment_method" => sse_upsert::upsert_payment_methods(upsert_engine, args).await,
        "payment_intent" => sse_upsert::upsert_payment_intents(upsert_engine, args).await,
        "tax_id" => sse_upsert::upsert_tax_ids(upsert_engine, args).await,
        "credit_note" => sse_upsert::upsert_credit_notes(upsert_engine, args).await,
        "dispute" => sse_upsert::upsert_disputes(upsert_engine, args).await,
        "early_fraud_warning" => sse_upsert::upsert_early_fraud_warnings(upsert_engine, args).await,
        "refund" => sse_upsert::upsert_refunds(upsert_engine, args).await,
        "checkout_sessions" => sse_upsert::upsert_checkout_sessions(upsert_engine, args).await,
        other => anyhow::bail!("sse-router: no upsert wired for kind {other:?}"),
    }
}

/// Compare-and-replace at the customer level (§4.C "Entitlement summary"):
/// deletes stored entitlement rows for this customer absent from the new
/// set, then upserts the new set. Public so it can be exercised directly
/// without constructing a full signed webhook event.
pub async fn apply_entitlement_summary(engine: &RouterEngine, account_id: &str, object: &Value) -> Result<()> {
    let customer_id = object
        .get("customer")
        .and_then(Value::as_str)
        .context("entitlement summary event missing customer")?;

    let new_items: Vec<Value> = object
        .get("entitlements")
        .and_then(|e| e.get("data"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let new_ids: HashSet<String> = new_items
        .iter()
        .filter_map(|v| v.get("id").and_then(Value::as_str).map(str::to_string))
        .collect();

    let existing_ids: Vec<String> =
        sqlx::query_scalar("select id from entitlements where customer_id = $1 and account_id = $2")
            .bind(customer_id)
            .bind(account_id)
            .fetch_all(&engine.pool)
            .await
            .context("fetch existing entitlement ids")?;

    for id in existing_ids {
        if !new_ids.contains(&id) {
            sse_db::delete_by_id(&engine.pool, "entitlements", account_id, &id).await?;
        }
    }

    let rows: Vec<(String, ObjectRow)> = new_items
        .iter()
        .filter_map(|v| {
            v.get("id")
                .and_then(Value::as_str)
                .map(|id| (customer_id.to_string(), ObjectRow { id: id.to_string(), raw: v.clone() }))
        })
        .collect();

    if !rows.is_empty() {
        sse_db::upsert_child_rows(&engine.pool, "entitlements", "customer_id", account_id, &rows, Some(Utc::now()))
            .await?;
    }
    Ok(())
}
