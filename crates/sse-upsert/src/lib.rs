//! Upsert Orchestrator (§4.E): the single entry point every registry kind's
//! `UpsertFn` closure wraps. Given raw Stripe payloads for one kind, it
//! optionally backfills referenced parents, expands truncated sub-lists,
//! normalizes a handful of kinds, runs the subscription-item side effects,
//! and finally delegates to the gateway's timestamp-protected write.
//!
//! Deliberately free of `sse-registry`'s `ListFn`/closure plumbing beyond the
//! `UpsertArgs` shape it reuses — the closures that turn these plain
//! `async fn`s into `sse_registry::UpsertFn`s are assembled in
//! `sse-backfill`'s registry wiring, not here.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;

use sse_db::gateway::{upsert_child_rows, upsert_object_rows, ObjectRow};
use sse_registry::UpsertArgs;

mod list_expansion;
mod parent_backfill;
mod subscriptions;

pub use subscriptions::upsert_subscriptions;

/// Shared handle every per-kind upsert function closes over: the pool, the
/// Stripe client used for parent-backfill retrieves and list expansion,
/// whether list expansion runs at all (an engine-level toggle, not a
/// per-call one — §4.E's "opt-in via `auto_expand_lists`"), and the retry
/// policy (§7) parent-backfill retrieves run under.
pub struct UpsertEngine {
    pub pool: sqlx::PgPool,
    pub client: stripe::Client,
    pub auto_expand_lists: bool,
    pub retry_policy: sse_stripe::RetryPolicy,
}

impl UpsertEngine {
    pub fn new(
        pool: sqlx::PgPool,
        client: stripe::Client,
        auto_expand_lists: bool,
        retry_policy: sse_stripe::RetryPolicy,
    ) -> Arc<Self> {
        Arc::new(UpsertEngine { pool, client, auto_expand_lists, retry_policy })
    }
}

/// Reads a Stripe expandable reference field: either a bare id string or an
/// expanded object carrying its own `id`.
fn extract_ref(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn object_rows(items: &[Value]) -> Vec<ObjectRow> {
    items
        .iter()
        .filter_map(|v| v.get("id").and_then(Value::as_str).map(|id| ObjectRow { id: id.to_string(), raw: v.clone() }))
        .collect()
}

/// Delegation to the gateway's timestamp-protected write (§4.E item 5) — the
/// tail end of every per-kind upsert function in this crate.
pub async fn upsert_simple(
    engine: &UpsertEngine,
    table: &str,
    items: &[Value],
    account_id: &str,
    sync_timestamp: Option<DateTime<Utc>>,
) -> Result<()> {
    let rows = object_rows(items);
    upsert_object_rows(&engine.pool, table, account_id, &rows, sync_timestamp).await
}

/// Declares a per-kind upsert function with no parent backfill, no list
/// expansion, and no normalization — the common case (products, prices,
/// customers, and the rest of the kinds §4.E names no special handling for).
macro_rules! simple_upsert_fn {
    ($fn_name:ident, $table:literal) => {
        pub async fn $fn_name(engine: Arc<UpsertEngine>, args: UpsertArgs) -> Result<()> {
            upsert_simple(&engine, $table, &args.items, &args.account_id, args.sync_timestamp).await
        }
    };
}

simple_upsert_fn!(upsert_products, "products");
simple_upsert_fn!(upsert_prices, "prices");
simple_upsert_fn!(upsert_plans, "plans");
simple_upsert_fn!(upsert_customers, "customers");
simple_upsert_fn!(upsert_subscription_schedules, "subscription_schedules");
simple_upsert_fn!(upsert_setup_intents, "setup_intents");
simple_upsert_fn!(upsert_payment_methods, "payment_methods");
simple_upsert_fn!(upsert_payment_intents, "payment_intents");
simple_upsert_fn!(upsert_tax_ids, "tax_ids");
simple_upsert_fn!(upsert_disputes, "disputes");
simple_upsert_fn!(upsert_early_fraud_warnings, "early_fraud_warnings");
simple_upsert_fn!(upsert_refunds, "refunds");
simple_upsert_fn!(
    upsert_subscription_item_change_events,
    "subscription_item_change_events_v2_beta"
);

/// `exchange_rates_from_usd` is keyed by `currency`, not `id` — Sigma rows
/// for this table carry no Stripe object id at all, so it cannot go through
/// [`upsert_simple`]'s generic `(id, account_id)` statement.
pub async fn upsert_exchange_rates_from_usd(engine: Arc<UpsertEngine>, args: UpsertArgs) -> Result<()> {
    let sql = r#"
        insert into exchange_rates_from_usd (currency, account_id, raw, last_synced_at)
        values ($1, $2, $3, coalesce($4::timestamptz, now()))
        on conflict (currency, account_id) do update
        set raw = excluded.raw, last_synced_at = excluded.last_synced_at
        where $4::timestamptz is not null
          and ($4::timestamptz > exchange_rates_from_usd.last_synced_at or exchange_rates_from_usd.last_synced_at is null)
    "#;
    for item in &args.items {
        let Some(currency) = item.get("currency").and_then(Value::as_str) else { continue };
        sqlx::query(sql)
            .bind(currency)
            .bind(&args.account_id)
            .bind(item)
            .bind(args.sync_timestamp)
            .execute(&engine.pool)
            .await
            .context("upsert_exchange_rates_from_usd")?;
    }
    Ok(())
}

pub async fn upsert_invoices(engine: Arc<UpsertEngine>, args: UpsertArgs) -> Result<()> {
    if args.backfill_related {
        parent_backfill::backfill(
            &engine,
            &args.items,
            &args.account_id,
            &[("customer", "customers", "customer")],
        )
        .await?;
    }

    let mut items = args.items;
    if engine.auto_expand_lists {
        for item in items.iter_mut() {
            list_expansion::expand_invoice_lines(&engine, item).await?;
        }
    }

    upsert_simple(&engine, "invoices", &items, &args.account_id, args.sync_timestamp).await
}

pub async fn upsert_credit_notes(engine: Arc<UpsertEngine>, args: UpsertArgs) -> Result<()> {
    let mut items = args.items;
    if engine.auto_expand_lists {
        for item in items.iter_mut() {
            list_expansion::expand_credit_note_lines(&engine, item).await?;
        }
    }

    upsert_simple(&engine, "credit_notes", &items, &args.account_id, args.sync_timestamp).await
}

pub async fn upsert_charges(engine: Arc<UpsertEngine>, args: UpsertArgs) -> Result<()> {
    if args.backfill_related {
        parent_backfill::backfill(
            &engine,
            &args.items,
            &args.account_id,
            &[("customer", "customers", "customer"), ("invoice", "invoices", "invoice")],
        )
        .await?;
    }

    let mut items = args.items;
    if engine.auto_expand_lists {
        for item in items.iter_mut() {
            list_expansion::expand_charge_refunds(&engine, item).await?;
        }
    }

    upsert_simple(&engine, "charges", &items, &args.account_id, args.sync_timestamp).await
}

/// Checkout sessions: parent backfill for customer/subscription/payment
/// intent/invoice, then the line-item normalization named in §4.E item 3
/// (flatten `price`, attach the owning session id) into the
/// `checkout_session_line_items` child table.
pub async fn upsert_checkout_sessions(engine: Arc<UpsertEngine>, args: UpsertArgs) -> Result<()> {
    if args.backfill_related {
        parent_backfill::backfill(
            &engine,
            &args.items,
            &args.account_id,
            &[
                ("customer", "customers", "customer"),
                ("subscription", "subscriptions", "subscription"),
                ("payment_intent", "payment_intents", "payment_intent"),
                ("invoice", "invoices", "invoice"),
            ],
        )
        .await?;
    }

    let mut child_rows: Vec<(String, ObjectRow)> = Vec::new();
    for item in &args.items {
        let Some(session_id) = item.get("id").and_then(Value::as_str) else { continue };
        let Some(line_items) = item.get("line_items").and_then(|l| l.get("data")).and_then(Value::as_array) else {
            continue;
        };
        for line in line_items {
            let mut normalized = line.clone();
            if let Some(price_id) = extract_ref(line, "price") {
                normalized["price"] = Value::String(price_id);
            }
            if let Some(id) = normalized.get("id").and_then(Value::as_str).map(str::to_string) {
                child_rows.push((session_id.to_string(), ObjectRow { id, raw: normalized }));
            }
        }
    }
    if !child_rows.is_empty() {
        upsert_child_rows(
            &engine.pool,
            "checkout_session_line_items",
            "checkout_session_id",
            &args.account_id,
            &child_rows,
            args.sync_timestamp,
        )
        .await?;
    }

    upsert_simple(&engine, "checkout_sessions", &args.items, &args.account_id, args.sync_timestamp).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_ref_reads_plain_string() {
        let value = json!({ "subscription": "sub_1" });
        assert_eq!(extract_ref(&value, "subscription"), Some("sub_1".to_string()));
    }

    #[test]
    fn extract_ref_reads_expanded_object() {
        let value = json!({ "subscription": { "id": "sub_1", "object": "subscription" } });
        assert_eq!(extract_ref(&value, "subscription"), Some("sub_1".to_string()));
    }

    #[test]
    fn extract_ref_none_when_absent_or_null() {
        assert_eq!(extract_ref(&json!({}), "subscription"), None);
        assert_eq!(extract_ref(&json!({ "subscription": null }), "subscription"), None);
    }

    #[test]
    fn object_rows_skips_items_without_id() {
        let items = vec![json!({ "id": "prod_1" }), json!({ "name": "no id here" })];
        let rows = object_rows(&items);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "prod_1");
    }
}
