//! Side effects unique to subscriptions (§4.E item 4): after writing a
//! subscription, its items are written to `subscription_items`, and any item
//! present in the store but absent from the new payload is soft-deleted by
//! patching `deleted: true` into its stored JSON rather than removed.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use sqlx::Row;

use sse_db::gateway::{upsert_child_rows, ObjectRow};
use sse_registry::UpsertArgs;

use crate::{extract_ref, list_expansion, parent_backfill, upsert_simple, UpsertEngine};

/// Flattens `price` to a string id; coerces missing `deleted`/`quantity` to
/// `false`/`null` so every stored item row has both keys present.
fn normalize_subscription_item(raw: &Value) -> Value {
    let mut item = raw.clone();
    if let Some(price_id) = extract_ref(raw, "price") {
        item["price"] = Value::String(price_id);
    }
    if item.get("deleted").is_none() {
        item["deleted"] = Value::Bool(false);
    }
    if item.get("quantity").is_none() {
        item["quantity"] = Value::Null;
    }
    item
}

pub async fn upsert_subscriptions(engine: Arc<UpsertEngine>, args: UpsertArgs) -> Result<()> {
    if args.backfill_related {
        parent_backfill::backfill(
            &engine,
            &args.items,
            &args.account_id,
            &[("customer", "customers", "customer")],
        )
        .await?;
    }

    for item in &args.items {
        let Some(subscription_id) = item.get("id").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };

        let mut item = item.clone();
        if engine.auto_expand_lists {
            let client = engine.client.clone();
            let sub_id = subscription_id.clone();
            list_expansion::expand(&mut item, "items", move |starting_after, limit| {
                let client = client.clone();
                let sub_id = sub_id.clone();
                Box::pin(async move {
                    sse_stripe::objects::list_subscription_items_for_subscription(&client, &sub_id, starting_after, limit)
                        .await
                })
            })
            .await?;
        }

        let raw_items: Vec<Value> = item
            .get("items")
            .and_then(|l| l.get("data"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let normalized: Vec<(String, Value)> = raw_items
            .iter()
            .map(normalize_subscription_item)
            .filter_map(|normalized| {
                normalized
                    .get("id")
                    .and_then(Value::as_str)
                    .map(|id| (id.to_string(), normalized))
            })
            .collect();

        let incoming_ids: HashSet<&str> = normalized.iter().map(|(id, _)| id.as_str()).collect();

        let child_rows: Vec<(String, ObjectRow)> = normalized
            .iter()
            .map(|(id, raw)| (subscription_id.clone(), ObjectRow { id: id.clone(), raw: raw.clone() }))
            .collect();

        if !child_rows.is_empty() {
            upsert_child_rows(
                &engine.pool,
                "subscription_items",
                "subscription_id",
                &args.account_id,
                &child_rows,
                args.sync_timestamp,
            )
            .await?;
        }

        soft_delete_removed_items(&engine, &args.account_id, &subscription_id, &incoming_ids).await?;
    }

    upsert_simple(&engine, "subscriptions", &args.items, &args.account_id, args.sync_timestamp).await
}

async fn soft_delete_removed_items(
    engine: &UpsertEngine,
    account_id: &str,
    subscription_id: &str,
    incoming_ids: &HashSet<&str>,
) -> Result<()> {
    let rows = sqlx::query("select id, raw from subscription_items where subscription_id = $1 and account_id = $2")
        .bind(subscription_id)
        .bind(account_id)
        .fetch_all(&engine.pool)
        .await
        .context("soft_delete_removed_items: fetch existing items")?;

    for row in rows {
        let id: String = row.try_get("id").context("decode subscription_items.id")?;
        if incoming_ids.contains(id.as_str()) {
            continue;
        }
        let mut raw: Value = row.try_get("raw").context("decode subscription_items.raw")?;
        if raw.get("deleted").and_then(Value::as_bool) == Some(true) {
            continue;
        }
        raw["deleted"] = Value::Bool(true);
        upsert_child_rows(
            &engine.pool,
            "subscription_items",
            "subscription_id",
            account_id,
            &[(subscription_id.to_string(), ObjectRow { id, raw })],
            Some(Utc::now()),
        )
        .await
        .context("soft_delete_removed_items: patch deleted")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_flattens_price_and_fills_defaults() {
        let raw = json!({ "id": "si_1", "price": { "id": "price_1", "object": "price" } });
        let normalized = normalize_subscription_item(&raw);
        assert_eq!(normalized["price"], "price_1");
        assert_eq!(normalized["deleted"], false);
        assert_eq!(normalized["quantity"], Value::Null);
    }

    #[test]
    fn normalize_preserves_present_fields() {
        let raw = json!({ "id": "si_1", "price": "price_1", "deleted": true, "quantity": 3 });
        let normalized = normalize_subscription_item(&raw);
        assert_eq!(normalized["deleted"], true);
        assert_eq!(normalized["quantity"], 3);
    }
}
