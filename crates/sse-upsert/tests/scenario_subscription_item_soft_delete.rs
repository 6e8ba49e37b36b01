use std::sync::Arc;

use serde_json::json;
use sqlx::Row;
use stripe::Client;

use sse_registry::UpsertArgs;
use sse_upsert::{upsert_subscriptions, UpsertEngine};

fn test_engine(pool: sqlx::PgPool) -> Arc<UpsertEngine> {
    // Parent backfill and list expansion are both off: this scenario's
    // payloads are already-complete subscription items, so no outbound
    // Stripe call should ever be attempted.
    UpsertEngine::new(pool, Client::new("sk_test_unused"), false, sse_stripe::RetryPolicy::default())
}

async fn stored_item_ids_and_deleted(pool: &sqlx::PgPool, subscription_id: &str, account_id: &str) -> Vec<(String, bool)> {
    let rows = sqlx::query("select id, raw from subscription_items where subscription_id = $1 and account_id = $2")
        .bind(subscription_id)
        .bind(account_id)
        .fetch_all(pool)
        .await
        .expect("fetch subscription_items");
    rows.into_iter()
        .map(|row| {
            let id: String = row.try_get("id").unwrap();
            let raw: serde_json::Value = row.try_get("raw").unwrap();
            (id, raw["deleted"].as_bool().unwrap_or(false))
        })
        .collect()
}

#[tokio::test]
async fn item_dropped_from_payload_is_soft_deleted_not_removed() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let account_id = sse_testkit::unique_account_id("acct_sub_items");
    sse_testkit::fixtures::account(&pool, &account_id).await.expect("seed account");

    let engine = test_engine(pool.clone());

    let first_payload = json!({
        "id": "sub_1",
        "customer": "cus_1",
        "items": {
            "data": [
                { "id": "si_1", "price": "price_1", "quantity": 1 },
                { "id": "si_2", "price": "price_2", "quantity": 2 },
            ],
            "has_more": false,
        },
    });

    upsert_subscriptions(
        engine.clone(),
        UpsertArgs {
            items: vec![first_payload],
            account_id: account_id.clone(),
            backfill_related: false,
            sync_timestamp: Some(sse_testkit::fixtures::sync_timestamp(1_700_000_000)),
        },
    )
    .await
    .expect("first upsert");

    let mut stored = stored_item_ids_and_deleted(&pool, "sub_1", &account_id).await;
    stored.sort();
    assert_eq!(stored, vec![("si_1".to_string(), false), ("si_2".to_string(), false)]);

    // si_2 is dropped from the next payload (e.g. the subscription item was
    // removed). It must stay in the table, now flagged deleted, rather than
    // be deleted outright.
    let second_payload = json!({
        "id": "sub_1",
        "customer": "cus_1",
        "items": {
            "data": [
                { "id": "si_1", "price": "price_1", "quantity": 3 },
            ],
            "has_more": false,
        },
    });

    upsert_subscriptions(
        engine,
        UpsertArgs {
            items: vec![second_payload],
            account_id: account_id.clone(),
            backfill_related: false,
            sync_timestamp: Some(sse_testkit::fixtures::sync_timestamp(1_700_000_100)),
        },
    )
    .await
    .expect("second upsert");

    let mut stored = stored_item_ids_and_deleted(&pool, "sub_1", &account_id).await;
    stored.sort();
    assert_eq!(stored, vec![("si_1".to_string(), false), ("si_2".to_string(), true)]);
}

#[tokio::test]
async fn item_missing_price_and_deleted_fields_gets_normalized_defaults() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let account_id = sse_testkit::unique_account_id("acct_sub_items_norm");
    sse_testkit::fixtures::account(&pool, &account_id).await.expect("seed account");

    let engine = test_engine(pool.clone());

    let payload = json!({
        "id": "sub_2",
        "customer": "cus_2",
        "items": {
            "data": [
                { "id": "si_3", "price": { "id": "price_3", "object": "price" } },
            ],
            "has_more": false,
        },
    });

    upsert_subscriptions(
        engine,
        UpsertArgs {
            items: vec![payload],
            account_id: account_id.clone(),
            backfill_related: false,
            sync_timestamp: Some(sse_testkit::fixtures::sync_timestamp(1_700_000_000)),
        },
    )
    .await
    .expect("upsert");

    let row = sqlx::query("select raw from subscription_items where id = 'si_3' and account_id = $1")
        .bind(&account_id)
        .fetch_one(&pool)
        .await
        .expect("fetch stored item");
    let raw: serde_json::Value = row.try_get("raw").unwrap();
    assert_eq!(raw["price"], "price_3");
    assert_eq!(raw["deleted"], false);
    assert_eq!(raw["quantity"], serde_json::Value::Null);
}
