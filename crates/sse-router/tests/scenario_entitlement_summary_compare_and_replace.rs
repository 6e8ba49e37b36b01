use serde_json::json;
use sqlx::Row;
use stripe::Client;

use sse_router::dispatch::apply_entitlement_summary;
use sse_router::RouterEngine;
use sse_upsert::UpsertEngine;

fn test_engine(pool: sqlx::PgPool) -> RouterEngine {
    RouterEngine {
        client: Client::new("sk_test_unused"),
        upsert_engine: UpsertEngine::new(
            pool.clone(),
            Client::new("sk_test_unused"),
            false,
            sse_stripe::RetryPolicy::default(),
        ),
        pool,
        configured_api_key: "sk_test_unused".to_string(),
        static_signing_secret: None,
        revalidate_via_api: Vec::new(),
    }
}

async fn stored_entitlement_ids(pool: &sqlx::PgPool, customer_id: &str, account_id: &str) -> Vec<String> {
    let rows = sqlx::query("select id from entitlements where customer_id = $1 and account_id = $2")
        .bind(customer_id)
        .bind(account_id)
        .fetch_all(pool)
        .await
        .expect("fetch entitlements");
    rows.into_iter().map(|row| row.try_get("id").unwrap()).collect()
}

#[tokio::test]
async fn entitlement_dropped_from_summary_is_deleted_not_soft_deleted() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let account_id = sse_testkit::unique_account_id("acct_entitlements");
    sse_testkit::fixtures::account(&pool, &account_id).await.expect("seed account");

    let engine = test_engine(pool.clone());

    let first_summary = json!({
        "customer": "cus_1",
        "entitlements": {
            "data": [
                { "id": "ent_1", "feature": "feat_a" },
                { "id": "ent_2", "feature": "feat_b" },
            ],
        },
    });
    apply_entitlement_summary(&engine, &account_id, &first_summary).await.expect("first summary");

    let mut stored = stored_entitlement_ids(&pool, "cus_1", &account_id).await;
    stored.sort();
    assert_eq!(stored, vec!["ent_1".to_string(), "ent_2".to_string()]);

    // ent_2 is absent from the next summary: unlike subscription items, an
    // entitlement summary is a full compare-and-replace, so it must be
    // removed outright rather than flagged deleted.
    let second_summary = json!({
        "customer": "cus_1",
        "entitlements": {
            "data": [
                { "id": "ent_1", "feature": "feat_a" },
                { "id": "ent_3", "feature": "feat_c" },
            ],
        },
    });
    apply_entitlement_summary(&engine, &account_id, &second_summary).await.expect("second summary");

    let mut stored = stored_entitlement_ids(&pool, "cus_1", &account_id).await;
    stored.sort();
    assert_eq!(stored, vec!["ent_1".to_string(), "ent_3".to_string()]);
}

#[tokio::test]
async fn empty_entitlement_set_clears_all_rows_for_customer() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let account_id = sse_testkit::unique_account_id("acct_entitlements_empty");
    sse_testkit::fixtures::account(&pool, &account_id).await.expect("seed account");

    let engine = test_engine(pool.clone());

    let seeded = json!({
        "customer": "cus_2",
        "entitlements": { "data": [ { "id": "ent_9", "feature": "feat_z" } ] },
    });
    apply_entitlement_summary(&engine, &account_id, &seeded).await.expect("seed summary");
    assert_eq!(stored_entitlement_ids(&pool, "cus_2", &account_id).await, vec!["ent_9".to_string()]);

    let cleared = json!({ "customer": "cus_2", "entitlements": { "data": [] } });
    apply_entitlement_summary(&engine, &account_id, &cleared).await.expect("cleared summary");
    assert!(stored_entitlement_ids(&pool, "cus_2", &account_id).await.is_empty());
}
