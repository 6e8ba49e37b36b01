use chrono::{TimeZone, Utc};
use serde_json::json;
use sse_db::gateway::{upsert_object_rows, ObjectRow};

/// Invariant #1, exercised against the literal "concurrent webhook vs backfill"
/// scenario: a webhook carrying `created=1700000500` and a backfill page
/// carrying an older snapshot timestamped `1700000400` race to upsert the
/// same product. The webhook's payload must win regardless of arrival order.
#[tokio::test]
async fn webhook_observation_wins_over_older_backfill_observation() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let account_id = sse_testkit::unique_account_id("acct_concurrency");
    sse_testkit::fixtures::account(&pool, &account_id)
        .await
        .expect("seed account");

    let older_ts = Utc.timestamp_opt(1_700_000_400, 0).unwrap();
    let newer_ts = Utc.timestamp_opt(1_700_000_500, 0).unwrap();

    let webhook_row = ObjectRow {
        id: "prod_1".to_string(),
        raw: json!({ "id": "prod_1", "name": "from webhook" }),
    };
    let backfill_row = ObjectRow {
        id: "prod_1".to_string(),
        raw: json!({ "id": "prod_1", "name": "from backfill" }),
    };

    // Webhook observation (newer) lands first...
    upsert_object_rows(&pool, "products", &account_id, &[webhook_row], Some(newer_ts))
        .await
        .expect("webhook upsert");

    // ...then an older backfill observation arrives late.
    upsert_object_rows(&pool, "products", &account_id, &[backfill_row], Some(older_ts))
        .await
        .expect("backfill upsert");

    let stored: serde_json::Value = sqlx::query_scalar("select raw from products where id = $1 and account_id = $2")
        .bind("prod_1")
        .bind(&account_id)
        .fetch_one(&pool)
        .await
        .expect("fetch stored row");

    assert_eq!(stored["name"], "from webhook");
}

#[tokio::test]
async fn null_sync_timestamp_never_overwrites_on_conflict() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let account_id = sse_testkit::unique_account_id("acct_null_ts");
    sse_testkit::fixtures::account(&pool, &account_id)
        .await
        .expect("seed account");

    let dated = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let row_v1 = ObjectRow {
        id: "prod_2".to_string(),
        raw: json!({ "id": "prod_2", "name": "v1" }),
    };
    let row_v2 = ObjectRow {
        id: "prod_2".to_string(),
        raw: json!({ "id": "prod_2", "name": "v2 (untimestamped)" }),
    };

    upsert_object_rows(&pool, "products", &account_id, &[row_v1], Some(dated))
        .await
        .expect("first upsert");

    // A second upsert with no sync timestamp counts as "older than any
    // timestamp" and must not overwrite the already-dated row.
    upsert_object_rows(&pool, "products", &account_id, &[row_v2], None)
        .await
        .expect("second upsert");

    let stored: serde_json::Value = sqlx::query_scalar("select raw from products where id = $1 and account_id = $2")
        .bind("prod_2")
        .bind(&account_id)
        .fetch_one(&pool)
        .await
        .expect("fetch stored row");

    assert_eq!(stored["name"], "v1");
}
