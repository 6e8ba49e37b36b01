use serde_json::json;
use sqlx::Row;

use sse_account::{get_account_id_by_api_key, hash_api_key, upsert_account};

#[tokio::test]
async fn lookup_finds_account_by_hash_of_either_accumulated_key() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let account_id = sse_testkit::unique_account_id("acct_lookup");

    upsert_account(&pool, &account_id, &json!({ "id": account_id, "object": "account" }), &hash_api_key("sk_test_one"))
        .await
        .expect("first upsert seeds the account");

    assert_eq!(
        get_account_id_by_api_key(&pool, "sk_test_one").await.expect("lookup"),
        Some(account_id.clone())
    );
    assert_eq!(get_account_id_by_api_key(&pool, "sk_test_unknown").await.expect("lookup"), None);

    // A second key rotated onto the same account must accumulate, not replace.
    upsert_account(&pool, &account_id, &json!({ "id": account_id, "object": "account", "rotated": true }), &hash_api_key("sk_test_two"))
        .await
        .expect("second upsert merges the new hash");

    assert_eq!(
        get_account_id_by_api_key(&pool, "sk_test_one").await.expect("lookup"),
        Some(account_id.clone()),
        "the original key must still resolve after a rotation"
    );
    assert_eq!(
        get_account_id_by_api_key(&pool, "sk_test_two").await.expect("lookup"),
        Some(account_id.clone())
    );

    let row = sqlx::query("select api_key_hashes, raw from accounts where id = $1")
        .bind(&account_id)
        .fetch_one(&pool)
        .await
        .expect("fetch account");
    let hashes: Vec<String> = row.try_get("api_key_hashes").unwrap();
    assert_eq!(hashes.len(), 2, "hash set must be a union, not a duplicate-laden array");
    let raw: serde_json::Value = row.try_get("raw").unwrap();
    assert_eq!(raw["rotated"], true, "raw payload is overwritten on each upsert");
}

#[tokio::test]
async fn re_upserting_the_same_key_does_not_duplicate_the_hash() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let account_id = sse_testkit::unique_account_id("acct_dedupe");
    let hash = hash_api_key("sk_test_repeat");

    for _ in 0..3 {
        upsert_account(&pool, &account_id, &json!({ "id": account_id }), &hash).await.expect("upsert");
    }

    let row = sqlx::query("select api_key_hashes from accounts where id = $1")
        .bind(&account_id)
        .fetch_one(&pool)
        .await
        .expect("fetch account");
    let hashes: Vec<String> = row.try_get("api_key_hashes").unwrap();
    assert_eq!(hashes, vec![hash]);
}
