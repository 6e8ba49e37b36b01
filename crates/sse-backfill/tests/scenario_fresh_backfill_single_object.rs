use std::sync::{Arc, Mutex};

use serde_json::json;
use sqlx::Row;

use sse_backfill::test_support::{db_backed_upsert_fn, queued_list_fn, single_object_registry, test_engine};
use sse_registry::ListPage;

#[tokio::test]
async fn drains_two_pages_then_completes_the_object_run() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let account_id = sse_testkit::unique_account_id("acct_fresh_backfill");
    sse_testkit::fixtures::account(&pool, &account_id).await.expect("seed account");

    let calls = Arc::new(Mutex::new(Vec::new()));
    let pages = vec![
        ListPage {
            items: vec![json!({ "id": "prod_1", "created": 100 }), json!({ "id": "prod_2", "created": 200 })],
            has_more: true,
        },
        ListPage { items: vec![json!({ "id": "prod_3", "created": 300 })], has_more: false },
    ];
    let registry = single_object_registry(queued_list_fn(pages, calls.clone()), db_backed_upsert_fn(pool.clone()));
    let engine = test_engine(pool.clone(), registry);

    let first = sse_backfill::process_next(&engine, &account_id, "product", None, None)
        .await
        .expect("first page");
    assert_eq!(first.processed, 2);
    assert!(first.has_more);

    let second = sse_backfill::process_next(&engine, &account_id, "product", Some(first.run_started_at), None)
        .await
        .expect("second page");
    assert_eq!(second.processed, 1);
    assert!(!second.has_more);

    let run = sse_db::get_object_run(&pool, &account_id, first.run_started_at, "product")
        .await
        .expect("get_object_run")
        .expect("run exists");
    assert_eq!(run.status, sse_schemas::ObjectRunStatus::Complete);
    assert_eq!(run.processed_count, 3);
    assert_eq!(run.cursor.as_deref(), Some("300"));

    let stored_ids: Vec<String> = sqlx::query("select id from products where account_id = $1 order by id")
        .bind(&account_id)
        .fetch_all(&pool)
        .await
        .expect("fetch products")
        .into_iter()
        .map(|row| row.try_get::<String, _>("id").unwrap())
        .collect();
    assert_eq!(stored_ids, vec!["prod_1", "prod_2", "prod_3"]);

    assert_eq!(calls.lock().unwrap().len(), 2, "one list call per page");
}
