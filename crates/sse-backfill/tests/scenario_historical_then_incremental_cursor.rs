use std::sync::{Arc, Mutex};

use serde_json::json;

use sse_backfill::test_support::{db_backed_upsert_fn, queued_list_fn, single_object_registry, test_engine};
use sse_registry::ListPage;

/// First run: no completed cursor exists yet, so the first page is listed
/// unfiltered (rule 5 of `select_cursor_strategy`). Once that run completes
/// with a numeric high-water cursor, a brand new run for the same object
/// picks it up as `created.gte` on its very first page (rule 4) — the
/// historical-to-incremental handoff described in §4.D.
#[tokio::test]
async fn second_run_resumes_from_first_runs_completed_cursor() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let account_id = sse_testkit::unique_account_id("acct_historical_incremental");
    sse_testkit::fixtures::account(&pool, &account_id).await.expect("seed account");

    let first_calls = Arc::new(Mutex::new(Vec::new()));
    let first_pages = vec![ListPage { items: vec![json!({ "id": "prod_1", "created": 500 })], has_more: false }];
    let registry = single_object_registry(queued_list_fn(first_pages, first_calls.clone()), db_backed_upsert_fn(pool.clone()));
    let engine = test_engine(pool.clone(), registry);

    let first_outcome = sse_backfill::process_next(&engine, &account_id, "product", None, None)
        .await
        .expect("first run's only page");
    assert!(!first_outcome.has_more);
    assert_eq!(first_calls.lock().unwrap()[0].created_gte, None, "fresh backfill lists unfiltered");

    sse_db::close_run_unconditionally(&pool, &account_id, first_outcome.run_started_at)
        .await
        .expect("close first run");

    let second_calls = Arc::new(Mutex::new(Vec::new()));
    let second_pages = vec![ListPage { items: vec![json!({ "id": "prod_2", "created": 600 })], has_more: false }];
    let registry = single_object_registry(queued_list_fn(second_pages, second_calls.clone()), db_backed_upsert_fn(pool.clone()));
    let engine = test_engine(pool.clone(), registry);

    let second_outcome = sse_backfill::process_next(&engine, &account_id, "product", None, None)
        .await
        .expect("second run's only page");
    assert!(!second_outcome.has_more);
    assert_ne!(second_outcome.run_started_at, first_outcome.run_started_at);
    assert_eq!(
        second_calls.lock().unwrap()[0].created_gte,
        Some(500),
        "incremental run must resume from the prior run's completed cursor"
    );

    let last_completed = sse_db::get_last_completed_cursor(&pool, &account_id, "product")
        .await
        .expect("get_last_completed_cursor")
        .expect("a completed cursor exists");
    assert_eq!(last_completed.as_str(), "600");
}
