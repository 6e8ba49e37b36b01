use std::sync::{Arc, Mutex};

use sse_backfill::test_support::{db_backed_upsert_fn, queued_list_fn, single_object_registry, test_engine};
use sse_registry::ListPage;

/// `has_more == true` with an empty `items` page is an anomaly (§4.D): the
/// object run is marked `error`, but `process_next` still returns
/// `Ok({0, false, run})` rather than propagating — callers must not retry it
/// forever as if it were a transient failure.
#[tokio::test]
async fn anomaly_marks_run_error_but_does_not_propagate() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let account_id = sse_testkit::unique_account_id("acct_anomaly");
    sse_testkit::fixtures::account(&pool, &account_id).await.expect("seed account");

    let calls = Arc::new(Mutex::new(Vec::new()));
    let pages = vec![ListPage { items: vec![], has_more: true }];
    let registry = single_object_registry(queued_list_fn(pages, calls), db_backed_upsert_fn(pool.clone()));
    let engine = test_engine(pool.clone(), registry);

    let outcome = sse_backfill::process_next(&engine, &account_id, "product", None, None)
        .await
        .expect("process_next must not propagate the anomaly as an error");
    assert_eq!(outcome.processed, 0);
    assert!(!outcome.has_more);

    let run = sse_db::get_object_run(&pool, &account_id, outcome.run_started_at, "product")
        .await
        .expect("get_object_run")
        .expect("run exists");
    assert_eq!(run.status, sse_schemas::ObjectRunStatus::Error);
    assert!(run.error_message.as_deref().unwrap_or_default().contains("has_more=true with empty page"));
}

/// Any other failure during a page both marks the run `error` and propagates
/// the error to the caller, unlike the anomaly case above.
#[tokio::test]
async fn generic_list_failure_marks_run_error_and_propagates() {
    use std::sync::Arc as StdArc;

    let pool = sse_testkit::test_pool().await.expect("test pool");
    let account_id = sse_testkit::unique_account_id("acct_generic_failure");
    sse_testkit::fixtures::account(&pool, &account_id).await.expect("seed account");

    let failing_list: sse_registry::ListFn = StdArc::new(|_params: sse_registry::ListParams| {
        Box::pin(async { anyhow::bail!("simulated Stripe API outage") })
    });
    let registry = single_object_registry(failing_list, db_backed_upsert_fn(pool.clone()));
    let engine = sse_backfill::test_support::test_engine(pool.clone(), registry);

    let err = sse_backfill::process_next(&engine, &account_id, "product", None, None)
        .await
        .expect_err("generic failures must propagate");
    assert!(err.to_string().contains("simulated Stripe API outage"));

    let active = sse_db::get_active_sync_run(&pool, &account_id)
        .await
        .expect("get_active_sync_run")
        .expect("run exists");
    let run = sse_db::get_object_run(&pool, &account_id, active.started_at, "product")
        .await
        .expect("get_object_run")
        .expect("run exists");
    assert_eq!(run.status, sse_schemas::ObjectRunStatus::Error);
}
