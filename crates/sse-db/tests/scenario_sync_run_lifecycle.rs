use sse_db::{
    cancel_stale_runs, complete_object_sync, create_object_runs, get_active_sync_run,
    get_or_create_sync_run, try_start_object_sync,
};

#[tokio::test]
async fn run_closes_once_every_object_reaches_a_terminal_state() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let account_id = sse_testkit::unique_account_id("acct_lifecycle");
    sse_testkit::fixtures::account(&pool, &account_id)
        .await
        .expect("seed account");

    let run = get_or_create_sync_run(&pool, &account_id, "test", 1)
        .await
        .expect("create run")
        .expect("no exclusion race expected on a fresh account");

    create_object_runs(&pool, &account_id, run.started_at, &["product"])
        .await
        .expect("create object runs");

    let started = try_start_object_sync(&pool, &account_id, run.started_at, "product", 1)
        .await
        .expect("try_start_object_sync");
    assert!(started, "pending -> running must succeed when under the concurrency cap");

    // The run must still be open while its only object is running.
    let still_active = get_active_sync_run(&pool, &account_id)
        .await
        .expect("get_active_sync_run");
    assert!(still_active.is_some());

    complete_object_sync(&pool, &account_id, run.started_at, "product")
        .await
        .expect("complete_object_sync");

    let after_completion = get_active_sync_run(&pool, &account_id)
        .await
        .expect("get_active_sync_run");
    assert!(
        after_completion.is_none(),
        "run must auto-close once its only child completes"
    );
}

#[tokio::test]
async fn at_most_one_active_run_exists_per_account() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let account_id = sse_testkit::unique_account_id("acct_single_active");
    sse_testkit::fixtures::account(&pool, &account_id)
        .await
        .expect("seed account");

    let first = get_or_create_sync_run(&pool, &account_id, "test", 1)
        .await
        .expect("first call")
        .expect("first call creates a run");

    let second = get_or_create_sync_run(&pool, &account_id, "test", 1)
        .await
        .expect("second call")
        .expect("second call returns the same active run");

    assert_eq!(first.started_at, second.started_at);
}

#[tokio::test]
async fn stale_running_object_is_cancelled_with_a_descriptive_message() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let account_id = sse_testkit::unique_account_id("acct_stale");
    sse_testkit::fixtures::account(&pool, &account_id)
        .await
        .expect("seed account");

    let run = get_or_create_sync_run(&pool, &account_id, "test", 1)
        .await
        .expect("create run")
        .expect("fresh account has no active run yet");

    create_object_runs(&pool, &account_id, run.started_at, &["product"])
        .await
        .expect("create object runs");
    try_start_object_sync(&pool, &account_id, run.started_at, "product", 1)
        .await
        .expect("claim object run");

    // Backdate updated_at past the staleness window directly — cancel_stale_runs
    // is the only thing that should ever observe and act on this.
    sqlx::query(
        "update _sync_obj_runs set updated_at = now() - interval '6 minutes' \
         where account_id = $1 and run_started_at = $2 and object_name = 'product'",
    )
    .bind(&account_id)
    .bind(run.started_at)
    .execute(&pool)
    .await
    .expect("backdate updated_at");

    cancel_stale_runs(&pool, &account_id).await.expect("cancel_stale_runs");

    let obj = sse_db::get_object_run(&pool, &account_id, run.started_at, "product")
        .await
        .expect("get_object_run")
        .expect("object run row must exist");

    assert_eq!(obj.status, sse_schemas::ObjectRunStatus::Error);
    assert!(obj.error_message.unwrap().contains("stale"));
    assert!(obj.page_cursor.is_none());

    let closed = get_active_sync_run(&pool, &account_id)
        .await
        .expect("get_active_sync_run");
    assert!(closed.is_none(), "run must close once its only child is terminal");
}
