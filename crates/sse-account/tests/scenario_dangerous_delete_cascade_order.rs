use std::sync::Arc;

use serde_json::json;
use sqlx::Row;

use sse_account::dangerously_delete_account;
use sse_registry::{ListPage, Registry, RegistryEntry};

fn stub_entry(name: &'static str, order: i32) -> RegistryEntry {
    RegistryEntry {
        name,
        order,
        supports_created_filter: true,
        list: Arc::new(|_| Box::pin(async { Ok(ListPage { items: vec![], has_more: false }) })),
        upsert: Arc::new(|_| Box::pin(async { Ok(()) })),
        sigma: None,
    }
}

#[tokio::test]
async fn dry_run_counts_but_does_not_delete() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let account_id = sse_testkit::unique_account_id("acct_delete_dry_run");
    sse_testkit::fixtures::account(&pool, &account_id).await.expect("seed account");

    sqlx::query("insert into products (id, account_id, raw) values ('prod_1', $1, $2)")
        .bind(&account_id)
        .bind(json!({ "id": "prod_1" }))
        .execute(&pool)
        .await
        .expect("seed product");

    let registry = Registry::new(vec![stub_entry("product", 10)]);

    let report = dangerously_delete_account(&pool, &registry, &account_id, true, false)
        .await
        .expect("dry run");
    assert!(!report.executed);
    let product_count = report.counts.iter().find(|c| c.table == "products").expect("products counted").rows;
    assert_eq!(product_count, 1);

    let still_there: i64 = sqlx::query_scalar("select count(*) from products where account_id = $1")
        .bind(&account_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(still_there, 1, "dry run must not delete anything");
}

#[tokio::test]
async fn executed_delete_removes_children_then_the_account_row_last() {
    let pool = sse_testkit::test_pool().await.expect("test pool");
    let account_id = sse_testkit::unique_account_id("acct_delete_executed");
    sse_testkit::fixtures::account(&pool, &account_id).await.expect("seed account");

    sqlx::query("insert into products (id, account_id, raw) values ('prod_1', $1, $2)")
        .bind(&account_id)
        .bind(json!({ "id": "prod_1" }))
        .execute(&pool)
        .await
        .expect("seed product");
    sqlx::query("insert into subscription_items (id, subscription_id, account_id, raw) values ('si_1', 'sub_1', $1, $2)")
        .bind(&account_id)
        .bind(json!({ "id": "si_1" }))
        .execute(&pool)
        .await
        .expect("seed subscription item");

    let registry = Registry::new(vec![stub_entry("product", 10)]);

    let report = dangerously_delete_account(&pool, &registry, &account_id, false, true)
        .await
        .expect("executed delete");
    assert!(report.executed);

    let remaining_products: i64 = sqlx::query_scalar("select count(*) from products where account_id = $1")
        .bind(&account_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining_products, 0);

    let remaining_items: i64 = sqlx::query_scalar("select count(*) from subscription_items where account_id = $1")
        .bind(&account_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining_items, 0);

    let remaining_accounts = sqlx::query("select id from accounts where id = $1")
        .bind(&account_id)
        .fetch_optional(&pool)
        .await
        .unwrap();
    assert!(remaining_accounts.is_none(), "the account row itself must be gone last");
}
