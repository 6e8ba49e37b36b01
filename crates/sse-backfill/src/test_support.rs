//! Helpers shared by `tests/scenario_*.rs` for building a [`BackfillEngine`]
//! around a fake single-object registry, so these scenarios exercise the
//! controller's state machine without talking to the real Stripe API.
//!
//! Gated behind the `testkit` feature alongside the scenario tests themselves.

use std::sync::{Arc, Mutex};

use sse_registry::{ListFn, ListPage, ListParams, Registry, RegistryEntry, UpsertArgs, UpsertFn};
use stripe::Client;

use crate::BackfillEngine;

/// A list closure that hands out one canned page per call, in order, and
/// records the [`ListParams`] it was invoked with so a test can assert on
/// cursor selection.
pub fn queued_list_fn(pages: Vec<ListPage>, calls: Arc<Mutex<Vec<ListParams>>>) -> ListFn {
    let pages = Arc::new(Mutex::new(pages.into_iter()));
    Arc::new(move |params: ListParams| {
        let pages = pages.clone();
        let calls = calls.clone();
        Box::pin(async move {
            calls.lock().unwrap().push(params);
            let page = pages
                .lock()
                .unwrap()
                .next()
                .unwrap_or(ListPage { items: vec![], has_more: false });
            Ok(page)
        })
    })
}

/// Upserts into `products` via the real gateway so scenarios can assert on
/// stored rows the same way a genuine `product` backfill would leave them.
pub fn db_backed_upsert_fn(pool: sqlx::PgPool) -> UpsertFn {
    Arc::new(move |args: UpsertArgs| {
        let pool = pool.clone();
        Box::pin(async move {
            let rows: Vec<sse_db::gateway::ObjectRow> = args
                .items
                .iter()
                .filter_map(|v| {
                    v.get("id")
                        .and_then(serde_json::Value::as_str)
                        .map(|id| sse_db::gateway::ObjectRow { id: id.to_string(), raw: v.clone() })
                })
                .collect();
            sse_db::gateway::upsert_object_rows(&pool, "products", &args.account_id, &rows, args.sync_timestamp).await
        })
    })
}

/// A single-entry registry named `product`, wired to `list` and `upsert`
/// closures the caller supplies.
pub fn single_object_registry(list: ListFn, upsert: UpsertFn) -> Registry {
    Registry::new(vec![RegistryEntry {
        name: "product",
        order: 10,
        supports_created_filter: true,
        list,
        upsert,
        sigma: None,
    }])
}

pub fn test_engine(pool: sqlx::PgPool, registry: Registry) -> Arc<BackfillEngine> {
    BackfillEngine::new(
        pool,
        Client::new("sk_test_unused"),
        registry,
        1,
        10,
        false,
        false,
        None,
    )
}
