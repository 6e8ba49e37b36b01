//! Assembles the production [`Registry`] (§4.B, §6 "Supported object types")
//! by closing `sse-stripe`'s list calls and `sse-upsert`'s per-kind upsert
//! functions over a concrete Stripe client and [`UpsertEngine`]. `sse-registry`
//! itself stays free of both dependencies (see its module doc) — this is the
//! one place that wires the static catalog to real I/O.

use std::sync::Arc;

use sse_registry::{ListFn, ListPage, RegistryEntry, Registry, UpsertFn};
use sse_upsert::UpsertEngine;

fn to_list_fn(client: stripe::Client, kind: &'static str, retry_policy: sse_stripe::RetryPolicy) -> ListFn {
    Arc::new(move |params: sse_registry::ListParams| {
        let client = client.clone();
        Box::pin(async move {
            let args = sse_stripe::objects::ListArgs {
                created_gte: params.created_gte,
                starting_after: params.starting_after,
                limit: params.limit,
            };
            let page = sse_stripe::objects::list(&client, kind, args, &retry_policy).await?;
            Ok(ListPage { items: page.items, has_more: page.has_more })
        })
    })
}

/// `payment_method`/`tax_id` have no platform-wide list endpoint — their
/// backfill goes through the per-customer fan-out in `controller`, never
/// through this generic dispatcher. The closure exists only so the catalog
/// entry is well-formed; it fails loudly if ever invoked directly.
fn per_customer_list_stub(kind: &'static str) -> ListFn {
    Arc::new(move |_params: sse_registry::ListParams| {
        Box::pin(async move {
            anyhow::bail!(
                "{kind} requires customer context and is never listed through the generic registry dispatcher; \
                 see sse_backfill::controller's per-customer fan-out"
            )
        })
    })
}

macro_rules! simple_upsert {
    ($engine:expr, $func:path) => {{
        let engine = $engine.clone();
        Arc::new(move |args: sse_registry::UpsertArgs| {
            let engine = engine.clone();
            Box::pin(async move { $func(engine, args).await })
        }) as UpsertFn
    }};
}

/// Builds the full, dependency-ordered catalog. Parents precede children
/// (products before prices, customers before subscriptions, charges before
/// disputes) per §6's registry order.
pub fn build_production_registry(client: stripe::Client, engine: Arc<UpsertEngine>, enable_sigma: bool) -> Registry {
    let mut entries = Vec::new();

    let retry_policy = engine.retry_policy;

    macro_rules! simple_entry {
        ($name:literal, $order:expr, $func:path) => {
            entries.push(RegistryEntry {
                name: $name,
                order: $order,
                supports_created_filter: true,
                list: to_list_fn(client.clone(), $name, retry_policy),
                upsert: simple_upsert!(engine, $func),
                sigma: None,
            });
        };
    }

    simple_entry!("product", 10, sse_upsert::upsert_products);
    simple_entry!("price", 20, sse_upsert::upsert_prices);
    simple_entry!("plan", 30, sse_upsert::upsert_plans);
    simple_entry!("customer", 40, sse_upsert::upsert_customers);
    simple_entry!("subscription", 50, sse_upsert::upsert_subscriptions);
    simple_entry!("subscription_schedules", 60, sse_upsert::upsert_subscription_schedules);
    simple_entry!("invoice", 70, sse_upsert::upsert_invoices);
    simple_entry!("charge", 80, sse_upsert::upsert_charges);
    simple_entry!("setup_intent", 90, sse_upsert::upsert_setup_intents);

    entries.push(RegistryEntry {
        name: "payment_method",
        order: 100,
        supports_created_filter: false,
        list: per_customer_list_stub("payment_method"),
        upsert: simple_upsert!(engine, sse_upsert::upsert_payment_methods),
        sigma: None,
    });

    simple_entry!("payment_intent", 110, sse_upsert::upsert_payment_intents);

    entries.push(RegistryEntry {
        name: "tax_id",
        order: 120,
        supports_created_filter: false,
        list: per_customer_list_stub("tax_id"),
        upsert: simple_upsert!(engine, sse_upsert::upsert_tax_ids),
        sigma: None,
    });

    simple_entry!("credit_note", 130, sse_upsert::upsert_credit_notes);
    simple_entry!("dispute", 140, sse_upsert::upsert_disputes);
    simple_entry!("early_fraud_warning", 150, sse_upsert::upsert_early_fraud_warnings);
    simple_entry!("refund", 160, sse_upsert::upsert_refunds);
    simple_entry!("checkout_sessions", 170, sse_upsert::upsert_checkout_sessions);

    if enable_sigma {
        entries.push(RegistryEntry {
            name: "subscription_item_change_events_v2_beta",
            order: 180,
            supports_created_filter: false,
            list: per_customer_list_stub("subscription_item_change_events_v2_beta"),
            upsert: simple_upsert!(engine, sse_upsert::upsert_subscription_item_change_events),
            sigma: Some(sse_registry::SigmaConfig {
                destination_table: "subscription_item_change_events_v2_beta",
                cursor_columns: vec![sse_registry::SigmaCursorColumn {
                    name: "event_timestamp",
                    kind: sse_registry::SigmaColumnType::Timestamp,
                }],
                page_size: 1000,
                timestamp_protected: true,
                query_template: "select * from subscription_item_change_events \
                    where event_timestamp > {{cursor}} order by event_timestamp limit {{page_size}}",
            }),
        });

        entries.push(RegistryEntry {
            name: "exchange_rates_from_usd",
            order: 190,
            supports_created_filter: false,
            list: per_customer_list_stub("exchange_rates_from_usd"),
            upsert: simple_upsert!(engine, sse_upsert::upsert_exchange_rates_from_usd),
            sigma: Some(sse_registry::SigmaConfig {
                destination_table: "exchange_rates_from_usd",
                cursor_columns: vec![sse_registry::SigmaCursorColumn {
                    name: "as_of_date",
                    kind: sse_registry::SigmaColumnType::Timestamp,
                }],
                page_size: 500,
                timestamp_protected: true,
                query_template: "select * from exchange_rates_from_usd_feed \
                    where as_of_date > {{cursor}} order by as_of_date limit {{page_size}}",
            }),
        });
    }

    Registry::new(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_registry_visits_parents_before_children() {
        let client = stripe::Client::new("sk_test_dummy");
        let pool_url = "postgres://placeholder";
        let _ = pool_url; // constructing a real pool needs an async runtime; names_in_order doesn't.
        let engine = UpsertEngine::new(
            sqlx::PgPool::connect_lazy("postgres://localhost/placeholder").expect("lazy pool"),
            client.clone(),
            true,
            sse_stripe::RetryPolicy::default(),
        );
        let registry = build_production_registry(client.clone(), engine.clone(), false);
        let names = registry.names_in_order();
        assert_eq!(names.first(), Some(&"product"));
        assert!(names.iter().position(|n| *n == "customer") < names.iter().position(|n| *n == "subscription"));
        assert!(names.iter().position(|n| *n == "product") < names.iter().position(|n| *n == "price"));
        assert_eq!(names.len(), 17);

        let with_sigma = build_production_registry(client, engine, true);
        assert_eq!(with_sigma.names_in_order().len(), 19);
        assert!(with_sigma.get("exchange_rates_from_usd").is_some());
    }
}
