//! The Backfill Controller's two public operations (§4.D): [`process_next`]
//! advances one object run by a single page (or, for per-customer kinds, a
//! full customer sweep), and [`process_until_done`] drains every selected
//! object to completion.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use sqlx::Row;

use sse_registry::{ListParams, Registry};
use sse_schemas::{ObjectRunStatus, ProcessNextOutcome, DEFAULT_PAGE_SIZE};

use crate::cursor::select_cursor_strategy;
use crate::BackfillEngine;

/// Advances one object run. Ensures the `pending` row exists, claims it if
/// needed, fetches one page (or — for `payment_method`/`tax_id` — sweeps
/// every mirrored customer to completion in one call), upserts, and
/// checkpoints cursor/progress state. See the module doc and §4.D for the
/// full decision tree.
pub async fn process_next(
    engine: &BackfillEngine,
    account_id: &str,
    object_name: &str,
    run_started_at: Option<DateTime<Utc>>,
    explicit_created_gte: Option<i64>,
) -> Result<ProcessNextOutcome> {
    let run_started_at = match run_started_at {
        Some(ts) => ts,
        None => resolve_active_run(engine, account_id).await?,
    };

    sse_db::create_object_runs(&engine.pool, account_id, run_started_at, &[object_name]).await?;

    let existing = sse_db::get_object_run(&engine.pool, account_id, run_started_at, object_name)
        .await?
        .context("object run missing immediately after create_object_runs")?;

    if existing.status.is_terminal() {
        return Ok(ProcessNextOutcome { processed: 0, has_more: false, run_started_at });
    }

    if existing.status == ObjectRunStatus::Pending {
        let started = sse_db::try_start_object_sync(
            &engine.pool,
            account_id,
            run_started_at,
            object_name,
            engine.max_concurrent_object_runs,
        )
        .await?;
        if !started {
            // Max-concurrent cap reached; the caller is expected to retry later.
            return Ok(ProcessNextOutcome { processed: 0, has_more: true, run_started_at });
        }
    }

    if Registry::is_per_customer(object_name) {
        return process_per_customer_object(engine, account_id, run_started_at, object_name).await;
    }

    process_one_page(
        engine,
        account_id,
        run_started_at,
        object_name,
        existing.page_cursor.as_deref(),
        explicit_created_gte,
    )
    .await
}

async fn resolve_active_run(engine: &BackfillEngine, account_id: &str) -> Result<DateTime<Utc>> {
    loop {
        if let Some(run) = sse_db::get_or_create_sync_run(
            &engine.pool,
            account_id,
            "backfill",
            engine.max_concurrent_object_runs,
        )
        .await?
        {
            return Ok(run.started_at);
        }
        // Benign exclusion-constraint race on insert; retry get_active.
    }
}

async fn process_one_page(
    engine: &BackfillEngine,
    account_id: &str,
    run_started_at: DateTime<Utc>,
    object_name: &str,
    page_cursor: Option<&str>,
    explicit_created_gte: Option<i64>,
) -> Result<ProcessNextOutcome> {
    let entry = engine
        .registry
        .get(object_name)
        .with_context(|| format!("unknown registry object {object_name:?}"))?
        .clone();

    let last_cursor_before_run =
        sse_db::get_last_cursor_before_run(&engine.pool, account_id, object_name, run_started_at).await?;
    let decision = select_cursor_strategy(
        explicit_created_gte,
        entry.supports_created_filter,
        page_cursor,
        last_cursor_before_run.as_ref(),
    );

    let result: Result<ProcessNextOutcome> = async {
        let (items, has_more) = if let Some(sigma_config) = entry.sigma.as_ref().filter(|_| engine.enable_sigma) {
            let client = engine
                .sigma_client
                .as_ref()
                .context("sigma is enabled but no SigmaClient was configured")?;
            let (page, advanced_cursor) =
                crate::sigma::fetch_one_page(client.as_ref(), sigma_config, page_cursor.or(last_cursor_before_run.as_ref().map(|c| c.as_str()))).await?;
            if page.has_more && page.items.is_empty() {
                anyhow::bail!("has_more=true with empty page");
            }
            run_upsert_and_checkpoint(
                engine,
                account_id,
                run_started_at,
                object_name,
                &page.items,
                advanced_cursor.as_deref(),
            )
            .await?;
            (page.items, page.has_more)
        } else {
            let params = ListParams {
                created_gte: decision.created_gte,
                starting_after: decision.starting_after.clone(),
                limit: DEFAULT_PAGE_SIZE,
            };
            let page = (entry.list)(params).await?;
            if page.has_more && page.items.is_empty() {
                anyhow::bail!("has_more=true with empty page");
            }

            (entry.upsert)(sse_registry::UpsertArgs {
                items: page.items.clone(),
                account_id: account_id.to_string(),
                backfill_related: engine.backfill_related_entities,
                sync_timestamp: Some(Utc::now()),
            })
            .await?;

            sse_db::increment_object_progress(
                &engine.pool,
                account_id,
                run_started_at,
                object_name,
                page.items.len() as i64,
            )
            .await?;

            if let Some(max_created) = max_created_in(&page.items) {
                sse_db::update_object_cursor(&engine.pool, account_id, run_started_at, object_name, &max_created.to_string())
                    .await?;
            }

            if page.has_more {
                let last_id = page.items.last().and_then(|v| v.get("id")).and_then(Value::as_str);
                sse_db::update_object_page_cursor(&engine.pool, account_id, run_started_at, object_name, last_id).await?;
            }

            (page.items, page.has_more)
        };

        Ok(ProcessNextOutcome { processed: items.len() as i64, has_more, run_started_at })
    }
    .await;

    finish_page(engine, account_id, run_started_at, object_name, result).await
}

/// Anomaly-guard-tripped pages are not raised as errors — §4.D explicitly
/// wants `{0, false, run}` with the run marked `error`, not a propagated
/// exception. Every other failure propagates after marking the run failed.
async fn finish_page(
    engine: &BackfillEngine,
    account_id: &str,
    run_started_at: DateTime<Utc>,
    object_name: &str,
    result: Result<ProcessNextOutcome>,
) -> Result<ProcessNextOutcome> {
    match result {
        Ok(outcome) => {
            if outcome.has_more {
                Ok(outcome)
            } else {
                sse_db::complete_object_sync(&engine.pool, account_id, run_started_at, object_name).await?;
                Ok(outcome)
            }
        }
        Err(e) => {
            let is_anomaly = e.to_string().contains("has_more=true with empty page");
            sse_db::fail_object_sync(&engine.pool, account_id, run_started_at, object_name, &e.to_string())
                .await
                .context("fail_object_sync after page error")?;
            if is_anomaly {
                Ok(ProcessNextOutcome { processed: 0, has_more: false, run_started_at })
            } else {
                Err(e)
            }
        }
    }
}

async fn run_upsert_and_checkpoint(
    engine: &BackfillEngine,
    account_id: &str,
    run_started_at: DateTime<Utc>,
    object_name: &str,
    items: &[Value],
    advanced_cursor: Option<&str>,
) -> Result<()> {
    let entry = engine.registry.get(object_name).context("unknown registry object")?;
    (entry.upsert)(sse_registry::UpsertArgs {
        items: items.to_vec(),
        account_id: account_id.to_string(),
        backfill_related: engine.backfill_related_entities,
        sync_timestamp: Some(Utc::now()),
    })
    .await?;
    sse_db::increment_object_progress(&engine.pool, account_id, run_started_at, object_name, items.len() as i64).await?;
    if let Some(cursor) = advanced_cursor {
        sse_db::update_object_cursor(&engine.pool, account_id, run_started_at, object_name, cursor).await?;
    }
    Ok(())
}

fn max_created_in(items: &[Value]) -> Option<i64> {
    items
        .iter()
        .filter_map(|v| v.get("created").and_then(Value::as_i64))
        .filter(|&c| c > 0)
        .max()
}

/// `payment_method`/`tax_id` (§4.D, §6): list every non-deleted mirrored
/// customer, then concurrently (capped at `max_concurrent_customers`)
/// paginate that customer's objects to completion, checkpointing progress
/// every page. There is no platform-wide `created` filter for these kinds,
/// so — unlike the generic path — no per-object cursor is maintained; a
/// restart re-sweeps every customer from scratch, which is the accepted cost
/// named in DESIGN.md for this per-customer case.
async fn process_per_customer_object(
    engine: &BackfillEngine,
    account_id: &str,
    run_started_at: DateTime<Utc>,
    object_name: &str,
) -> Result<ProcessNextOutcome> {
    let entry = engine.registry.get(object_name).context("unknown registry object")?.clone();

    let result: Result<i64> = async {
        let customer_ids = non_deleted_customer_ids(&engine.pool, account_id).await?;
        let total = Arc::new(AtomicI64::new(0));

        stream::iter(customer_ids)
            .map(|customer_id| {
                let engine_entry = entry.clone();
                let total = total.clone();
                async move {
                    let processed = sweep_customer(engine, account_id, run_started_at, object_name, &engine_entry, &customer_id).await?;
                    total.fetch_add(processed, Ordering::Relaxed);
                    Ok::<_, anyhow::Error>(())
                }
            })
            .buffer_unordered(engine.max_concurrent_customers)
            .try_for_each(|_| futures_util::future::ready(Ok(())))
            .await?;

        Ok(total.load(Ordering::Relaxed))
    }
    .await;

    let outcome = match result {
        Ok(processed) => Ok(ProcessNextOutcome { processed, has_more: false, run_started_at }),
        Err(e) => Err(e),
    };
    finish_page(engine, account_id, run_started_at, object_name, outcome).await
}

async fn sweep_customer(
    engine: &BackfillEngine,
    account_id: &str,
    run_started_at: DateTime<Utc>,
    object_name: &str,
    entry: &sse_registry::RegistryEntry,
    customer_id: &str,
) -> Result<i64> {
    let mut starting_after: Option<String> = None;
    let mut processed = 0i64;

    loop {
        let page = match object_name {
            "payment_method" => {
                // sse-stripe's per-customer calls bypass the generic registry
                // dispatcher entirely (see registry_wiring's list stub).
                sse_stripe::objects::list_payment_methods_for_customer(
                    &engine.client,
                    customer_id,
                    starting_after.clone(),
                    DEFAULT_PAGE_SIZE,
                )
                .await?
            }
            "tax_id" => {
                sse_stripe::objects::list_tax_ids_for_customer(
                    &engine.client,
                    customer_id,
                    starting_after.clone(),
                    DEFAULT_PAGE_SIZE,
                )
                .await?
            }
            other => anyhow::bail!("sweep_customer: unexpected per-customer kind {other:?}"),
        };

        if page.has_more && page.items.is_empty() {
            anyhow::bail!("has_more=true with empty page");
        }

        (entry.upsert)(sse_registry::UpsertArgs {
            items: page.items.clone(),
            account_id: account_id.to_string(),
            backfill_related: engine.backfill_related_entities,
            sync_timestamp: Some(Utc::now()),
        })
        .await?;

        sse_db::increment_object_progress(&engine.pool, account_id, run_started_at, object_name, page.items.len() as i64).await?;
        processed += page.items.len() as i64;

        if !page.has_more {
            break;
        }
        starting_after = page.items.last().and_then(|v| v.get("id")).and_then(Value::as_str).map(str::to_string);
    }

    Ok(processed)
}

/// Customers not soft-deleted in the mirror (`raw->>'deleted'` is absent or
/// `false`), scoped to one account.
async fn non_deleted_customer_ids(pool: &sqlx::PgPool, account_id: &str) -> Result<Vec<String>> {
    let rows = sqlx::query(
        r#"
        select id from customers
        where account_id = $1 and coalesce((raw->>'deleted')::boolean, false) = false
        "#,
    )
    .bind(account_id)
    .fetch_all(pool)
    .await
    .context("list non-deleted customers for per-customer backfill")?;

    rows.iter()
        .map(|r| r.try_get::<String, _>("id").context("decode customer id"))
        .collect()
}

/// Loops the registry (or the caller-supplied subset) in order, draining
/// each object to `has_more == false`, then unconditionally closes the run.
pub async fn process_until_done(
    engine: &BackfillEngine,
    account_id: &str,
    objects: Option<&[&str]>,
) -> Result<()> {
    let names: Vec<&str> = match objects {
        Some(n) => n.to_vec(),
        None => engine.registry.names_in_order(),
    };

    let run_started_at = resolve_active_run(engine, account_id).await?;

    for name in &names {
        loop {
            let outcome = process_next(engine, account_id, name, Some(run_started_at), None).await?;
            if !outcome.has_more {
                break;
            }
        }
    }

    sse_db::close_run_unconditionally(&engine.pool, account_id, run_started_at).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_created_in_ignores_zero_and_missing_created() {
        let items = vec![
            serde_json::json!({ "id": "a", "created": 100 }),
            serde_json::json!({ "id": "b" }),
            serde_json::json!({ "id": "c", "created": 0 }),
            serde_json::json!({ "id": "d", "created": 250 }),
        ];
        assert_eq!(max_created_in(&items), Some(250));
    }

    #[test]
    fn max_created_in_empty_page_is_none() {
        assert_eq!(max_created_in(&[]), None);
    }
}
