//! Worker tick loop (§6): drains the Postgres-backed `_worker_queue` with
//! `sse_db::queue::claim_batch`, advances each claimed object one page via
//! the Backfill Controller's [`sse_backfill::process_next`], and re-enqueues
//! when a page leaves more work behind. Seeds the queue from the registry's
//! full name list whenever it finds the queue empty, so a freshly migrated
//! or fully-drained deployment keeps making progress without an operator
//! manually running `sse-cli queue seed`.
//!
//! Grounded on `mqk-daemon::state::spawn_heartbeat`'s spawn-a-background-tick
//! shape, generalized from a fixed-interval broadcast to a claim/process/
//! checkpoint loop over the queue this engine's spec describes in §6.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tracing::{error, info, warn};

use crate::state::{AppState, BusMsg, StatusSnapshot};

const CLAIM_BATCH_SIZE: i64 = 5;
const VISIBILITY_TIMEOUT_SECS: i64 = 120;
const WORKER_ID_PREFIX: &str = "sse-daemon";

/// Spawns the tick loop as a background task, firing every `interval`.
pub fn spawn_worker(state: Arc<AppState>, interval: Duration) {
    let worker_id = format!("{WORKER_ID_PREFIX}-{}", uuid::Uuid::new_v4());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = tick(&state, &worker_id).await {
                error!(error = %err, "worker tick failed");
            }
        }
    });
}

/// One pass over the queue: seed if empty, claim a batch, advance each
/// claimed object by one page, and either re-enqueue (more pages remain) or
/// delete the message (object run fully drained this pass).
async fn tick(state: &AppState, worker_id: &str) -> anyhow::Result<()> {
    if sse_db::queue::is_empty(&state.pool).await? {
        let names = state.registry.names_in_order();
        info!(count = names.len(), "worker queue empty, reseeding from registry");
        sse_db::queue::enqueue_many(&state.pool, &names).await?;
    }

    let claimed = sse_db::queue::claim_batch(
        &state.pool,
        CLAIM_BATCH_SIZE,
        ChronoDuration::seconds(VISIBILITY_TIMEOUT_SECS),
        worker_id,
    )
    .await?;

    for message in &claimed {
        let outcome = sse_backfill::process_next(
            &state.backfill,
            &state.account_id,
            &message.object_name,
            None,
            None,
        )
        .await;

        match outcome {
            Ok(outcome) => {
                if outcome.has_more {
                    sse_db::queue::enqueue(&state.pool, &message.object_name).await?;
                } else {
                    info!(object = %message.object_name, "object run drained");
                }
                let _ = state.bus.send(BusMsg::WorkerTick {
                    object_name: message.object_name.clone(),
                    processed: outcome.processed,
                    has_more: outcome.has_more,
                });
                let mut status = state.status.write().await;
                *status = StatusSnapshot {
                    last_object_processed: Some(message.object_name.clone()),
                    queue_empty: false,
                    ..status.clone()
                };
            }
            Err(err) => {
                warn!(object = %message.object_name, error = %err, "process_next failed, re-enqueueing for retry");
                sse_db::queue::enqueue(&state.pool, &message.object_name).await?;
            }
        }
        sse_db::queue::delete_message(&state.pool, message.id).await?;
    }

    Ok(())
}
