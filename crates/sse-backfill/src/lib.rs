//! Backfill Controller (§4.D) — "the hardest part of the spec": claims a
//! sync run, fans out per object type through the Resource Registry, pages
//! through Stripe (or Sigma) via the Upsert Orchestrator, and checkpoints
//! cursor / page-cursor state all the way to completion.
//!
//! Two public operations, matching the teacher's thin-orchestrator-over-a-
//! state-machine style (`mqk-reconcile`'s gate + drift-action split):
//! [`process_next`] advances one object run by one page, [`process_until_done`]
//! drains every selected object to completion.

use std::sync::Arc;

use sse_registry::Registry;

pub mod controller;
pub mod cursor;
pub mod registry_wiring;
pub mod sigma;

#[cfg(feature = "testkit")]
pub mod test_support;

pub use controller::{process_next, process_until_done};
pub use registry_wiring::build_production_registry;
pub use sigma::SigmaClient;

/// Shared handle the controller closes over: the pool, the assembled
/// registry, and the concurrency/feature knobs from `sse-config::EngineConfig`.
pub struct BackfillEngine {
    pub pool: sqlx::PgPool,
    pub client: stripe::Client,
    pub registry: Registry,
    pub max_concurrent_object_runs: i32,
    pub max_concurrent_customers: usize,
    pub backfill_related_entities: bool,
    pub enable_sigma: bool,
    pub sigma_client: Option<Arc<dyn SigmaClient>>,
}

impl BackfillEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: sqlx::PgPool,
        client: stripe::Client,
        registry: Registry,
        max_concurrent_object_runs: i32,
        max_concurrent_customers: usize,
        backfill_related_entities: bool,
        enable_sigma: bool,
        sigma_client: Option<Arc<dyn SigmaClient>>,
    ) -> Arc<Self> {
        Arc::new(BackfillEngine {
            pool,
            client,
            registry,
            max_concurrent_object_runs,
            max_concurrent_customers,
            backfill_related_entities,
            enable_sigma,
            sigma_client,
        })
    }
}
