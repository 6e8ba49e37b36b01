//! Shared bootstrap every subcommand needs: load config + secrets, connect
//! and migrate the pool, build a Stripe client, and resolve the account id
//! for the configured key unless the operator overrode it with `--account`.
//! One reusable struct rather than per-command duplication, since every
//! subcommand here needs a live Stripe client in addition to the pool.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use stripe::Client;

use sse_config::EngineConfig;
use sse_upsert::UpsertEngine;

const ENV_CONFIG_PATHS: &str = "SSE_CONFIG_PATHS";

pub struct CliContext {
    pub pool: PgPool,
    pub client: Client,
    pub config: EngineConfig,
    pub upsert_engine: Arc<UpsertEngine>,
    pub stripe_secret_key: String,
}

impl CliContext {
    pub async fn bootstrap() -> Result<Self> {
        let _ = dotenvy::from_filename(".env.local");

        let config_paths = std::env::var(ENV_CONFIG_PATHS).unwrap_or_default();
        let paths: Vec<&str> = config_paths.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
        let (config_json, config) = if paths.is_empty() {
            (serde_json::json!({}), EngineConfig::default())
        } else {
            let loaded = sse_config::load_layered_yaml(&paths).context("load layered config")?;
            let cfg = EngineConfig::from_config_json(&loaded.config_json);
            (loaded.config_json, cfg)
        };

        let secrets = sse_config::resolve_secrets(&config_json).context("resolve secrets")?;

        let pool = sse_db::connect(
            &std::env::var(sse_db::ENV_DB_URL).with_context(|| format!("missing env var {}", sse_db::ENV_DB_URL))?,
            config.db_max_connections,
            config.db_keep_alive,
        )
        .await
        .context("connect to postgres")?;
        sse_db::migrate(&pool).await.context("run migrations")?;

        let client = sse_stripe::build_client(
            &secrets.stripe_secret_key,
            secrets.stripe_connect_account_id.as_deref(),
            config.stripe_api_version.as_deref(),
        );

        let retry_policy = sse_stripe::RetryPolicy::from_config(&config);
        let upsert_engine = UpsertEngine::new(pool.clone(), client.clone(), config.auto_expand_lists, retry_policy);

        Ok(CliContext {
            pool,
            client,
            config,
            upsert_engine,
            stripe_secret_key: secrets.stripe_secret_key,
        })
    }

    /// Resolves the target account id: the operator's `--account` override if
    /// given, else the account the configured Stripe key belongs to.
    pub async fn resolve_account(&self, account_override: Option<String>) -> Result<String> {
        match account_override {
            Some(id) => Ok(id),
            None => sse_account::resolve_account_id_for_api_key(&self.pool, &self.client, &self.stripe_secret_key).await,
        }
    }

    pub fn registry(&self) -> sse_registry::Registry {
        sse_backfill::build_production_registry(self.client.clone(), self.upsert_engine.clone(), self.config.enable_sigma)
    }
}
