use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

pub mod secrets;

pub use secrets::{resolve_secrets, ResolvedSecrets};

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge, e.g.
/// `load_layered_yaml(&["config/base.yaml", "config/production.yaml"])`.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

/// The recognized engine options from the destination's configuration surface:
/// api version, list-expansion/parent-backfill toggles, re-fetch set, pool sizing,
/// Sigma toggle, concurrency caps, retry policy, and worker cadence.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub stripe_api_version: Option<String>,
    pub auto_expand_lists: bool,
    pub backfill_related_entities: bool,
    pub revalidate_via_api: Vec<String>,
    pub db_max_connections: u32,
    pub db_keep_alive: bool,
    pub enable_sigma: bool,
    pub max_concurrent_customers: usize,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub retry_jitter: bool,
    pub worker_interval_secs: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            stripe_api_version: None,
            auto_expand_lists: true,
            backfill_related_entities: true,
            revalidate_via_api: Vec::new(),
            db_max_connections: 10,
            db_keep_alive: true,
            enable_sigma: false,
            max_concurrent_customers: sse_schemas::DEFAULT_MAX_CONCURRENT_CUSTOMERS,
            max_retries: 5,
            initial_retry_delay_ms: 200,
            max_retry_delay_ms: 10_000,
            retry_jitter: true,
            worker_interval_secs: 10,
        }
    }
}

impl EngineConfig {
    /// Reads recognized pointers out of a loaded config's canonical JSON. Any
    /// pointer that is absent keeps the `Default::default()` value.
    pub fn from_config_json(config_json: &Value) -> Self {
        let mut cfg = EngineConfig::default();

        if let Some(v) = config_json.pointer("/stripe/api_version").and_then(|v| v.as_str()) {
            cfg.stripe_api_version = Some(v.to_string());
        }
        if let Some(v) = config_json.pointer("/engine/auto_expand_lists").and_then(|v| v.as_bool())
        {
            cfg.auto_expand_lists = v;
        }
        if let Some(v) = config_json
            .pointer("/engine/backfill_related_entities")
            .and_then(|v| v.as_bool())
        {
            cfg.backfill_related_entities = v;
        }
        if let Some(arr) = config_json.pointer("/engine/revalidate_via_api").and_then(|v| v.as_array())
        {
            cfg.revalidate_via_api = arr
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
        }
        if let Some(v) = config_json.pointer("/db/max_connections").and_then(|v| v.as_u64()) {
            cfg.db_max_connections = v as u32;
        }
        if let Some(v) = config_json.pointer("/db/keep_alive").and_then(|v| v.as_bool()) {
            cfg.db_keep_alive = v;
        }
        if let Some(v) = config_json.pointer("/sigma/enabled").and_then(|v| v.as_bool()) {
            cfg.enable_sigma = v;
        }
        if let Some(v) = config_json
            .pointer("/backfill/max_concurrent_customers")
            .and_then(|v| v.as_u64())
        {
            cfg.max_concurrent_customers = v as usize;
        }
        if let Some(v) = config_json.pointer("/retry/max_retries").and_then(|v| v.as_u64()) {
            cfg.max_retries = v as u32;
        }
        if let Some(v) = config_json.pointer("/retry/initial_delay_ms").and_then(|v| v.as_u64()) {
            cfg.initial_retry_delay_ms = v;
        }
        if let Some(v) = config_json.pointer("/retry/max_delay_ms").and_then(|v| v.as_u64()) {
            cfg.max_retry_delay_ms = v;
        }
        if let Some(v) = config_json.pointer("/retry/jitter").and_then(|v| v.as_bool()) {
            cfg.retry_jitter = v;
        }
        if let Some(v) = config_json.pointer("/worker/interval_secs").and_then(|v| v.as_u64()) {
            cfg.worker_interval_secs = v as u32;
        }

        cfg
    }

    /// Validates the worker cadence: 1-59 seconds, or a minute multiple below 60
    /// minutes (i.e. it must map onto a valid cron schedule).
    pub fn validate_worker_interval(&self) -> Result<()> {
        let secs = self.worker_interval_secs;
        if secs == 0 {
            anyhow::bail!("worker interval must be positive");
        }
        if secs < 60 {
            return Ok(());
        }
        if secs % 60 == 0 && secs / 60 < 60 {
            return Ok(());
        }
        anyhow::bail!(
            "worker interval {}s does not map to a valid cron schedule (expected 1-59s or a whole-minute multiple under 60 minutes)",
            secs
        );
    }
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Canonicalize JSON by sorting all object keys recursively and emitting compact JSON.
fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_interval_accepts_sub_minute_values() {
        let mut cfg = EngineConfig::default();
        cfg.worker_interval_secs = 45;
        assert!(cfg.validate_worker_interval().is_ok());
    }

    #[test]
    fn worker_interval_accepts_whole_minute_multiples() {
        let mut cfg = EngineConfig::default();
        cfg.worker_interval_secs = 300;
        assert!(cfg.validate_worker_interval().is_ok());
    }

    #[test]
    fn worker_interval_rejects_non_minute_multiples_over_a_minute() {
        let mut cfg = EngineConfig::default();
        cfg.worker_interval_secs = 90;
        assert!(cfg.validate_worker_interval().is_err());
    }

    #[test]
    fn canonical_json_is_key_sorted() {
        let loaded = canonicalize_json(&serde_json::json!({"b": 1, "a": 2}));
        assert_eq!(loaded, r#"{"a":2,"b":1}"#);
    }
}
