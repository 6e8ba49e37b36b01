//! Secrets resolution for the Stripe sync engine.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"STRIPE_SECRET_KEY"`).
//! - Callers invoke [`resolve_secrets`] once at startup.
//! - The returned [`ResolvedSecrets`] is passed into constructors; never scatter
//!   `std::env::var` calls across the codebase.
//! - `Debug` redacts every value.
//! - Error messages reference the env var **NAME**, never the value.
//!
//! Only the Stripe secret key is required; everything else (Connect account id,
//! static webhook signing secret, worker queue secret) is optional because the
//! engine can fall back to a managed-webhook row or simply not need it.

use anyhow::{bail, Result};
use serde_json::Value;

/// All runtime-resolved secrets for one engine instantiation.
///
/// Built **once** at startup via [`resolve_secrets`]. Pass to constructors.
/// **Values are redacted in `Debug` output.**
#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Stripe secret key (`sk_live_...` / `sk_test_...`). Always present.
    pub stripe_secret_key: String,
    /// Connect account id to act on behalf of, if this deployment targets a
    /// specific connected account rather than the platform account.
    pub stripe_connect_account_id: Option<String>,
    /// Static webhook signing secret. `None` if signature verification should
    /// instead resolve the secret from the managed-webhook mirror row.
    pub webhook_signing_secret: Option<String>,
    /// Shared secret compared constant-time to authorize worker-queue callers.
    pub worker_secret: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("stripe_secret_key", &"<REDACTED>")
            .field("stripe_connect_account_id", &self.stripe_connect_account_id)
            .field(
                "webhook_signing_secret",
                &self.webhook_signing_secret.as_ref().map(|_| "<REDACTED>"),
            )
            .field(
                "worker_secret",
                &self.worker_secret.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Env var names extracted from the config JSON. These are the NAMES stored in
/// YAML — not values.
struct SecretEnvNames {
    stripe_secret_key_var: String,
    stripe_connect_account_id_var: Option<String>,
    webhook_signing_secret_var: Option<String>,
    worker_secret_var: Option<String>,
}

fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Resolve a named environment variable. Returns `None` if unset or blank.
/// Never returns the value in an error path — callers report the NAME only.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn parse_env_names(config_json: &Value) -> SecretEnvNames {
    SecretEnvNames {
        stripe_secret_key_var: read_str_at(config_json, "/stripe/keys_env/secret_key")
            .unwrap_or_else(|| "STRIPE_SECRET_KEY".to_string()),
        stripe_connect_account_id_var: read_str_at(
            config_json,
            "/stripe/keys_env/connect_account_id",
        ),
        webhook_signing_secret_var: read_str_at(config_json, "/stripe/keys_env/webhook_secret"),
        worker_secret_var: read_str_at(config_json, "/worker/keys_env/secret"),
    }
}

/// Resolve all secrets from the environment using the env-var names declared in
/// `config_json` (falling back to well-known default names).
///
/// # Errors
/// Returns `Err` naming the **env var NAME** of the missing `stripe_secret_key`.
/// The actual value is never mentioned.
pub fn resolve_secrets(config_json: &Value) -> Result<ResolvedSecrets> {
    let names = parse_env_names(config_json);

    let stripe_secret_key = match resolve_env(&names.stripe_secret_key_var) {
        Some(v) => v,
        None => bail!(
            "SECRETS_MISSING: required env var '{}' (stripe secret key) is not set or empty",
            names.stripe_secret_key_var
        ),
    };

    Ok(ResolvedSecrets {
        stripe_secret_key,
        stripe_connect_account_id: names
            .stripe_connect_account_id_var
            .as_deref()
            .and_then(resolve_env),
        webhook_signing_secret: names
            .webhook_signing_secret_var
            .as_deref()
            .and_then(resolve_env),
        worker_secret: names.worker_secret_var.as_deref().and_then(resolve_env),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_never_contains_secret_values() {
        let secrets = ResolvedSecrets {
            stripe_secret_key: "sk_live_super_secret".to_string(),
            stripe_connect_account_id: Some("acct_123".to_string()),
            webhook_signing_secret: Some("whsec_super_secret".to_string()),
            worker_secret: Some("worker_super_secret".to_string()),
        };
        let rendered = format!("{:?}", secrets);
        assert!(!rendered.contains("super_secret"));
        assert!(rendered.contains("<REDACTED>"));
        assert!(rendered.contains("acct_123"));
    }

    #[test]
    fn missing_required_key_names_the_env_var_not_a_value() {
        std::env::remove_var("STRIPE_SECRET_KEY_TEST_MISSING");
        let config = serde_json::json!({
            "stripe": { "keys_env": { "secret_key": "STRIPE_SECRET_KEY_TEST_MISSING" } }
        });
        let err = resolve_secrets(&config).unwrap_err();
        assert!(err.to_string().contains("STRIPE_SECRET_KEY_TEST_MISSING"));
    }
}
