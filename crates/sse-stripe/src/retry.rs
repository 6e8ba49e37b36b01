use std::future::Future;
use std::time::Duration;

use crate::{backoff_delay, is_transient};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Builds the policy from the engine's configured retry settings (§6:
    /// `max-retries`, initial/max retry delay, retry jitter).
    pub fn from_config(cfg: &sse_config::EngineConfig) -> Self {
        RetryPolicy {
            max_retries: cfg.max_retries,
            initial_delay: Duration::from_millis(cfg.initial_retry_delay_ms),
            max_delay: Duration::from_millis(cfg.max_retry_delay_ms),
            jitter: cfg.retry_jitter,
        }
    }
}

/// Retries `op` with exponential backoff and jitter on rate-limit/transient
/// 5xx errors, up to `policy.max_retries` attempts. Any other error, or
/// exhaustion of retries, propagates immediately.
pub async fn with_retries<F, Fut, T>(policy: RetryPolicy, mut op: F) -> Result<T, stripe::StripeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, stripe::StripeError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if is_transient(&e) && attempt < policy.max_retries => {
                let delay = backoff_delay(policy.initial_delay, policy.max_delay, attempt, policy.jitter);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying transient stripe error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
