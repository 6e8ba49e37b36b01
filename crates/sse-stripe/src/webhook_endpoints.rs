//! Stripe webhook-endpoint CRUD used by the Managed Webhook Reconciler
//! (`sse-webhook-reconcile`). Centralized here for the same reason as
//! `objects.rs`: one place owns the exact `async-stripe` call shapes.

use std::collections::HashMap;

use anyhow::{Context, Result};
use stripe::{Client, WebhookEndpoint, WebhookEndpointId};

/// Normalizes a `metadata.managed_by` (or legacy description) value the way
/// the reconciler's ownership check does: lowercase, strip spaces/hyphens.
/// `"Stripe-Sync"`, `"stripe sync"`, and `"stripesync"` all normalize equal.
pub fn normalize_managed_by(raw: &str) -> String {
    raw.to_ascii_lowercase()
        .chars()
        .filter(|c| *c != ' ' && *c != '-')
        .collect()
}

pub const MANAGED_BY_VALUE: &str = "stripe-sync";
pub const MANAGED_BY_NORMALIZED: &str = "stripesync";

pub fn is_managed(endpoint: &WebhookEndpoint) -> bool {
    if let Some(v) = endpoint.metadata.get("managed_by") {
        if normalize_managed_by(v) == MANAGED_BY_NORMALIZED {
            return true;
        }
    }
    endpoint
        .description
        .as_deref()
        .map(|d| d.to_ascii_lowercase().contains("stripesync"))
        .unwrap_or(false)
}

pub async fn retrieve(client: &Client, id: &str) -> Result<WebhookEndpoint> {
    let id: WebhookEndpointId = id.parse().context("parse webhook endpoint id")?;
    WebhookEndpoint::retrieve(client, &id, &[])
        .await
        .context("stripe webhook endpoint retrieve")
}

pub async fn delete(client: &Client, id: &str) -> Result<()> {
    let id: WebhookEndpointId = id.parse().context("parse webhook endpoint id")?;
    WebhookEndpoint::delete(client, &id)
        .await
        .context("stripe webhook endpoint delete")?;
    Ok(())
}

/// Lists every webhook endpoint on the account, page size 100, following
/// `has_more` until exhausted.
pub async fn list_all(client: &Client) -> Result<Vec<WebhookEndpoint>> {
    let mut out = Vec::new();
    let mut starting_after: Option<WebhookEndpointId> = None;
    loop {
        let mut params = stripe::ListWebhookEndpoints::new();
        params.limit = Some(100);
        params.starting_after = starting_after.clone();
        let page = WebhookEndpoint::list(client, &params)
            .await
            .context("stripe webhook endpoint list")?;
        let has_more = page.has_more;
        let last_id = page.data.last().map(|e| e.id.clone());
        out.extend(page.data);
        if !has_more {
            break;
        }
        starting_after = last_id;
    }
    Ok(out)
}

/// Creates a new managed endpoint: the target url, the engine's default
/// enabled-event set, and `metadata.managed_by = "stripe-sync"` +
/// `metadata.version` always injected.
pub async fn create(
    client: &Client,
    url: &str,
    enabled_events: &[stripe::EventType],
    version: &str,
) -> Result<WebhookEndpoint> {
    let mut metadata = HashMap::new();
    metadata.insert("managed_by".to_string(), MANAGED_BY_VALUE.to_string());
    metadata.insert("version".to_string(), version.to_string());

    let mut params = stripe::CreateWebhookEndpoint::new(url, enabled_events);
    params.metadata = Some(metadata);
    params.description = Some("managed by stripe-sync");

    WebhookEndpoint::create(client, params)
        .await
        .context("stripe webhook endpoint create")
}
