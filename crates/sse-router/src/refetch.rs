//! Re-fetch policy (§4.C "Re-fetch policy"): for a handler whose kind is in
//! the engine's configured `revalidate_via_api` set, objects not already in a
//! terminal per-kind state are re-retrieved from Stripe rather than trusting
//! the webhook body.

use serde_json::Value;

/// True if `kind`'s payload is already in a state later events cannot
/// meaningfully improve on. Kinds with no named terminal predicate (most of
/// the registry) default to `true` — re-fetching them would never be
/// requested in the first place since they're unlikely entries in
/// `revalidate_via_api`, but the default keeps this total rather than
/// panicking on an unrecognized kind.
pub fn is_terminal(kind: &str, payload: &Value) -> bool {
    let status = payload.get("status").and_then(Value::as_str);
    match kind {
        "charge" => matches!(status, Some("succeeded") | Some("failed")),
        "subscription" => status == Some("canceled"),
        "payment_intent" => matches!(status, Some("succeeded") | Some("canceled")),
        "invoice" => matches!(status, Some("paid") | Some("void") | Some("uncollectible")),
        _ => true,
    }
}

/// True if this handler should re-fetch `kind`'s object from Stripe instead
/// of trusting the webhook payload.
pub fn should_refetch(kind: &str, payload: &Value, revalidate_via_api: &[String]) -> bool {
    revalidate_via_api.iter().any(|k| k == kind) && !is_terminal(kind, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn charge_succeeded_is_terminal() {
        assert!(is_terminal("charge", &json!({ "status": "succeeded" })));
        assert!(!is_terminal("charge", &json!({ "status": "pending" })));
    }

    #[test]
    fn should_refetch_only_when_kind_configured_and_not_terminal() {
        let revalidate = vec!["charge".to_string()];
        assert!(should_refetch("charge", &json!({ "status": "pending" }), &revalidate));
        assert!(!should_refetch("charge", &json!({ "status": "succeeded" }), &revalidate));
        assert!(!should_refetch("invoice", &json!({ "status": "open" }), &revalidate));
    }
}
