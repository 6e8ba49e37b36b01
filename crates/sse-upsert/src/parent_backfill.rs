//! Parent backfill (§4.E item 1): before a child write, collect the ids its
//! payload references, find which parent rows are still missing for this
//! account, and retrieve + upsert those before the child row lands.

use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;

use sse_db::gateway::{find_missing_ids, upsert_object_rows, ObjectRow};

use crate::{extract_ref, UpsertEngine};

/// (json field name on the child payload, destination table, stripe retrieve kind)
pub type ParentSpec = (&'static str, &'static str, &'static str);

pub async fn backfill(
    engine: &UpsertEngine,
    items: &[Value],
    account_id: &str,
    specs: &[ParentSpec],
) -> Result<()> {
    for (field, table, kind) in specs {
        let ids: HashSet<String> = items.iter().filter_map(|v| extract_ref(v, field)).collect();
        if ids.is_empty() {
            continue;
        }
        let ids: Vec<String> = ids.into_iter().collect();
        let missing = find_missing_ids(&engine.pool, table, account_id, &ids).await?;
        if missing.is_empty() {
            continue;
        }

        let mut rows = Vec::with_capacity(missing.len());
        for id in &missing {
            match sse_stripe::objects::retrieve(&engine.client, kind, id, &engine.retry_policy).await {
                Ok(raw) => rows.push(ObjectRow { id: id.clone(), raw }),
                Err(err) => {
                    tracing::warn!(error = %err, kind = *kind, id, "parent backfill retrieve failed, skipping");
                }
            }
        }
        if !rows.is_empty() {
            upsert_object_rows(&engine.pool, table, account_id, &rows, Some(Utc::now())).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_ref_handles_string_and_expanded_object() {
        let string_form = json!({ "customer": "cus_1" });
        let expanded_form = json!({ "customer": { "id": "cus_2", "object": "customer" } });
        let missing = json!({});
        assert_eq!(extract_ref(&string_form, "customer"), Some("cus_1".to_string()));
        assert_eq!(extract_ref(&expanded_form, "customer"), Some("cus_2".to_string()));
        assert_eq!(extract_ref(&missing, "customer"), None);
    }
}
