//! Truncated-sub-list expansion (§4.E item 2): invoice lines, charge refunds,
//! subscription items, and credit-note lines are all returned in the webhook
//! / backfill payload as a `{data: [...], has_more: bool}` sub-object capped
//! at Stripe's default page size. When `has_more` is true and list expansion
//! is enabled, paginate the sub-resource to completion and replace the
//! payload's sub-list before writing.

use anyhow::Result;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::UpsertEngine;

const DEFAULT_PAGE_SIZE: i64 = 100;

/// Generic pagination loop: starts from whatever's already embedded in
/// `value[list_key]`, fetches subsequent pages via `fetch`, and replaces the
/// sub-list in place once exhausted. A no-op if `has_more` is already false.
pub(crate) async fn expand(
    value: &mut Value,
    list_key: &str,
    mut fetch: impl FnMut(Option<String>, i64) -> BoxFuture<'static, Result<sse_stripe::objects::ListPage>>,
) -> Result<()> {
    let Some(list_obj) = value.get(list_key) else {
        return Ok(());
    };
    let has_more = list_obj.get("has_more").and_then(Value::as_bool).unwrap_or(false);
    if !has_more {
        return Ok(());
    }

    let mut data: Vec<Value> = list_obj
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut starting_after = data
        .last()
        .and_then(|v| v.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    loop {
        let page = fetch(starting_after.clone(), DEFAULT_PAGE_SIZE).await?;
        let page_has_more = page.has_more;
        starting_after = page
            .items
            .last()
            .and_then(|v| v.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        data.extend(page.items);
        if !page_has_more {
            break;
        }
    }

    if let Some(target) = value.get_mut(list_key).and_then(Value::as_object_mut) {
        target.insert("data".to_string(), Value::Array(data));
        target.insert("has_more".to_string(), Value::Bool(false));
    }
    Ok(())
}

pub async fn expand_invoice_lines(engine: &UpsertEngine, value: &mut Value) -> Result<()> {
    let Some(invoice_id) = value.get("id").and_then(Value::as_str).map(str::to_string) else {
        return Ok(());
    };
    let client = engine.client.clone();
    expand(value, "lines", move |starting_after, limit| {
        let client = client.clone();
        let invoice_id = invoice_id.clone();
        Box::pin(async move {
            sse_stripe::objects::list_invoice_line_items(&client, &invoice_id, starting_after, limit).await
        })
    })
    .await
}

pub async fn expand_credit_note_lines(engine: &UpsertEngine, value: &mut Value) -> Result<()> {
    let Some(credit_note_id) = value.get("id").and_then(Value::as_str).map(str::to_string) else {
        return Ok(());
    };
    let client = engine.client.clone();
    expand(value, "lines", move |starting_after, limit| {
        let client = client.clone();
        let credit_note_id = credit_note_id.clone();
        Box::pin(async move {
            sse_stripe::objects::list_credit_note_lines(&client, &credit_note_id, starting_after, limit).await
        })
    })
    .await
}

pub async fn expand_charge_refunds(engine: &UpsertEngine, value: &mut Value) -> Result<()> {
    let Some(charge_id) = value.get("id").and_then(Value::as_str).map(str::to_string) else {
        return Ok(());
    };
    let client = engine.client.clone();
    expand(value, "refunds", move |starting_after, limit| {
        let client = client.clone();
        let charge_id = charge_id.clone();
        Box::pin(async move { sse_stripe::objects::list_refunds_for_charge(&client, &charge_id, starting_after, limit).await })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn no_op_when_has_more_is_false() {
        let mut value = json!({ "id": "in_1", "lines": { "data": [{"id": "il_1"}], "has_more": false } });
        expand(&mut value, "lines", |_, _| {
            Box::pin(async { panic!("fetch must not be called when has_more is false") })
        })
        .await
        .unwrap();
        assert_eq!(value["lines"]["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn paginates_until_has_more_is_false() {
        let mut value = json!({ "id": "in_1", "lines": { "data": [{"id": "il_1"}], "has_more": true } });
        let call_count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let call_count_clone = call_count.clone();
        expand(&mut value, "lines", move |_starting_after, _limit| {
            let n = call_count_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Box::pin(async move {
                if n == 0 {
                    Ok(sse_stripe::objects::ListPage {
                        items: vec![json!({"id": "il_2"})],
                        has_more: true,
                    })
                } else {
                    Ok(sse_stripe::objects::ListPage {
                        items: vec![json!({"id": "il_3"})],
                        has_more: false,
                    })
                }
            })
        })
        .await
        .unwrap();

        let data = value["lines"]["data"].as_array().unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(value["lines"]["has_more"], false);
    }
}
