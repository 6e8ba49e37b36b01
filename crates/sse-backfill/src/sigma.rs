//! Sigma-backed object pages (§4.D "Sigma-backed objects"). The transport —
//! submitting a SQL query to Sigma and polling for a signed CSV download URL —
//! sits behind [`SigmaClient`], an external collaborator analogous to how
//! `stripe::Client` sits behind `sse-stripe`; only query construction, CSV
//! row-shaping, and cursor math are in scope here.
//!
//! Row parsing mirrors `mqk_db::md`'s CSV ingestion: a case-insensitive
//! header map built once per page, looked up by configured column name.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

use sse_registry::{ListPage, SigmaColumnType, SigmaConfig};

/// The Sigma HTTP transport, injected so the engine's own CSV consumption
/// stays testable without a live Sigma workspace.
#[async_trait]
pub trait SigmaClient: Send + Sync {
    /// Submits `query` and returns the response body as CSV text once ready.
    async fn run_query(&self, query: &str) -> Result<String>;
}

struct HeaderMap {
    idx: HashMap<String, usize>,
}

impl HeaderMap {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let mut idx = HashMap::new();
        for (i, h) in headers.iter().enumerate() {
            idx.insert(h.trim().to_ascii_lowercase(), i);
        }
        HeaderMap { idx }
    }

    fn get<'a>(&self, rec: &'a csv::StringRecord, name: &str) -> Option<&'a str> {
        let i = *self.idx.get(&name.to_ascii_lowercase())?;
        rec.get(i)
    }
}

/// Substitutes `{{cursor}}` in the configured query template with the current
/// cursor value, quoted as a SQL string literal, or with the literal `NULL`
/// when there is none yet (a fresh historical backfill for this Sigma table).
fn build_query(config: &SigmaConfig, cursor: Option<&str>) -> String {
    let cursor_sql = match cursor {
        Some(c) => format!("'{}'", c.replace('\'', "''")),
        None => "NULL".to_string(),
    };
    config
        .query_template
        .replace("{{cursor}}", &cursor_sql)
        .replace("{{page_size}}", &config.page_size.to_string())
}

fn coerce(raw: &str, kind: SigmaColumnType) -> Value {
    match kind {
        SigmaColumnType::Integer => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        SigmaColumnType::Timestamp | SigmaColumnType::Text => Value::String(raw.to_string()),
    }
}

/// Runs the configured query (resuming from `cursor`, or from scratch if
/// `None`), parses the CSV response into upsert-ready JSON rows, and reports
/// the advanced cursor (the last row's leading cursor column) alongside the
/// page. `has_more` is `rows_returned == page_size` per §4.D.
pub async fn fetch_one_page(
    client: &dyn SigmaClient,
    config: &SigmaConfig,
    cursor: Option<&str>,
) -> Result<(ListPage, Option<String>)> {
    let query = build_query(config, cursor);
    let csv_text = client.run_query(&query).await.context("sigma run_query")?;

    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());
    let headers = rdr.headers().context("sigma csv response missing header row")?.clone();
    let header_map = HeaderMap::from_headers(&headers);

    let primary_cursor_col = config
        .cursor_columns
        .first()
        .ok_or_else(|| anyhow!("sigma config for {} has no cursor columns", config.destination_table))?;

    let mut items = Vec::new();
    let mut last_cursor_value: Option<String> = cursor.map(str::to_string);

    for (row_index, rec) in rdr.records().enumerate() {
        let rec = rec.context("sigma csv record read failed")?;
        let mut obj = Map::new();
        for name in header_map.idx.keys() {
            let Some(raw) = header_map.get(&rec, name) else { continue };
            let kind = config
                .cursor_columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name))
                .map(|c| c.kind)
                .unwrap_or(SigmaColumnType::Text);
            obj.insert(name.clone(), coerce(raw, kind));
        }

        if let Some(cursor_raw) = header_map.get(&rec, primary_cursor_col.name) {
            last_cursor_value = Some(cursor_raw.to_string());
        }

        let synthetic_id = format!("{}:{}:{}", config.destination_table, last_cursor_value.clone().unwrap_or_default(), row_index);
        obj.insert("id".to_string(), Value::String(synthetic_id));

        items.push(Value::Object(obj));
    }

    let has_more = items.len() as i64 == config.page_size;
    Ok((ListPage { items, has_more }, last_cursor_value))
}
