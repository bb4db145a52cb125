//! PostgREST store client
//!
//! Reads page through tables in fixed-size chunks using `Range` requests;
//! the total comes from `Content-Range` when the server reports one.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    AssignmentStore, GoldStore, ItemPage, ItemStore, RoutingConfigSource, RoutingStateStore, StoreError,
};
use crate::config::AllocConfig;
use crate::model::{AssignmentRecord, ItemRow};
use crate::routing::ItemRoutingState;

/// Identifiers per `in.(...)` filter
const ID_BATCH: usize = 100;

/// Client for the hosted PostgREST API
#[derive(Debug, Clone)]
pub struct RestStore {
    http: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
    config: AllocConfig,
}

impl RestStore {
    /// Build from configuration; fails when credentials are absent
    pub fn new(http: reqwest::Client, config: &AllocConfig) -> Result<Self, StoreError> {
        let (url, key) = config
            .store_credentials()
            .ok_or_else(|| StoreError::NotConfigured("store url and key are required".to_string()))?;

        let mut headers = HeaderMap::new();
        let api_key = HeaderValue::from_str(key)
            .map_err(|e| StoreError::NotConfigured(format!("invalid store key: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", key))
            .map_err(|e| StoreError::NotConfigured(format!("invalid store key: {}", e)))?;
        headers.insert("apikey", api_key);
        headers.insert(AUTHORIZATION, bearer);

        Ok(Self {
            http,
            base_url: format!("{}/rest/v1", url.trim_end_matches('/')),
            headers,
            config: config.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    /// Error from a non-success response body
    async fn response_error(response: reqwest::Response, table: &str, columns: &[String]) -> StoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| if body.is_empty() { format!("HTTP {}", status) } else { body });
        StoreError::classify(&message, table, columns)
    }

    /// Read every row matching `filters`, `chunk` rows per request
    async fn get_paged(
        &self,
        table: &str,
        columns: &[String],
        filters: &[(String, String)],
        timeout: Duration,
    ) -> Result<(Vec<Value>, Option<usize>), StoreError> {
        let chunk = self.config.store.page_chunk.max(1);
        let select = columns.join(",");
        let mut rows = Vec::new();
        let mut total: Option<usize> = None;
        let mut offset = 0usize;

        loop {
            let response = self
                .http
                .get(self.table_url(table))
                .headers(self.headers.clone())
                .header("Range-Unit", "items")
                .header("Range", format!("{}-{}", offset, offset + chunk - 1))
                .header("Prefer", "count=exact")
                .query(&[("select", select.as_str())])
                .query(filters)
                .timeout(timeout)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(Self::response_error(response, table, columns).await);
            }

            if total.is_none() {
                total = response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_content_range_total);
            }

            let page: Vec<Value> = response.json().await?;
            let received = page.len();
            rows.extend(page);
            offset += received;

            debug!(table, received, offset, "Read page");

            if received < chunk || total.is_some_and(|t| offset >= t) {
                break;
            }
        }

        Ok((rows, total))
    }

    async fn fetch_assignment_rows(&self, with_pass: bool) -> Result<Vec<Value>, StoreError> {
        let a = &self.config.assignments;
        let mut columns = vec![a.file_column.clone(), a.user_column.clone(), a.time_column.clone()];
        if with_pass {
            columns.push(a.pass_column.clone());
        }
        let (rows, _) = self
            .get_paged(&a.table, &columns, &[], self.config.store.assignments_timeout)
            .await?;
        Ok(rows)
    }
}

/// Total from a `Content-Range` value such as `0-999/2345`
pub fn parse_content_range_total(value: &str) -> Option<usize> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Text form of a scalar cell
fn cell_text(row: &Map<String, Value>, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// PostgREST `in.(...)` list with every value quoted
fn in_filter(ids: &[String]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

#[async_trait]
impl ItemStore for RestStore {
    async fn fetch_keep_items(&self) -> Result<ItemPage, StoreError> {
        let items = &self.config.items;
        let columns = items.projection();
        let filters = vec![(items.decision_column.clone(), format!("eq.{}", items.keep_value))];

        let (rows, total) = self
            .get_paged(&items.table, &columns, &filters, self.config.store.items_timeout)
            .await?;

        let read = rows.len();
        let rows: Vec<ItemRow> = rows
            .into_iter()
            .filter_map(|row| ItemRow::from_json(row, &items.file_column))
            .collect();
        if rows.len() < read {
            debug!(dropped = read - rows.len(), "Dropped item rows without an identifier");
        }

        info!(table = %items.table, rows = rows.len(), total = ?total, "Fetched keep items");
        Ok(ItemPage {
            total: total.unwrap_or(read),
            rows,
        })
    }
}

#[async_trait]
impl AssignmentStore for RestStore {
    async fn fetch_assignments(&self) -> Result<Vec<AssignmentRecord>, StoreError> {
        let a = &self.config.assignments;
        let rows = match self.fetch_assignment_rows(true).await {
            Err(StoreError::MissingColumns(missing)) if missing.contains(&a.pass_column) => {
                warn!(column = %a.pass_column, "Assignment table has no pass column, treating all rows as first passes");
                self.fetch_assignment_rows(false).await?
            }
            other => other?,
        };

        let records = rows
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|row| {
                Some(AssignmentRecord {
                    item_id: cell_text(row, &a.file_column)?,
                    annotator_id: cell_text(row, &a.user_column).unwrap_or_default(),
                    pass_number: row
                        .get(&a.pass_column)
                        .and_then(Value::as_u64)
                        .map(|n| n.clamp(1, u8::MAX as u64) as u8)
                        .unwrap_or(1),
                    assigned_at: row
                        .get(&a.time_column)
                        .and_then(Value::as_str)
                        .and_then(dqa_common::time::parse_timestamp),
                })
            })
            .collect::<Vec<_>>();

        debug!(rows = records.len(), "Fetched assignment rows");
        Ok(records)
    }

    async fn insert_assignments(&self, rows: &[AssignmentRecord]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let a = &self.config.assignments;
        let body: Vec<Value> = rows
            .iter()
            .map(|r| {
                let mut row = Map::new();
                row.insert(a.file_column.clone(), json!(r.item_id));
                row.insert(a.user_column.clone(), json!(r.annotator_id));
                row.insert(
                    a.time_column.clone(),
                    json!(r.assigned_at.unwrap_or_else(dqa_common::time::now).to_rfc3339()),
                );
                row.insert(a.pass_column.clone(), json!(r.pass_number));
                Value::Object(row)
            })
            .collect();

        let response = self
            .http
            .post(self.table_url(&a.table))
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header("Prefer", "return=minimal")
            .json(&body)
            .timeout(self.config.store.assignments_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let columns = vec![a.file_column.clone(), a.user_column.clone(), a.time_column.clone(), a.pass_column.clone()];
            return Err(Self::response_error(response, &a.table, &columns).await);
        }
        info!(rows = rows.len(), "Wrote assignment leases");
        Ok(())
    }
}

#[async_trait]
impl GoldStore for RestStore {
    async fn fetch_gold_ids(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let gold = &self.config.gold;
        let Some(table) = &gold.table else {
            return Ok(Vec::new());
        };

        let response = self
            .http
            .get(self.table_url(table))
            .headers(self.headers.clone())
            .query(&[("select", gold.file_column.clone()), ("limit", limit.max(1).to_string())])
            .timeout(self.config.store.gold_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::response_error(response, table, std::slice::from_ref(&gold.file_column)).await);
        }

        let rows: Vec<Value> = response.json().await?;
        Ok(rows
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|row| cell_text(row, &gold.file_column))
            .collect())
    }
}

#[async_trait]
impl RoutingStateStore for RestStore {
    async fn fetch_states(&self, item_ids: &[String]) -> Result<HashMap<String, ItemRoutingState>, StoreError> {
        let r = &self.config.routing;
        let columns = vec![r.state_file_column.clone(), r.state_column.clone()];
        let mut states = HashMap::new();

        for batch in item_ids.chunks(ID_BATCH) {
            let response = self
                .http
                .get(self.table_url(&r.state_table))
                .headers(self.headers.clone())
                .query(&[
                    ("select".to_string(), columns.join(",")),
                    (r.state_file_column.clone(), in_filter(batch)),
                ])
                .timeout(self.config.store.items_timeout)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(Self::response_error(response, &r.state_table, &columns).await);
            }

            let rows: Vec<Value> = response.json().await?;
            for row in rows.iter().filter_map(Value::as_object) {
                let Some(id) = cell_text(row, &r.state_file_column) else {
                    continue;
                };
                let raw = row.get(&r.state_column).cloned().unwrap_or(Value::Null);
                let state = ItemRoutingState::from_json(&raw, &id, &r.namespace);
                states.insert(id, state);
            }
        }

        Ok(states)
    }
}

#[async_trait]
impl RoutingConfigSource for RestStore {
    async fn fetch_routing_config(&self) -> Result<Option<Value>, StoreError> {
        let r = &self.config.routing;
        let response = self
            .http
            .get(self.table_url(&r.config_table))
            .headers(self.headers.clone())
            .query(&[
                ("select", "value".to_string()),
                ("key", format!("eq.{}", r.config_key)),
                ("limit", "1".to_string()),
            ])
            .timeout(self.config.store.gold_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::response_error(response, &r.config_table, &["key".to_string(), "value".to_string()]).await);
        }

        let rows: Vec<Value> = response.json().await?;
        let value = rows.into_iter().next().and_then(|row| row.get("value").cloned());
        Ok(match value {
            Some(Value::String(text)) => Some(
                serde_json::from_str::<Value>(&text).map_err(|e| StoreError::Decode(e.to_string()))?,
            ),
            Some(Value::Null) | None => None,
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_range_total() {
        assert_eq!(parse_content_range_total("0-999/2345"), Some(2345));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-9/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn test_in_filter_quotes_values() {
        let ids = vec!["a.wav".to_string(), "b,\"c\".wav".to_string()];
        assert_eq!(in_filter(&ids), r#"in.("a.wav","b,\"c\".wav")"#);
    }

    #[test]
    fn test_requires_credentials() {
        let config = AllocConfig::default();
        assert!(matches!(
            RestStore::new(reqwest::Client::new(), &config),
            Err(StoreError::NotConfigured(_))
        ));

        let mut config = AllocConfig::default();
        config.store.url = Some("https://db.example/".to_string());
        config.store.key = Some("k".to_string());
        let store = RestStore::new(reqwest::Client::new(), &config).unwrap();
        assert_eq!(store.table_url("keep"), "https://db.example/rest/v1/keep");
    }
}
