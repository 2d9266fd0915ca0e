//! Hosted backend client
//!
//! Talks to the backend's PostgREST-style table API:
//!
//! - `GET    {base}/rest/v1/{table}?select=..&col=gte.v&order=col.asc&limit=n`
//! - `HEAD`  with `Prefer: count=exact` for counts (`Content-Range: */N`)
//! - `POST`  with `Prefer: return=representation` for inserts
//! - `PATCH` / `DELETE` with `?id=eq.N`
//!
//! Every request carries the project key both as `apikey` and as a bearer
//! token. There is no retry policy beyond what reqwest does by default.

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::store::{Filter, FunnelStore, Select};
use super::tables::Table;
use crate::config::BackendConfig;
use crate::{Error, Result};

pub struct RestStore {
    http_client: Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    /// Create a client for the backend at `base_url`
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| Error::Config("backend.url is not configured".to_string()))?;
        let key = config
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Config("backend.api_key is not configured".to_string()))?;
        Self::new(url, key, Duration::from_secs(config.timeout_secs))
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.name())
    }

    fn request(&self, method: Method, table: Table) -> RequestBuilder {
        self.http_client
            .request(method, self.table_url(table))
            .header("apikey", &self.api_key)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        warn!(status = status.as_u16(), %message, "backend request failed");
        Err(Error::Backend {
            status: status.as_u16(),
            message,
        })
    }

    /// First row of a `return=representation` response
    async fn single_row(response: Response, table: Table, id: Option<i64>) -> Result<Value> {
        let rows: Vec<Value> = response.json().await?;
        rows.into_iter().next().ok_or_else(|| match id {
            Some(id) => Error::NotFound(format!("{} row {}", table, id)),
            None => Error::Internal(format!("{} insert returned no row", table)),
        })
    }
}

/// Query string pairs for a select (filters, order, limit)
pub fn query_params(query: &Select, include_projection: bool) -> Vec<(String, String)> {
    let mut params = Vec::new();
    if include_projection {
        params.push(("select".to_string(), query.select_param()));
    }
    for filter in &query.filters {
        let (op, column, value) = match filter {
            Filter::Gte(column, value) => ("gte", column, value),
            Filter::Eq(column, value) => ("eq", column, value),
        };
        let rendered = match value {
            Value::Null => {
                params.push((column.clone(), "is.null".to_string()));
                continue;
            }
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        params.push((column.clone(), format!("{}.{}", op, rendered)));
    }
    if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

/// Total from a `Content-Range` header such as `0-24/120` or `*/0`
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

#[async_trait]
impl FunnelStore for RestStore {
    async fn select(&self, query: &Select) -> Result<Vec<Value>> {
        debug!(table = %query.table, "backend select");
        let response = self
            .request(Method::GET, query.table)
            .query(&query_params(query, true))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn count(&self, query: &Select) -> Result<u64> {
        let mut count_query = query.clone();
        count_query.order = None;
        count_query.limit = None;
        let mut params = query_params(&count_query, false);
        params.push(("select".to_string(), "id".to_string()));

        let response = self
            .request(Method::HEAD, query.table)
            .header("Prefer", "count=exact")
            .query(&params)
            .send()
            .await?;
        let response = Self::check(response).await?;

        // An absent header means the backend found nothing to count
        Ok(response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .unwrap_or(0))
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value> {
        debug!(table = %table, "backend insert");
        let response = self
            .request(Method::POST, table)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        Self::single_row(Self::check(response).await?, table, None).await
    }

    async fn update(&self, table: Table, id: i64, patch: Value) -> Result<Value> {
        debug!(table = %table, id, "backend update");
        let response = self
            .request(Method::PATCH, table)
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{}", id))])
            .json(&patch)
            .send()
            .await?;
        Self::single_row(Self::check(response).await?, table, Some(id)).await
    }

    async fn delete(&self, table: Table, id: i64) -> Result<u64> {
        debug!(table = %table, id, "backend delete");
        let response = self
            .request(Method::DELETE, table)
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{}", id))])
            .send()
            .await?;
        let removed: Vec<Value> = Self::check(response).await?.json().await?;
        Ok(removed.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_query_params_render_postgrest_syntax() {
        let cutoff = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let q = Select::from(Table::EmailSignups)
            .columns(&["created_at", "email", "source"])
            .since(cutoff)
            .eq("opened", true)
            .order("created_at", false)
            .limit(10);

        assert_eq!(
            query_params(&q, true),
            vec![
                ("select".to_string(), "created_at,email,source".to_string()),
                ("created_at".to_string(), "gte.2026-03-01T00:00:00.000000Z".to_string()),
                ("opened".to_string(), "eq.true".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn test_null_filter_uses_is_null() {
        let q = Select::from(Table::Pageviews).eq("utm_source", Value::Null);
        assert_eq!(
            query_params(&q, false),
            vec![("utm_source".to_string(), "is.null".to_string())]
        );
    }

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("0-24/120"), Some(120));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("*/*"), None);
    }

    #[test]
    fn test_table_url_trims_trailing_slash() {
        let store = RestStore::new("https://proj.example.co/", "key", Duration::from_secs(5)).unwrap();
        assert_eq!(
            store.table_url(Table::ScheduledPosts),
            "https://proj.example.co/rest/v1/eva_scheduled_posts"
        );
    }

    #[test]
    fn test_from_config_requires_url() {
        let config = BackendConfig::default();
        assert!(matches!(RestStore::from_config(&config), Err(Error::Config(_))));
    }
}
