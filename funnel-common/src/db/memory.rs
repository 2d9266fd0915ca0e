//! In-process store
//!
//! Implements [`FunnelStore`] over JSON rows held in memory with the same
//! filter, order and limit semantics as the hosted backend. Used by tests
//! and by the server's `--memory` development mode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use tokio::sync::RwLock;
use tracing::debug;

use super::store::{format_timestamp, Filter, FunnelStore, Select};
use super::tables::Table;
use crate::{Error, Result};

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<Table, Vec<Value>>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently held for `table`
    pub async fn row_count(&self, table: Table) -> usize {
        self.tables
            .read()
            .await
            .get(&table)
            .map_or(0, |rows| rows.len())
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, AtomicOrdering::SeqCst) + 1
    }
}

#[async_trait]
impl FunnelStore for MemoryStore {
    async fn select(&self, query: &Select) -> Result<Vec<Value>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<&Value> = tables
            .get(&query.table)
            .map(|rows| rows.iter().filter(|row| matches_all(row, &query.filters)).collect())
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare_nullable(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|row| project(row, &query.columns))
            .collect())
    }

    async fn count(&self, query: &Select) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&query.table)
            .map_or(0, |rows| rows.iter().filter(|row| matches_all(row, &query.filters)).count())
            as u64)
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value> {
        let Value::Object(mut fields) = row else {
            return Err(Error::InvalidInput(format!("{} rows must be JSON objects", table)));
        };

        let id = self.allocate_id();
        fields.insert("id".to_string(), Value::from(id));
        if !fields.get("created_at").is_some_and(|v| !v.is_null()) {
            fields.insert(
                "created_at".to_string(),
                Value::String(format_timestamp(crate::time::now())),
            );
        }

        let stored = Value::Object(fields);
        self.tables
            .write()
            .await
            .entry(table)
            .or_default()
            .push(stored.clone());
        debug!(table = %table, id, "memory insert");
        Ok(stored)
    }

    async fn update(&self, table: Table, id: i64, patch: Value) -> Result<Value> {
        let Value::Object(patch) = patch else {
            return Err(Error::InvalidInput("patch must be a JSON object".to_string()));
        };

        let mut tables = self.tables.write().await;
        let row = tables
            .get_mut(&table)
            .and_then(|rows| rows.iter_mut().find(|row| row_id(row) == Some(id)))
            .ok_or_else(|| Error::NotFound(format!("{} row {}", table, id)))?;

        if let Value::Object(fields) = row {
            for (key, value) in patch {
                if key != "id" {
                    fields.insert(key, value);
                }
            }
        }
        Ok(row.clone())
    }

    async fn delete(&self, table: Table, id: i64) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(&table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| row_id(row) != Some(id));
        Ok((before - rows.len()) as u64)
    }
}

fn row_id(row: &Value) -> Option<i64> {
    row.get("id").and_then(Value::as_i64)
}

fn project(row: &Value, columns: &[String]) -> Value {
    if columns.is_empty() {
        return row.clone();
    }
    let mut out = Map::new();
    for column in columns {
        out.insert(
            column.clone(),
            row.get(column).cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(out)
}

fn matches_all(row: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| {
        let cell = row.get(filter.column()).unwrap_or(&Value::Null);
        match filter {
            Filter::Gte(_, bound) => {
                !cell.is_null()
                    && matches!(compare(cell, bound), Some(Ordering::Greater | Ordering::Equal))
            }
            Filter::Eq(_, expected) => {
                if expected.is_null() {
                    cell.is_null()
                } else {
                    compare(cell, expected) == Some(Ordering::Equal)
                }
            }
        }
    })
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Compare two JSON scalars the way the backend would compare column values
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(tx), Some(ty)) => Some(tx.cmp(&ty)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Ordering used by `order`: nulls and incomparable values sort last
fn compare_nullable(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (Some(a), Some(b)) => compare(a, b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        for (ts, source) in [
            ("2026-03-01T09:00:00Z", Some("reddit")),
            ("2026-03-02T09:00:00Z", None),
            ("2026-03-03T09:00:00.5+00:00", Some("twitter")),
        ] {
            store
                .insert(
                    Table::Pageviews,
                    json!({"session_id": "s", "created_at": ts, "utm_source": source}),
                )
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_insert_assigns_ids() {
        let store = seeded().await;
        let rows = store.select(&Select::from(Table::Pageviews)).await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_gte_compares_timestamps_not_strings() {
        let store = seeded().await;
        let q = Select::from(Table::Pageviews).gte("created_at", "2026-03-02T00:00:00.000000Z");
        assert_eq!(store.count(&q).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_eq_null_matches_missing_values() {
        let store = seeded().await;
        let q = Select::from(Table::Pageviews).eq("utm_source", Value::Null);
        assert_eq!(store.count(&q).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_order_limit_and_projection() {
        let store = seeded().await;
        let q = Select::from(Table::Pageviews)
            .columns(&["utm_source"])
            .order("created_at", false)
            .limit(2);
        let rows = store.select(&q).await.unwrap();
        assert_eq!(rows, vec![json!({"utm_source": "twitter"}), json!({"utm_source": null})]);
    }

    #[tokio::test]
    async fn test_update_merges_and_missing_row_is_not_found() {
        let store = seeded().await;
        let updated = store
            .update(Table::Pageviews, 2, json!({"utm_source": "tiktok", "id": 99}))
            .await
            .unwrap();
        assert_eq!(updated["utm_source"], "tiktok");
        assert_eq!(updated["id"], 2);

        let err = store.update(Table::Pageviews, 42, json!({})).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_exactly_one_row() {
        let store = seeded().await;
        assert_eq!(store.delete(Table::Pageviews, 1).await.unwrap(), 1);
        assert_eq!(store.delete(Table::Pageviews, 1).await.unwrap(), 0);
        assert_eq!(store.row_count(Table::Pageviews).await, 2);
        assert_eq!(store.delete(Table::Redgifs, 1).await.unwrap(), 0);
    }
}
