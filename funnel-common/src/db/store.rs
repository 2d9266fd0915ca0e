//! Store abstraction over the hosted backend
//!
//! The backend exposes table-level select/insert/update/delete filtered by
//! timestamp ranges and equality predicates. [`FunnelStore`] mirrors exactly
//! that surface on untyped JSON rows so it stays object safe; the typed
//! helpers at the bottom of this module convert to and from the row models.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::tables::{Record, Table};
use crate::{Error, Result};

/// Row filter predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column >= value`
    Gte(String, Value),
    /// `column = value`
    Eq(String, Value),
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Gte(column, _) | Filter::Eq(column, _) => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Range-filtered read against one table
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: Table,
    /// Projected columns; empty means all columns
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Select {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            columns: Vec::new(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn gte(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gte(column.to_string(), value.into()));
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    /// Rows created at or after `cutoff`
    pub fn since(self, cutoff: DateTime<Utc>) -> Self {
        self.gte("created_at", format_timestamp(cutoff))
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Column list as sent on the wire (`*` when unprojected)
    pub fn select_param(&self) -> String {
        if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(",")
        }
    }
}

/// Timestamp format used in filters and on inserted rows
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Table-level access to the hosted backend
///
/// Implementations provide per-row atomicity only; there are no
/// multi-row transactions and no conflict detection (last write wins).
#[async_trait]
pub trait FunnelStore: Send + Sync {
    /// Rows matching the query, projected to the requested columns
    async fn select(&self, query: &Select) -> Result<Vec<Value>>;

    /// Number of rows matching the query filters (order/limit ignored)
    async fn count(&self, query: &Select) -> Result<u64>;

    /// Insert one row, returning the stored representation
    async fn insert(&self, table: Table, row: Value) -> Result<Value>;

    /// Update the row with `id`, returning the stored representation
    ///
    /// Returns [`Error::NotFound`] when no row has that id.
    async fn update(&self, table: Table, id: i64, patch: Value) -> Result<Value>;

    /// Delete the row with `id`, returning the number of rows removed
    async fn delete(&self, table: Table, id: i64) -> Result<u64>;
}

/// Select and deserialize into any projection type
pub async fn fetch<T: DeserializeOwned>(store: &dyn FunnelStore, query: &Select) -> Result<Vec<T>> {
    store
        .select(query)
        .await?
        .into_iter()
        .map(|row| serde_json::from_value(row).map_err(Error::from))
        .collect()
}

/// Select full rows of a record type
pub async fn fetch_records<R: Record>(store: &dyn FunnelStore, query: &Select) -> Result<Vec<R>> {
    if query.table != R::TABLE {
        return Err(Error::Internal(format!(
            "select on {} cannot yield rows of {}",
            query.table,
            R::TABLE
        )));
    }
    fetch(store, query).await
}

pub async fn insert_row<R: Record, I: Serialize + Sync>(store: &dyn FunnelStore, row: &I) -> Result<R> {
    let stored = store.insert(R::TABLE, serde_json::to_value(row)?).await?;
    Ok(serde_json::from_value(stored)?)
}

pub async fn update_row<R: Record, P: Serialize + Sync>(
    store: &dyn FunnelStore,
    id: i64,
    patch: &P,
) -> Result<R> {
    let patch = serde_json::to_value(patch)?;
    if patch.as_object().map_or(true, |fields| fields.is_empty()) {
        return Err(Error::InvalidInput("update contains no fields".to_string()));
    }
    let stored = store.update(R::TABLE, id, patch).await?;
    Ok(serde_json::from_value(stored)?)
}
