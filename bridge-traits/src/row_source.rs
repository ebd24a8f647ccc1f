//! Row Source Abstraction
//!
//! A row-oriented relational store reachable through filtered select and
//! delete. Rows are JSON objects keyed by column name so the sync core never
//! depends on a concrete schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::error::Result;

/// One record as returned by the store.
pub type Row = Map<String, Value>;

/// Column predicate.
///
/// Range filters compare RFC 3339 timestamps chronologically, numbers
/// numerically and everything else as text.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    /// Column is null, missing, or an empty JSON array.
    Empty(String),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(column.into(), value.into())
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(column.into(), value.into())
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(column.into(), value.into())
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte(column.into(), value.into())
    }

    pub fn empty(column: impl Into<String>) -> Self {
        Filter::Empty(column.into())
    }

    /// Range filter on a timestamp column, encoded as RFC 3339.
    pub fn after(column: impl Into<String>, instant: DateTime<Utc>) -> Self {
        Filter::Gt(column.into(), Value::String(instant.to_rfc3339()))
    }

    /// Range filter on a timestamp column, encoded as RFC 3339.
    pub fn before(column: impl Into<String>, instant: DateTime<Utc>) -> Self {
        Filter::Lt(column.into(), Value::String(instant.to_rfc3339()))
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(c, _)
            | Filter::Gt(c, _)
            | Filter::Gte(c, _)
            | Filter::Lt(c, _)
            | Filter::Lte(c, _)
            | Filter::Empty(c) => c,
        }
    }

    /// Evaluate the predicate against an in-memory row.
    pub fn matches(&self, row: &Row) -> bool {
        let cell = row.get(self.column());
        match self {
            Filter::Empty(_) => match cell {
                None | Some(Value::Null) => true,
                Some(Value::Array(items)) => items.is_empty(),
                Some(_) => false,
            },
            Filter::Eq(_, expected) => {
                cell.map_or(false, |v| compare_values(v, expected) == Some(Ordering::Equal))
            }
            Filter::Gt(_, bound) => Self::range(cell, bound, |o| o == Ordering::Greater),
            Filter::Gte(_, bound) => Self::range(cell, bound, |o| o != Ordering::Less),
            Filter::Lt(_, bound) => Self::range(cell, bound, |o| o == Ordering::Less),
            Filter::Lte(_, bound) => Self::range(cell, bound, |o| o != Ordering::Greater),
        }
    }

    fn range(cell: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
        match cell {
            None | Some(Value::Null) => false,
            Some(value) => compare_values(value, bound).map_or(false, accept),
        }
    }
}

/// Order two cell values the way the store would.
///
/// Returns `None` when the values are not comparable (e.g. object vs number).
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => {
            match (
                DateTime::parse_from_rfc3339(a),
                DateTime::parse_from_rfc3339(b),
            ) {
                (Ok(a), Ok(b)) => Some(a.cmp(&b)),
                _ => Some(a.cmp(b)),
            }
        }
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        // Identity columns are sometimes numeric in the store and textual in filters
        (Value::Number(n), Value::String(s)) => Some(n.to_string().as_str().cmp(s.as_str())),
        (Value::String(s), Value::Number(n)) => Some(s.as_str().cmp(n.to_string().as_str())),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

/// Result ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

/// Select parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }
}

/// Relational store abstraction.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::row_source::{Filter, Query, RowSource};
///
/// async fn recent_quizzes(source: &dyn RowSource, since: DateTime<Utc>) -> Result<usize> {
///     let rows = source
///         .select("quiz_responses", &Query::new().filter(Filter::after("created_at", since)))
///         .await?;
///     Ok(rows.len())
/// }
/// ```
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Fetch every row of `table` matching the query.
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>>;

    /// Delete every row matching all filters, returning the number removed.
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_empty_filter() {
        let filter = Filter::empty("chat_history");
        assert!(filter.matches(&row(json!({ "chat_history": [] }))));
        assert!(filter.matches(&row(json!({ "chat_history": null }))));
        assert!(filter.matches(&row(json!({ "id": 1 }))));
        assert!(!filter.matches(&row(json!({ "chat_history": [{"role": "user"}] }))));
    }

    #[test]
    fn test_timestamp_ranges_compare_chronologically() {
        // Same instant written with different offsets
        let r = row(json!({ "updated_at": "2024-03-01T12:00:00+02:00" }));
        assert!(Filter::gt("updated_at", "2024-03-01T09:59:59Z").matches(&r));
        assert!(!Filter::gt("updated_at", "2024-03-01T10:00:00Z").matches(&r));
        assert!(Filter::gte("updated_at", "2024-03-01T10:00:00Z").matches(&r));
        assert!(Filter::lt("updated_at", "2024-03-01T10:00:01Z").matches(&r));
    }

    #[test]
    fn test_numeric_and_identity_equality() {
        let r = row(json!({ "user_id": 42, "score": 7.5 }));
        assert!(Filter::eq("user_id", "42").matches(&r));
        assert!(Filter::eq("user_id", 42).matches(&r));
        assert!(Filter::lte("score", 7.5).matches(&r));
        assert!(!Filter::lt("score", 7).matches(&r));
    }

    #[test]
    fn test_missing_column_never_in_range() {
        let r = row(json!({ "id": "a" }));
        assert!(!Filter::gt("updated_at", "2024-01-01T00:00:00Z").matches(&r));
        assert!(!Filter::eq("user_id", "a").matches(&r));
    }

    #[test]
    fn test_query_builder() {
        let query = Query::new()
            .filter(Filter::eq("user_id", "u1"))
            .order_by("created_at", true)
            .limit(10);

        assert_eq!(query.filters.len(), 1);
        assert_eq!(query.order.as_ref().map(|o| o.descending), Some(true));
        assert_eq!(query.limit, Some(10));
        assert!(query.matches(&row(json!({ "user_id": "u1" }))));
        assert!(!query.matches(&row(json!({ "user_id": "u2" }))));
    }
}
