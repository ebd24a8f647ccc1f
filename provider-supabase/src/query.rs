//! PostgREST query-string encoding

use bridge_traits::row_source::{Filter, Query};
use serde_json::Value;

/// Render a filter operand the way PostgREST expects it in a query string.
pub fn encode_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Map one filter to a `(key, value)` query pair, both still unescaped.
pub fn encode_filter(filter: &Filter) -> (String, String) {
    match filter {
        Filter::Eq(column, value) => (column.clone(), format!("eq.{}", encode_value(value))),
        Filter::Gt(column, value) => (column.clone(), format!("gt.{}", encode_value(value))),
        Filter::Gte(column, value) => (column.clone(), format!("gte.{}", encode_value(value))),
        Filter::Lt(column, value) => (column.clone(), format!("lt.{}", encode_value(value))),
        Filter::Lte(column, value) => (column.clone(), format!("lte.{}", encode_value(value))),
        Filter::Empty(column) => (
            "or".to_string(),
            format!("({column}.is.null,{column}.eq.[])"),
        ),
    }
}

fn push_pair(out: &mut Vec<String>, key: &str, value: &str) {
    out.push(format!(
        "{}={}",
        urlencoding::encode(key),
        urlencoding::encode(value)
    ));
}

/// Query string for a filtered delete.
pub fn filter_query_string(filters: &[Filter]) -> String {
    let mut pairs = Vec::with_capacity(filters.len());
    for filter in filters {
        let (key, value) = encode_filter(filter);
        push_pair(&mut pairs, &key, &value);
    }
    pairs.join("&")
}

/// Query string for one page of a select.
pub fn select_query_string(query: &Query, limit: Option<usize>, offset: usize) -> String {
    let mut pairs = vec!["select=*".to_string()];

    for filter in &query.filters {
        let (key, value) = encode_filter(filter);
        push_pair(&mut pairs, &key, &value);
    }

    if let Some(order) = &query.order {
        let direction = if order.descending { "desc" } else { "asc" };
        push_pair(&mut pairs, "order", &format!("{}.{}", order.column, direction));
    }

    if let Some(limit) = limit {
        pairs.push(format!("limit={}", limit));
    }

    if offset > 0 {
        pairs.push(format!("offset={}", offset));
    }

    pairs.join("&")
}
