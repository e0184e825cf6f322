//! Read-only interface to the columnar event store.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::EventStoreError;

/// Column name and declared type, as returned by `DESCRIBE` or in a result's `meta`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

/// A result in the store's JSON output format
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    #[serde(default)]
    pub meta: Vec<ColumnMeta>,
    #[serde(default)]
    pub data: Vec<Map<String, Value>>,
}

impl ResultSet {
    pub fn rows(&self) -> usize {
        self.data.len()
    }
}

/// Reads a numeric cell. Aggregates arrive as strings (64-bit integers are
/// quoted in JSON output), plain numbers are accepted as well.
pub fn numeric_cell(row: &Map<String, Value>, column: &str) -> Option<f64> {
    match row.get(column)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Reads a cell as display text, `None` for SQL NULL
pub fn text_cell(row: &Map<String, Value>, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Reads an array-of-strings cell, empty when absent
pub fn string_array_cell(row: &Map<String, Value>, column: &str) -> Vec<String> {
    match row.get(column) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Runs a `SELECT` and returns its rows
    async fn query(&self, sql: &str) -> Result<ResultSet, EventStoreError>;

    /// Column catalog of a table
    async fn describe(&self, table: &str) -> Result<Vec<ColumnMeta>, EventStoreError>;
}

/// 不连接事件存储: 记录每条语句并返回空结果
#[derive(Debug, Default)]
pub struct DryRunEventStore {
    queries: Mutex<Vec<String>>,
}

impl DryRunEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出并清空已记录的语句
    pub fn take_queries(&self) -> Vec<String> {
        std::mem::take(&mut *self.queries.lock())
    }
}

#[async_trait]
impl EventStore for DryRunEventStore {
    async fn query(&self, sql: &str) -> Result<ResultSet, EventStoreError> {
        info!(sql = %sql, "dry run query");
        self.queries.lock().push(sql.to_string());
        Ok(ResultSet::default())
    }

    async fn describe(&self, _table: &str) -> Result<Vec<ColumnMeta>, EventStoreError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_set_from_json_output() {
        let raw = json!({
            "meta": [{"name": "count", "type": "UInt64"}, {"name": "ts_bucket", "type": "DateTime"}],
            "data": [{"count": "8", "ts_bucket": "2023-03-17 22:00:00"}],
            "rows": 1,
            "statistics": {"elapsed": 0.001}
        });
        let result: ResultSet = serde_json::from_value(raw).unwrap();
        assert_eq!(result.rows(), 1);
        assert_eq!(result.meta[0].column_type, "UInt64");
        assert_eq!(numeric_cell(&result.data[0], "count"), Some(8.0));
        assert_eq!(text_cell(&result.data[0], "ts_bucket").as_deref(), Some("2023-03-17 22:00:00"));
    }

    #[test]
    fn test_numeric_cell_variants() {
        let row = json!({"a": 3, "b": "4.5", "c": "x", "d": null});
        let row = row.as_object().unwrap();
        assert_eq!(numeric_cell(row, "a"), Some(3.0));
        assert_eq!(numeric_cell(row, "b"), Some(4.5));
        assert_eq!(numeric_cell(row, "c"), None);
        assert_eq!(numeric_cell(row, "d"), None);
        assert_eq!(numeric_cell(row, "missing"), None);
    }

    #[test]
    fn test_string_array_cell() {
        let row = json!({"strings": ["a", "b", 1]});
        let row = row.as_object().unwrap();
        assert_eq!(string_array_cell(row, "strings"), vec!["a", "b"]);
        assert!(string_array_cell(row, "numbers").is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_records_queries() {
        let store = DryRunEventStore::new();
        let result = store.query("SELECT 1").await.unwrap();
        assert_eq!(result.rows(), 0);
        assert_eq!(store.take_queries(), vec!["SELECT 1".to_string()]);
        assert!(store.take_queries().is_empty());
    }
}
