//! WHERE clause and count statement composition.

use chrono::{DateTime, Utc};
use sea_query::{Alias, Expr, MysqlQueryBuilder, Order, Query};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ast::FieldRef;
use crate::parser::parse;
use crate::resolver::IMPLICIT_COLUMN;
use crate::serializer::SqlSerializer;
use crate::sql::{contains_pattern, ms_to_ns, string_literal, tenant_condition, TableName};

/// Platform value of session replay rows, hidden from searches
const INTERNAL_PLATFORM: &str = "rrweb";

/// How the timestamp column stores time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampPrecision {
    /// Integer nanoseconds since the epoch
    Nanos,
    DateTime64,
    /// Whole seconds. Bounds are truncated to the second.
    DateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampColumn {
    pub column: String,
    pub precision: TimestampPrecision,
}

impl Default for TimestampColumn {
    fn default() -> Self {
        Self {
            column: "_timestamp_sort_key".to_string(),
            precision: TimestampPrecision::Nanos,
        }
    }
}

impl TimestampColumn {
    /// Half-open `[start, end)` bound on this column
    pub fn between(&self, range: &TimeRange) -> String {
        let (start, end) = match self.precision {
            TimestampPrecision::Nanos => (
                ms_to_ns(range.start_ms()).to_string(),
                ms_to_ns(range.end_ms()).to_string(),
            ),
            TimestampPrecision::DateTime64 => (
                format!("fromUnixTimestamp64Milli({})", range.start_ms()),
                format!("fromUnixTimestamp64Milli({})", range.end_ms()),
            ),
            TimestampPrecision::DateTime => (
                format!("toDateTime({})", range.start_ms().div_euclid(1000)),
                format!("toDateTime({})", range.end_ms().div_euclid(1000)),
            ),
        };
        format!("{col} >= {} AND {col} < {}", start, end, col = self.column)
    }

    /// Expression usable as a `DateTime` when bucketing
    pub fn as_datetime(&self) -> String {
        match self.precision {
            TimestampPrecision::Nanos => format!("fromUnixTimestamp64Nano({})", self.column),
            TimestampPrecision::DateTime64 | TimestampPrecision::DateTime => self.column.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn start_ms(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_ms(&self) -> i64 {
        self.end.timestamp_millis()
    }
}

/// Collects parenthesized conditions, joined with `AND` in insertion order.
/// The search predicate goes last.
pub struct SearchQueryBuilder<'a> {
    query: String,
    serializer: &'a SqlSerializer,
    conditions: Vec<String>,
}

impl<'a> SearchQueryBuilder<'a> {
    pub fn new(query: impl Into<String>, serializer: &'a SqlSerializer) -> Self {
        Self {
            query: query.into(),
            serializer,
            conditions: Vec::new(),
        }
    }

    /// Blank conditions are ignored
    pub fn and(mut self, condition: &str) -> Self {
        if !condition.trim().is_empty() {
            self.conditions.push(format!("({})", condition));
        }
        self
    }

    pub fn remove_internals(self) -> Self {
        let condition = format!("notEquals(_platform, {})", string_literal(INTERNAL_PLATFORM));
        self.and(&condition)
    }

    pub fn filter_logs(self) -> Self {
        let condition = format!("type = {}", string_literal("log"));
        self.and(&condition)
    }

    pub fn filter_spans(self) -> Self {
        let condition = format!("type = {}", string_literal("span"));
        self.and(&condition)
    }

    pub fn filter_logs_and_spans(self) -> Self {
        let condition = format!("type = {} OR type = {}", string_literal("log"), string_literal("span"));
        self.and(&condition)
    }

    pub fn for_tenant(self, tenant: &str) -> Self {
        let condition = tenant_condition(tenant);
        self.and(&condition)
    }

    pub fn timestamp_in_between(self, range: &TimeRange, column: &TimestampColumn) -> Self {
        let condition = column.between(range);
        self.and(&condition)
    }

    /// The compiled search, or a substring match per whitespace token when
    /// the query does not parse
    async fn search_predicate(&self) -> String {
        if self.query.trim().is_empty() {
            return String::new();
        }
        match parse(&self.query) {
            Ok(query) => self.serializer.where_clause(&query).await,
            Err(err) => {
                warn!(query = %self.query, error = %err, "parse failure, falling back to substring search");
                let implicit = self.serializer.resolve(&FieldRef::Implicit).await;
                let column = implicit.column().unwrap_or(IMPLICIT_COLUMN);
                self.query
                    .split_whitespace()
                    .map(|token| format!("lower({}) LIKE lower({})", column, contains_pattern(token)))
                    .collect::<Vec<_>>()
                    .join(" AND ")
            }
        }
    }

    pub async fn build(self) -> String {
        let predicate = self.search_predicate().await;
        let builder = self.and(&predicate);
        builder.conditions.join(" AND ")
    }
}

/// Bucketed `count(*)` over a WHERE clause, optionally split by one group expression
#[derive(Debug, Clone)]
pub struct CountQuery<'a> {
    pub table: &'a str,
    pub timestamp: &'a TimestampColumn,
    pub where_clause: &'a str,
    pub group_by: Option<&'a str>,
    pub bucket_minutes: u32,
}

impl CountQuery<'_> {
    pub fn to_sql(&self) -> String {
        let bucket = format!(
            "toStartOfInterval({}, INTERVAL {} minute)",
            self.timestamp.as_datetime(),
            self.bucket_minutes
        );

        let mut select = Query::select();
        if let Some(group_by) = self.group_by {
            select.expr_as(Expr::cust(group_by), Alias::new("group"));
        }
        select
            .expr_as(Expr::cust("count(*)"), Alias::new("count"))
            .expr_as(Expr::cust(bucket), Alias::new("ts_bucket"))
            .from(TableName(self.table.to_string()));
        if !self.where_clause.trim().is_empty() {
            select.and_where(Expr::cust(self.where_clause));
        }

        let mut group_by: Vec<_> = self.group_by.map(Expr::cust).into_iter().collect();
        group_by.push(Expr::cust("ts_bucket"));
        select
            .add_group_by(group_by)
            .order_by_expr(Expr::cust("ts_bucket"), Order::Asc);
        select.to_string(MysqlQueryBuilder)
    }
}
