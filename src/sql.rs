//! SQL text helpers shared by the serializer and the query builder.
//!
//! Every user-supplied literal is rendered through sea-query's value escaping.
//! Identifiers only ever come from the structural column table or the schema cache.

use sea_query::{Iden, MysqlQueryBuilder, QueryBuilder, Value};

/// Predicate that matches nothing. Used for unknown properties.
pub const CONSTANT_FALSE: &str = "(1 = 0)";

/// Predicate that matches everything. Used for empty search terms.
pub const MATCH_ALL: &str = "(1=1)";

/// Column holding the owning tenant on shared event tables
pub const TENANT_COLUMN: &str = "_team_id";

/// Renders a value as an escaped SQL literal.
pub fn literal<V: Into<Value>>(value: V) -> String {
    MysqlQueryBuilder.value_to_string(&value.into())
}

/// Escaped single-quoted string literal.
pub fn string_literal(s: &str) -> String {
    literal(s)
}

/// Returns the text unchanged when it is a finite number, otherwise `None`.
pub fn numeric_literal(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => Some(trimmed),
        _ => None,
    }
}

/// Number when the text parses as one, escaped string otherwise.
/// The event store performs the comparison either way.
pub fn comparable_literal(raw: &str) -> String {
    match numeric_literal(raw) {
        Some(n) => n.to_string(),
        None => string_literal(raw),
    }
}

/// `%term%` as an escaped literal.
pub fn contains_pattern(term: &str) -> String {
    string_literal(&format!("%{}%", term))
}

/// Normalizes a boolean search value to `1`/`0`.
/// Accepts `true`/`false` in any case and integers (non-zero is true).
pub fn bool_literal(raw: &str) -> Option<u8> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Some(1);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Some(0);
    }
    trimmed.parse::<i64>().ok().map(|n| u8::from(n != 0))
}

/// Restricts rows to one tenant
pub fn tenant_condition(tenant: &str) -> String {
    format!("{} = {}", TENANT_COLUMN, string_literal(tenant))
}

/// Unix milliseconds to the nanosecond representation of `_timestamp_sort_key`
pub fn ms_to_ns(ms: i64) -> i64 {
    ms.saturating_mul(1_000_000)
}

/// Physical table name, rendered quoted by the query builder.
#[derive(Debug, Clone)]
pub struct TableName(pub String);

impl Iden for TableName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let _ = s.write_str(&self.0);
    }
}
