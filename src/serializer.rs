//! Turns a parsed query into predicate SQL (or into an English explanation).
//!
//! The tree walk in [`serialize`] is shared; what a leaf becomes is decided by
//! a [`Serializer`] strategy.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use tracing::warn;

use crate::ast::{BoolOp, FieldRef, Node, Query, RangedTerm, Term};
use crate::parser::parse;
use crate::resolver::{ColumnOrigin, FieldResolution, FieldResolver, PropertyMappingResolver};
use crate::schema_cache::{ScalarType, SchemaTypeCache};
use crate::sql::{bool_literal, comparable_literal, contains_pattern, string_literal, CONSTANT_FALSE, MATCH_ALL};

/// Terms at least this long are matched case-sensitively on the implicit column
const LIKELY_TOKEN_TERM_LEN: usize = 16;

#[async_trait]
pub trait Serializer: Send + Sync {
    fn operator(&self, op: BoolOp) -> &'static str;

    /// Exact match
    async fn eq(&self, field: &FieldRef, term: &str, negated: bool) -> String;

    async fn is_not_null(&self, field: &FieldRef, negated: bool) -> String;

    async fn gte(&self, field: &FieldRef, term: &str) -> String;

    async fn lte(&self, field: &FieldRef, term: &str) -> String;

    async fn lt(&self, field: &FieldRef, term: &str) -> String;

    async fn gt(&self, field: &FieldRef, term: &str) -> String;

    async fn field_search(
        &self,
        field: &FieldRef,
        term: &str,
        negated: bool,
        prefix_wildcard: bool,
        suffix_wildcard: bool,
    ) -> String;

    async fn range(&self, range: &RangedTerm) -> String;
}

/// Serializes a whole query, empty string for a blank one
pub async fn serialize_query(query: &Query, serializer: &dyn Serializer) -> String {
    match &query.root {
        Some(root) => serialize(root, serializer).await,
        None => String::new(),
    }
}

pub fn serialize<'a>(node: &'a Node, serializer: &'a dyn Serializer) -> BoxFuture<'a, String> {
    async move {
        match node {
            Node::Term(term) => serialize_term(term, serializer).await,
            Node::Range(range) => serializer.range(range).await,
            Node::Binary {
                left,
                operator,
                right,
                parenthesized,
            } => {
                // 右侧未加括号的链逐个展开，不逐层递归
                let mut sql = serialize(left, serializer).await;
                let mut operator = *operator;
                let mut rest: &Node = right;
                loop {
                    sql.push(' ');
                    sql.push_str(serializer.operator(operator));
                    sql.push(' ');
                    match rest {
                        Node::Binary {
                            left,
                            operator: next,
                            right,
                            parenthesized: false,
                        } => {
                            sql.push_str(&serialize(left, serializer).await);
                            operator = *next;
                            rest = &**right;
                        }
                        last => {
                            sql.push_str(&serialize(last, serializer).await);
                            break;
                        }
                    }
                }
                wrap(sql, *parenthesized)
            }
            Node::LeftOnly {
                left,
                leading_operator,
                parenthesized,
            } => {
                let inner = serialize(left, serializer).await;
                let sql = match leading_operator {
                    Some(op) => format!("{} {}", op.keyword(), inner),
                    None => inner,
                };
                wrap(sql, *parenthesized)
            }
        }
    }
    .boxed()
}

fn wrap(sql: String, parenthesized: bool) -> String {
    if parenthesized {
        format!("({})", sql)
    } else {
        sql
    }
}

async fn serialize_term(term: &Term, serializer: &dyn Serializer) -> String {
    let field = &term.field;
    let negated = term.negated;
    let mut text = term.text.as_str();

    // 带引号的具名字段做精确匹配，隐式字段仍然做子串匹配
    if term.quoted && !field.is_implicit() {
        return serializer.eq(field, text, negated).await;
    }
    if term.quoted {
        return serializer.field_search(field, text, negated, false, false).await;
    }

    if text == "*" {
        return serializer.is_not_null(field, negated).await;
    }

    // 取反时比较方向反转
    if let Some(rest) = text.strip_prefix(">=") {
        return if negated { serializer.lt(field, rest).await } else { serializer.gte(field, rest).await };
    }
    if let Some(rest) = text.strip_prefix("<=") {
        return if negated { serializer.gt(field, rest).await } else { serializer.lte(field, rest).await };
    }
    if let Some(rest) = text.strip_prefix('>') {
        return if negated { serializer.lte(field, rest).await } else { serializer.gt(field, rest).await };
    }
    if let Some(rest) = text.strip_prefix('<') {
        return if negated { serializer.gte(field, rest).await } else { serializer.lt(field, rest).await };
    }

    let mut prefix_wildcard = false;
    let mut suffix_wildcard = false;
    if let Some(rest) = text.strip_prefix('*') {
        prefix_wildcard = true;
        text = rest;
    }
    if let Some(rest) = text.strip_suffix('*') {
        suffix_wildcard = true;
        text = rest;
    }

    serializer
        .field_search(field, text, negated, prefix_wildcard, suffix_wildcard)
        .await
}

fn sql_operator(op: BoolOp) -> &'static str {
    match op {
        BoolOp::Not | BoolOp::AndNot => "AND NOT",
        BoolOp::OrNot => "OR NOT",
        BoolOp::And | BoolOp::Implicit => "AND",
        BoolOp::Or => "OR",
    }
}

/// Characters the store's token index splits on: ASCII punctuation and whitespace
fn is_token_separator(c: char) -> bool {
    c.is_ascii_punctuation() || matches!(c, ' ' | '\t' | '\n' | '\r')
}

fn tokenize(term: &str) -> Vec<&str> {
    term.split(is_token_separator).filter(|t| !t.is_empty()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SerializerOptions {
    /// Whole-word matching on the implicit column through the token index
    pub use_tokenization: bool,
}

/// Predicate SQL. All literals go through [`crate::sql`] escaping; column
/// expressions only come from the resolver.
pub struct SqlSerializer {
    resolver: Arc<dyn FieldResolver>,
    options: SerializerOptions,
}

impl SqlSerializer {
    pub fn new(resolver: Arc<dyn FieldResolver>, options: SerializerOptions) -> Self {
        Self { resolver, options }
    }

    /// Serializer over the tenant's property mappings, with a fresh one-refresh budget
    pub fn for_cache(cache: Arc<SchemaTypeCache>, options: SerializerOptions) -> Self {
        Self::new(Arc::new(PropertyMappingResolver::new(cache)), options)
    }

    pub async fn resolve(&self, field: &FieldRef) -> FieldResolution {
        self.resolver.resolve(field).await
    }

    pub async fn where_clause(&self, query: &Query) -> String {
        serialize_query(query, self).await
    }

    async fn comparison(&self, field: &FieldRef, op: &str, term: &str) -> String {
        let resolution = self.resolve(field).await;
        match resolution.column() {
            Some(column) => format!("({} {} {})", column, op, comparable_literal(term)),
            None => CONSTANT_FALSE.to_string(),
        }
    }
}

/// Equality with the type-specific normalization of the term
fn typed_eq(column: &str, scalar: Option<ScalarType>, term: &str, negated: bool) -> String {
    let bang = if negated { "!" } else { "" };
    match scalar {
        Some(ScalarType::Bool) => match bool_literal(term) {
            Some(value) => format!("({} {}= {})", column, bang, value),
            None => CONSTANT_FALSE.to_string(),
        },
        Some(ScalarType::Number) => {
            format!("({} {}= CAST({}, 'Float64'))", column, bang, string_literal(term))
        }
        _ => format!("({} {}= {})", column, bang, string_literal(term)),
    }
}

#[async_trait]
impl Serializer for SqlSerializer {
    fn operator(&self, op: BoolOp) -> &'static str {
        sql_operator(op)
    }

    async fn eq(&self, field: &FieldRef, term: &str, negated: bool) -> String {
        let resolution = self.resolve(field).await;
        match resolution.column() {
            Some(column) => typed_eq(column, resolution.inferred_type, term, negated),
            None => CONSTANT_FALSE.to_string(),
        }
    }

    async fn is_not_null(&self, field: &FieldRef, negated: bool) -> String {
        let resolution = self.resolve(field).await;
        let Some(column) = resolution.column() else {
            return CONSTANT_FALSE.to_string();
        };

        match (resolution.origin, resolution.inferred_type) {
            // 没有 end_timestamp 时 duration 为负数
            (ColumnOrigin::Structural, _) if column == "_duration" => {
                format!("_duration {} 0", if negated { "<" } else { ">=" })
            }
            (ColumnOrigin::Dynamic, Some(scalar)) => {
                let FieldRef::Named(name) = field else {
                    return CONSTANT_FALSE.to_string();
                };
                format!(
                    "mapContains(_{}_attributes, {}) = {}",
                    scalar,
                    string_literal(name),
                    if negated { 0 } else { 1 }
                )
            }
            (_, Some(ScalarType::String)) => {
                format!("notEmpty({}) {}= 1", column, if negated { "!" } else { "" })
            }
            _ => format!("{} IS {}NULL", column, if negated { "" } else { "NOT " }),
        }
    }

    async fn gte(&self, field: &FieldRef, term: &str) -> String {
        self.comparison(field, ">=", term).await
    }

    async fn lte(&self, field: &FieldRef, term: &str) -> String {
        self.comparison(field, "<=", term).await
    }

    async fn lt(&self, field: &FieldRef, term: &str) -> String {
        self.comparison(field, "<", term).await
    }

    async fn gt(&self, field: &FieldRef, term: &str) -> String {
        self.comparison(field, ">", term).await
    }

    async fn field_search(
        &self,
        field: &FieldRef,
        term: &str,
        negated: bool,
        prefix_wildcard: bool,
        suffix_wildcard: bool,
    ) -> String {
        let resolution = self.resolve(field).await;
        let Some(column) = resolution.column() else {
            return CONSTANT_FALSE.to_string();
        };

        // 数值和布尔字段只能做等值匹配
        if matches!(resolution.inferred_type, Some(ScalarType::Bool) | Some(ScalarType::Number)) {
            return typed_eq(column, resolution.inferred_type, term, negated);
        }

        if term.is_empty() {
            return MATCH_ALL.to_string();
        }

        let not = if negated { "NOT " } else { "" };
        let implicit = field.is_implicit();

        if implicit && self.options.use_tokenization {
            if prefix_wildcard || suffix_wildcard {
                let pattern = format!(
                    "{}{}{}",
                    if prefix_wildcard { "%" } else { "" },
                    term,
                    if suffix_wildcard { "%" } else { "" }
                );
                return format!("(lower({}) {}LIKE lower({}))", column, not, string_literal(&pattern));
            }

            if term.contains(is_token_separator) {
                // token 索引无法匹配跨 token 的子串，拆开后再整体做一次子串匹配
                let mut parts: Vec<String> = tokenize(term)
                    .into_iter()
                    .map(|token| format!("hasTokenCaseInsensitive({}, {})", column, string_literal(token)))
                    .collect();
                parts.push(format!("(lower({}) LIKE lower({}))", column, contains_pattern(term)));
                let joined = parts.join(" AND ");
                return if negated {
                    format!("(NOT ({}))", joined)
                } else {
                    format!("({})", joined)
                };
            }

            return format!("({}hasTokenCaseInsensitive({}, {}))", not, column, string_literal(term));
        }

        let like = if implicit && term.chars().count() >= LIKELY_TOKEN_TERM_LEN {
            "LIKE"
        } else {
            "ILIKE"
        };
        format!("({} {}{} {})", column, not, like, contains_pattern(term))
    }

    async fn range(&self, range: &RangedTerm) -> String {
        let resolution = self.resolve(&range.field).await;
        let Some(column) = resolution.column() else {
            return CONSTANT_FALSE.to_string();
        };
        let min = comparable_literal(&range.min);
        let max = comparable_literal(&range.max);

        if range.min_inclusive && range.max_inclusive {
            let not = if range.negated { "NOT " } else { "" };
            return format!("({} {}BETWEEN {} AND {})", column, not, min, max);
        }

        let bounds = format!(
            "{} {} {} AND {} {} {}",
            column,
            if range.min_inclusive { ">=" } else { ">" },
            min,
            column,
            if range.max_inclusive { "<=" } else { "<" },
            max
        );
        if range.negated {
            format!("(NOT ({}))", bounds)
        } else {
            format!("({})", bounds)
        }
    }
}

/// Human-readable rendering of a query
#[derive(Debug, Clone, Copy, Default)]
pub struct EnglishSerializer;

impl EnglishSerializer {
    fn field(field: &FieldRef) -> String {
        match field {
            FieldRef::Implicit => "event".to_string(),
            FieldRef::Named(name) => format!("'{}'", name),
        }
    }
}

#[async_trait]
impl Serializer for EnglishSerializer {
    fn operator(&self, op: BoolOp) -> &'static str {
        sql_operator(op)
    }

    async fn eq(&self, field: &FieldRef, term: &str, negated: bool) -> String {
        format!("{} {} {}", Self::field(field), if negated { "is not" } else { "is" }, term)
    }

    async fn is_not_null(&self, field: &FieldRef, negated: bool) -> String {
        format!("{} {}", Self::field(field), if negated { "is null" } else { "is not null" })
    }

    async fn gte(&self, field: &FieldRef, term: &str) -> String {
        format!("{} is greater than or equal to {}", Self::field(field), term)
    }

    async fn lte(&self, field: &FieldRef, term: &str) -> String {
        format!("{} is less than or equal to {}", Self::field(field), term)
    }

    async fn lt(&self, field: &FieldRef, term: &str) -> String {
        format!("{} is less than {}", Self::field(field), term)
    }

    async fn gt(&self, field: &FieldRef, term: &str) -> String {
        format!("{} is greater than {}", Self::field(field), term)
    }

    async fn field_search(
        &self,
        field: &FieldRef,
        term: &str,
        negated: bool,
        prefix_wildcard: bool,
        suffix_wildcard: bool,
    ) -> String {
        let verb = if field.is_implicit() {
            match (prefix_wildcard, suffix_wildcard, negated) {
                (true, true, false) => "contains",
                (true, true, true) => "does not contain",
                (true, false, false) => "ends with",
                (true, false, true) => "does not end with",
                (false, true, false) => "starts with",
                (false, true, true) => "does not start with",
                (false, false, false) => "has whole word",
                (false, false, true) => "does not have whole word",
            }
        } else if negated {
            "does not contain"
        } else {
            "contains"
        };
        format!("{} {} {}", Self::field(field), verb, term)
    }

    async fn range(&self, range: &RangedTerm) -> String {
        let name = match &range.field {
            FieldRef::Implicit => "event",
            FieldRef::Named(name) => name.as_str(),
        };
        format!(
            "{} {} between {} and {}",
            name,
            if range.negated { "is not" } else { "is" },
            range.min,
            range.max
        )
    }
}

/// English explanation of a raw query, or a generic description when it does not parse
pub async fn explain(raw: &str) -> String {
    match parse(raw) {
        Ok(query) => serialize_query(&query, &EnglishSerializer).await,
        Err(err) => {
            warn!(query = %raw, error = %err, "parse failure");
            format!("Message containing {}", raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_store::InMemoryCacheStore;
    use crate::schema_cache::{MappingKind, MappingScope, PropertyTypeMap, StaticMappingSource, DEFAULT_TTL};

    async fn serializer_with(pairs: &[(&str, ScalarType)], use_tokenization: bool) -> (SqlSerializer, Arc<StaticMappingSource>) {
        let seed: PropertyTypeMap = pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        let source = Arc::new(StaticMappingSource::new(seed));
        let cache = Arc::new(SchemaTypeCache::new(
            MappingKind::Logs,
            MappingScope {
                tenant: "team".to_string(),
                table: "log_stream".to_string(),
                since_ms: 0,
                until_ms: 0,
                table_version: None,
            },
            DEFAULT_TTL,
            Arc::clone(&source) as Arc<dyn crate::schema_cache::MappingSource>,
            Arc::new(InMemoryCacheStore::new()),
        ));
        cache.refresh(false).await.unwrap();
        (SqlSerializer::for_cache(cache, SerializerOptions { use_tokenization }), source)
    }

    async fn compile(serializer: &SqlSerializer, raw: &str) -> String {
        let query = parse(raw).unwrap();
        serializer.where_clause(&query).await
    }

    #[tokio::test]
    async fn test_structural_field_substring() {
        let (s, _) = serializer_with(&[], true).await;
        assert_eq!(
            compile(&s, "level:info OR level:warn").await,
            "(severity_text ILIKE '%info%') OR (severity_text ILIKE '%warn%')"
        );
    }

    #[tokio::test]
    async fn test_implicit_and_equivalence() {
        let (s, _) = serializer_with(&[], true).await;
        let implicit = compile(&s, "foo bar").await;
        let explicit = compile(&s, "foo AND bar").await;
        assert_eq!(implicit, explicit);
        assert_eq!(
            implicit,
            "(hasTokenCaseInsensitive(_source, 'foo')) AND (hasTokenCaseInsensitive(_source, 'bar'))"
        );
    }

    #[tokio::test]
    async fn test_longest_chain_compiles() {
        let (s, _) = serializer_with(&[], true).await;
        let raw = vec!["foo"; crate::parser::MAX_CLAUSES].join(" ");
        let sql = compile(&s, &raw).await;
        let clause = "(hasTokenCaseInsensitive(_source, 'foo'))";
        assert_eq!(sql, vec![clause; crate::parser::MAX_CLAUSES].join(" AND "));
    }

    #[tokio::test]
    async fn test_chain_keeps_inner_groups() {
        let (s, _) = serializer_with(&[], false).await;
        assert_eq!(
            compile(&s, "a (b OR c) d").await,
            "(_source ILIKE '%a%') AND ((_source ILIKE '%b%') OR (_source ILIKE '%c%')) AND (_source ILIKE '%d%')"
        );
    }

    #[tokio::test]
    async fn test_wildcards_on_implicit_field() {
        let (s, _) = serializer_with(&[], true).await;
        assert_eq!(compile(&s, "*foo*").await, "(lower(_source) LIKE lower('%foo%'))");
        assert_eq!(compile(&s, "foo*").await, "(lower(_source) LIKE lower('foo%'))");
        assert_eq!(compile(&s, "*foo").await, "(lower(_source) LIKE lower('%foo'))");
        assert_eq!(compile(&s, "-foo*").await, "(lower(_source) NOT LIKE lower('foo%'))");
    }

    #[tokio::test]
    async fn test_tokenized_term_with_separators() {
        let (s, _) = serializer_with(&[], true).await;
        assert_eq!(
            compile(&s, "\"foo bar!\"").await,
            "(hasTokenCaseInsensitive(_source, 'foo') AND hasTokenCaseInsensitive(_source, 'bar') AND (lower(_source) LIKE lower('%foo bar!%')))"
        );
        assert_eq!(
            compile(&s, "-foo.bar").await,
            "(NOT (hasTokenCaseInsensitive(_source, 'foo') AND hasTokenCaseInsensitive(_source, 'bar') AND (lower(_source) LIKE lower('%foo.bar%'))))"
        );
    }

    #[tokio::test]
    async fn test_without_tokenization() {
        let (s, _) = serializer_with(&[], false).await;
        assert_eq!(compile(&s, "foo").await, "(_source ILIKE '%foo%')");
        assert_eq!(
            compile(&s, "averyveryverylongterm").await,
            "(_source LIKE '%averyveryverylongterm%')"
        );
        assert_eq!(compile(&s, "-foo").await, "(_source NOT ILIKE '%foo%')");
    }

    #[tokio::test]
    async fn test_empty_quoted_term_matches_all() {
        let (s, _) = serializer_with(&[], true).await;
        assert_eq!(compile(&s, "\"\"").await, "(1=1)");
    }

    #[tokio::test]
    async fn test_unknown_property_is_constant_false_with_one_refresh() {
        let (s, source) = serializer_with(&[], true).await;
        let calls_before = source.calls();
        assert_eq!(compile(&s, "foo:bar baz:qux").await, "(1 = 0) AND (1 = 0)");
        assert_eq!(source.calls() - calls_before, 1);
    }

    #[tokio::test]
    async fn test_bool_normalization() {
        let (s, _) = serializer_with(&[("isBot", ScalarType::Bool)], true).await;
        for raw in ["isBot:true", "isBot:TrUe", "isBot:1"] {
            assert_eq!(compile(&s, raw).await, "(_bool_attributes['isBot'] = 1)", "{}", raw);
        }
        for raw in ["isBot:false", "isBot:0"] {
            assert_eq!(compile(&s, raw).await, "(_bool_attributes['isBot'] = 0)", "{}", raw);
        }
        assert_eq!(compile(&s, "isBot:maybe").await, "(1 = 0)");
        assert_eq!(compile(&s, "-isBot:true").await, "(_bool_attributes['isBot'] != 1)");
    }

    #[tokio::test]
    async fn test_number_field_equality() {
        let (s, _) = serializer_with(&[("status", ScalarType::Number)], true).await;
        assert_eq!(
            compile(&s, "status:500").await,
            "(_number_attributes['status'] = CAST('500', 'Float64'))"
        );
        assert_eq!(
            compile(&s, "status:-5").await,
            "(_number_attributes['status'] = CAST('-5', 'Float64'))"
        );
    }

    #[tokio::test]
    async fn test_quoted_named_field_is_exact() {
        let (s, _) = serializer_with(&[("user", ScalarType::String)], true).await;
        assert_eq!(compile(&s, "user:\"it's me\"").await, r"(_string_attributes['user'] = 'it\'s me')");
        assert_eq!(compile(&s, "-service:\"api\"").await, "(_service != 'api')");
    }

    #[tokio::test]
    async fn test_existence() {
        let (s, _) = serializer_with(&[("user", ScalarType::String)], true).await;
        assert_eq!(compile(&s, "service:*").await, "notEmpty(_service) = 1");
        assert_eq!(compile(&s, "-service:*").await, "notEmpty(_service) != 1");
        assert_eq!(compile(&s, "duration:*").await, "_duration >= 0");
        assert_eq!(compile(&s, "-duration:*").await, "_duration < 0");
        assert_eq!(compile(&s, "timestamp:*").await, "timestamp IS NOT NULL");
        assert_eq!(compile(&s, "user:*").await, "mapContains(_string_attributes, 'user') = 1");
        assert_eq!(compile(&s, "-user:*").await, "mapContains(_string_attributes, 'user') = 0");
    }

    #[tokio::test]
    async fn test_comparisons_and_negation() {
        let (s, _) = serializer_with(&[], true).await;
        assert_eq!(compile(&s, "duration:>=100").await, "(_duration >= 100)");
        assert_eq!(compile(&s, "duration:<5").await, "(_duration < 5)");
        assert_eq!(compile(&s, "-duration:>=100").await, "(_duration < 100)");
        assert_eq!(compile(&s, "-duration:<=100").await, "(_duration > 100)");
        assert_eq!(compile(&s, "-duration:>100").await, "(_duration <= 100)");
        assert_eq!(compile(&s, "-duration:<100").await, "(_duration >= 100)");
        assert_eq!(compile(&s, "level:>abc").await, "(severity_text > 'abc')");
    }

    #[tokio::test]
    async fn test_ranges() {
        let (s, _) = serializer_with(&[], true).await;
        assert_eq!(compile(&s, "duration:[10 TO 20]").await, "(_duration BETWEEN 10 AND 20)");
        assert_eq!(compile(&s, "-duration:[10 TO 20]").await, "(_duration NOT BETWEEN 10 AND 20)");
        assert_eq!(compile(&s, "duration:{10 TO 20]").await, "(_duration > 10 AND _duration <= 20)");
        assert_eq!(compile(&s, "level:[a TO c]").await, "(severity_text BETWEEN 'a' AND 'c')");
        assert_eq!(compile(&s, "nope:[1 TO 2]").await, "(1 = 0)");
    }

    #[tokio::test]
    async fn test_operators_and_groups() {
        let (s, _) = serializer_with(&[], false).await;
        assert_eq!(
            compile(&s, "a AND NOT (b OR c)").await,
            "(_source ILIKE '%a%') AND NOT ((_source ILIKE '%b%') OR (_source ILIKE '%c%'))"
        );
        assert_eq!(compile(&s, "NOT a").await, "NOT (_source ILIKE '%a%')");
        assert_eq!(
            compile(&s, "a OR NOT b").await,
            "(_source ILIKE '%a%') OR NOT (_source ILIKE '%b%')"
        );
        assert_eq!(
            compile(&s, "level:(info OR warn)").await,
            "((severity_text ILIKE '%info%') OR (severity_text ILIKE '%warn%'))"
        );
    }

    #[tokio::test]
    async fn test_literal_round_trip() {
        let (s, _) = serializer_with(&[], false).await;
        assert_eq!(
            compile(&s, "body:http://example.com/a").await,
            "(_hdx_body ILIKE '%http://example.com/a%')"
        );
        assert_eq!(
            compile(&s, "service:\"say \\\"hi\\\"\"").await,
            r#"(_service = 'say \"hi\"')"#
        );
        assert_eq!(compile(&s, r"C\:\\temp").await, r"(_source ILIKE '%C:\\temp%')");
    }

    #[tokio::test]
    async fn test_blank_query() {
        let (s, _) = serializer_with(&[], true).await;
        assert_eq!(compile(&s, "").await, "");
    }

    #[tokio::test]
    async fn test_explain() {
        assert_eq!(explain("level:info").await, "'level' contains info");
        assert_eq!(explain("foo*").await, "event starts with foo");
        assert_eq!(explain("-foo").await, "event does not have whole word foo");
        assert_eq!(explain("service:\"api\" -level:*").await, "'service' is api AND 'level' is null");
        assert_eq!(explain("duration:>5").await, "'duration' is greater than 5");
        assert_eq!(explain("duration:[1 TO 2]").await, "duration is between 1 and 2");
        assert_eq!(explain("foo \"bar").await, "Message containing foo \"bar");
    }
}
