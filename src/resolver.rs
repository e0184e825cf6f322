//! Field name to column expression resolution.
//!
//! Two strategies, picked when the serializer is built:
//! - [`PropertyMappingResolver`]: fixed structural columns, then the tenant's
//!   schema type cache (`_<type>_attributes['name']`).
//! - [`CustomSchemaResolver`]: a user-defined table, resolved against its
//!   column catalog.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::ast::FieldRef;
use crate::error::EventStoreError;
use crate::event_store::{ColumnMeta, EventStore};
use crate::schema_cache::{ScalarType, SchemaTypeCache};
use crate::sql::string_literal;

/// Where a resolved column lives. Existence checks differ per origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnOrigin {
    /// Fixed internal column
    Structural,
    /// Entry of one of the `_<type>_attributes` maps
    Dynamic,
    /// Column (or sub-path) of a custom table
    Column,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldResolution {
    pub column_expression: Option<String>,
    pub inferred_type: Option<ScalarType>,
    pub found: bool,
    pub origin: ColumnOrigin,
}

impl FieldResolution {
    fn resolved(column_expression: String, inferred_type: Option<ScalarType>, origin: ColumnOrigin) -> Self {
        Self {
            column_expression: Some(column_expression),
            inferred_type,
            found: true,
            origin,
        }
    }

    pub fn not_found() -> Self {
        Self {
            column_expression: None,
            inferred_type: None,
            found: false,
            origin: ColumnOrigin::Dynamic,
        }
    }

    /// The column expression, only when the field was found
    pub fn column(&self) -> Option<&str> {
        if self.found {
            self.column_expression.as_deref()
        } else {
            None
        }
    }
}

#[async_trait]
pub trait FieldResolver: Send + Sync {
    async fn resolve(&self, field: &FieldRef) -> FieldResolution;
}

pub const IMPLICIT_COLUMN: &str = "_source";

/// name, physical expression, fixed type
const STRUCTURAL_COLUMNS: &[(&str, &str, Option<ScalarType>)] = &[
    ("body", "_hdx_body", Some(ScalarType::String)),
    ("duration", "_duration", Some(ScalarType::Number)),
    ("end_timestamp", "end_timestamp", None),
    ("host", "_host", Some(ScalarType::String)),
    ("hyperdx_event_size", "_hyperdx_event_size", Some(ScalarType::Number)),
    ("hyperdx_platform", "_platform", Some(ScalarType::String)),
    ("level", "severity_text", Some(ScalarType::String)),
    ("parent_span_id", "parent_span_id", Some(ScalarType::String)),
    ("rum_session_id", "_rum_session_id", Some(ScalarType::String)),
    ("service", "_service", Some(ScalarType::String)),
    ("span_id", "span_id", Some(ScalarType::String)),
    ("span_name", "span_name", Some(ScalarType::String)),
    ("timestamp", "timestamp", None),
    ("trace_id", "trace_id", Some(ScalarType::String)),
    ("userEmail", "_user_email", Some(ScalarType::String)),
    ("userId", "_user_id", Some(ScalarType::String)),
    ("userName", "_user_name", Some(ScalarType::String)),
    (
        "object.regarding.kind",
        "coalesce(_string_attributes['object.regarding.kind'], _string_attributes['object.involvedObject.kind'])",
        None,
    ),
    (
        "object.regarding.name",
        "coalesce(_string_attributes['object.regarding.name'], _string_attributes['object.involvedObject.name'])",
        None,
    ),
];

/// Resolves against the fixed structural column table only
pub fn structural_column(field: &FieldRef) -> Option<FieldResolution> {
    match field {
        FieldRef::Implicit => Some(FieldResolution::resolved(
            IMPLICIT_COLUMN.to_string(),
            Some(ScalarType::String),
            ColumnOrigin::Structural,
        )),
        FieldRef::Named(name) => STRUCTURAL_COLUMNS
            .iter()
            .find(|(structural, _, _)| *structural == name.as_str())
            .map(|(_, expression, scalar)| {
                FieldResolution::resolved(expression.to_string(), *scalar, ColumnOrigin::Structural)
            }),
    }
}

/// `_<type>_attributes['name']`
pub fn dynamic_column(scalar: ScalarType, name: &str) -> String {
    format!("_{}_attributes[{}]", scalar, string_literal(name))
}

/// Structural table first, then the schema type cache. A miss triggers at
/// most one incremental refresh over the lifetime of the resolver, so build
/// one per compiled query.
pub struct PropertyMappingResolver {
    cache: Arc<SchemaTypeCache>,
    refreshed: AtomicBool,
}

impl PropertyMappingResolver {
    pub fn new(cache: Arc<SchemaTypeCache>) -> Self {
        Self {
            cache,
            refreshed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl FieldResolver for PropertyMappingResolver {
    async fn resolve(&self, field: &FieldRef) -> FieldResolution {
        if let Some(resolution) = structural_column(field) {
            return resolution;
        }
        let FieldRef::Named(name) = field else {
            return FieldResolution::not_found();
        };

        let mut scalar = self.cache.get(name);
        if scalar.is_none() && !self.refreshed.swap(true, Ordering::SeqCst) {
            debug!(tenant = %self.cache.tenant(), property = %name, "unknown property, refreshing mappings");
            // 刷新失败时沿用旧的快照
            let _ = self.cache.refresh(true).await;
            scalar = self.cache.get(name);
        }

        match scalar {
            Some(scalar) => FieldResolution::resolved(dynamic_column(scalar, name), Some(scalar), ColumnOrigin::Dynamic),
            None => FieldResolution::not_found(),
        }
    }
}

fn map_value_type() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s+(\w+)\)$").expect("static regex"))
}

/// Scalar type of a store column type, looking through `Nullable`/`LowCardinality`
pub fn scalar_from_column_type(column_type: &str) -> Option<ScalarType> {
    let mut inner = column_type.trim();
    loop {
        let unwrapped = ["Nullable(", "LowCardinality("].iter().find_map(|wrapper| {
            inner
                .strip_prefix(wrapper)
                .and_then(|rest| rest.strip_suffix(')'))
        });
        match unwrapped {
            Some(rest) => inner = rest,
            None => break,
        }
    }

    if ["String", "FixedString", "Enum", "UUID"].iter().any(|p| inner.starts_with(p)) {
        Some(ScalarType::String)
    } else if ["Int", "UInt", "Float", "Decimal"].iter().any(|p| inner.starts_with(p)) {
        Some(ScalarType::Number)
    } else if inner == "Bool" {
        Some(ScalarType::Bool)
    } else {
        None
    }
}

/// Resolves fields of a custom table:
/// - exact column name
/// - `map.key` on a `Map(K, V)` column → `map['key']`
/// - `json.a.b` on a `String` column → `JSONExtractString(json, 'a', 'b')`
pub struct CustomSchemaResolver {
    columns: HashMap<String, String>,
    implicit_column: Option<String>,
}

impl CustomSchemaResolver {
    pub fn new(columns: Vec<ColumnMeta>, implicit_column: Option<String>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .map(|column| (column.name, column.column_type))
                .collect(),
            implicit_column,
        }
    }

    /// Reads the column catalog of `table`
    pub async fn load(
        store: &dyn EventStore,
        table: &str,
        implicit_column: Option<String>,
    ) -> Result<Self, EventStoreError> {
        let columns = store.describe(table).await?;
        Ok(Self::new(columns, implicit_column))
    }

    fn resolve_named(&self, field: &str) -> FieldResolution {
        if let Some(column_type) = self.columns.get(field) {
            return FieldResolution::resolved(
                field.to_string(),
                scalar_from_column_type(column_type),
                ColumnOrigin::Column,
            );
        }

        let Some((prefix, postfix)) = field.split_once('.') else {
            return FieldResolution::not_found();
        };
        let Some(column_type) = self.columns.get(prefix) else {
            return FieldResolution::not_found();
        };

        if column_type.starts_with("Map") {
            let value_type = map_value_type()
                .captures(column_type)
                .and_then(|captures| captures.get(1))
                .and_then(|m| scalar_from_column_type(m.as_str()));
            FieldResolution::resolved(
                format!("{}[{}]", prefix, string_literal(postfix)),
                value_type,
                ColumnOrigin::Column,
            )
        } else if column_type == "String" {
            let path: Vec<String> = postfix.split('.').map(string_literal).collect();
            FieldResolution::resolved(
                format!("JSONExtractString({}, {})", prefix, path.join(", ")),
                Some(ScalarType::String),
                ColumnOrigin::Column,
            )
        } else {
            warn!(field = %field, column_type = %column_type, "unsupported column type for sub-field access");
            FieldResolution::not_found()
        }
    }
}

#[async_trait]
impl FieldResolver for CustomSchemaResolver {
    async fn resolve(&self, field: &FieldRef) -> FieldResolution {
        match field {
            FieldRef::Implicit => match &self.implicit_column {
                Some(column) => FieldResolution::resolved(column.clone(), Some(ScalarType::String), ColumnOrigin::Column),
                None => FieldResolution::not_found(),
            },
            FieldRef::Named(name) => self.resolve_named(name),
        }
    }
}
