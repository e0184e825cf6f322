//! Per-tenant property type cache.
//!
//! Dynamic properties live in three attribute maps (`_string_attributes`,
//! `_number_attributes`, `_bool_attributes`), so the type of a property is only
//! known by observing which map it was written to. The observed mapping is
//! inferred from recent events, kept in memory as an immutable snapshot and
//! shared with other instances through a TTL cache store.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use sea_query::{Alias, Expr, MysqlQueryBuilder, Query};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::cache_store::{CacheStore, SetTtl, Ttl};
use crate::error::{EventStoreError, SchemaCacheError};
use crate::event_store::{string_array_cell, EventStore};
use crate::sql::{ms_to_ns, TableName, TENANT_COLUMN};

/// Remaining TTL below which a snapshot should be rebuilt before it expires.
pub const EXPIRY_GUARD_BAND: Duration = Duration::from_secs(2 * 60 * 60);

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEV_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Number,
    Bool,
}

impl ScalarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Number => "number",
            ScalarType::Bool => "bool",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type PropertyTypeMap = HashMap<String, ScalarType>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingKind {
    Logs,
    Metrics,
}

impl MappingKind {
    pub fn cache_key(&self, tenant: &str, table: &str) -> String {
        match self {
            MappingKind::Logs => format!("logs_property_type_mappings:{}:{}", tenant, table),
            MappingKind::Metrics => format!("metrics_property_type_mappings:{}:{}", tenant, table),
        }
    }
}

/// What a refresh is allowed to look at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingScope {
    pub tenant: String,
    pub table: String,
    /// Look-back window in unix milliseconds
    pub since_ms: i64,
    pub until_ms: i64,
    pub table_version: Option<u32>,
}

impl MappingScope {
    /// Physical table. A schema version selects `<table>_v<version>`.
    pub fn table_name(&self) -> String {
        match self.table_version {
            Some(version) => format!("{}_v{}", self.table, version),
            None => self.table.clone(),
        }
    }
}

/// Authoritative property types
#[async_trait]
pub trait MappingSource: Send + Sync {
    async fn fetch(&self, kind: MappingKind, scope: &MappingScope) -> Result<PropertyTypeMap, EventStoreError>;
}

/// Infers property types from the keys observed in each attribute map.
pub struct EventStoreMappingSource {
    store: Arc<dyn EventStore>,
}

impl EventStoreMappingSource {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    pub fn inference_sql(kind: MappingKind, scope: &MappingScope) -> String {
        let mut select = Query::select();
        select.expr_as(
            Expr::cust("groupUniqArrayArray(mapKeys(_string_attributes))"),
            Alias::new("strings"),
        );
        if kind == MappingKind::Logs {
            select
                .expr_as(
                    Expr::cust("groupUniqArrayArray(mapKeys(_number_attributes))"),
                    Alias::new("numbers"),
                )
                .expr_as(
                    Expr::cust("groupUniqArrayArray(mapKeys(_bool_attributes))"),
                    Alias::new("bools"),
                );
        }
        select
            .from(TableName(scope.table_name()))
            .and_where(Expr::col(Alias::new(TENANT_COLUMN)).eq(scope.tenant.as_str()))
            .and_where(Expr::col(Alias::new("_timestamp_sort_key")).gte(ms_to_ns(scope.since_ms)))
            .and_where(Expr::col(Alias::new("_timestamp_sort_key")).lte(ms_to_ns(scope.until_ms)));
        select.to_string(MysqlQueryBuilder)
    }
}

#[async_trait]
impl MappingSource for EventStoreMappingSource {
    async fn fetch(&self, kind: MappingKind, scope: &MappingScope) -> Result<PropertyTypeMap, EventStoreError> {
        let sql = Self::inference_sql(kind, scope);
        let started = std::time::Instant::now();
        let result = self.store.query(&sql).await?;
        info!(
            tenant = %scope.tenant,
            table_version = ?scope.table_version,
            took_ms = started.elapsed().as_millis() as u64,
            "fetched property type mappings"
        );

        let mut mapping = PropertyTypeMap::new();
        // 聚合查询只会返回一行，其他情况视为没有数据
        if let [row] = result.data.as_slice() {
            for (column, scalar) in [
                ("strings", ScalarType::String),
                ("numbers", ScalarType::Number),
                ("bools", ScalarType::Bool),
            ] {
                for property in string_array_cell(row, column) {
                    mapping.insert(property, scalar);
                }
            }
        }
        Ok(mapping)
    }
}

/// Fixed mappings, for seeding and tests. Counts how often it is asked.
#[derive(Debug, Default)]
pub struct StaticMappingSource {
    mappings: Mutex<PropertyTypeMap>,
    calls: AtomicUsize,
}

impl StaticMappingSource {
    pub fn new(mappings: PropertyTypeMap) -> Self {
        Self {
            mappings: Mutex::new(mappings),
            calls: AtomicUsize::new(0),
        }
    }

    /// Replaces what subsequent fetches return
    pub fn set(&self, mappings: PropertyTypeMap) {
        *self.mappings.lock() = mappings;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MappingSource for StaticMappingSource {
    async fn fetch(&self, _kind: MappingKind, _scope: &MappingScope) -> Result<PropertyTypeMap, EventStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.mappings.lock().clone())
    }
}

pub struct SchemaTypeCache {
    kind: MappingKind,
    tenant: String,
    cache_key: String,
    /// Tenant and table are fixed, the look-back window moves with each use
    scope: RwLock<MappingScope>,
    ttl: Duration,
    source: Arc<dyn MappingSource>,
    store: Arc<dyn CacheStore>,
    snapshot: RwLock<Arc<PropertyTypeMap>>,
}

impl SchemaTypeCache {
    pub fn new(
        kind: MappingKind,
        scope: MappingScope,
        ttl: Duration,
        source: Arc<dyn MappingSource>,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            kind,
            tenant: scope.tenant.clone(),
            cache_key: kind.cache_key(&scope.tenant, &scope.table_name()),
            scope: RwLock::new(scope),
            ttl,
            source,
            store,
            snapshot: RwLock::new(Arc::new(PropertyTypeMap::new())),
        }
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn scope(&self) -> MappingScope {
        self.scope.read().clone()
    }

    /// Moves the look-back window used by later refreshes
    pub fn set_window(&self, since_ms: i64, until_ms: i64) {
        let mut scope = self.scope.write();
        scope.since_ms = since_ms;
        scope.until_ms = until_ms;
    }

    pub fn get(&self, property: &str) -> Option<ScalarType> {
        self.snapshot.read().get(property).copied()
    }

    pub fn size(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn snapshot(&self) -> Arc<PropertyTypeMap> {
        self.snapshot.read().clone()
    }

    /// Fetches the current mappings and merges (`incremental`) or replaces the snapshot.
    /// An incremental refresh keeps the stored TTL, a full one restarts it.
    pub async fn refresh(&self, incremental: bool) -> Result<(), SchemaCacheError> {
        info!(tenant = %self.tenant, incremental, "property type mappings refresh start");
        match self.try_refresh(incremental).await {
            Ok(size) => {
                info!(tenant = %self.tenant, incremental, size, "property type mappings refresh success");
                Ok(())
            }
            Err(err) => {
                error!(tenant = %self.tenant, incremental, error = %err, "property type mappings refresh error");
                Err(err)
            }
        }
    }

    async fn try_refresh(&self, incremental: bool) -> Result<usize, SchemaCacheError> {
        let scope = self.scope();
        let fetched = self.source.fetch(self.kind, &scope).await?;

        let next = if incremental {
            let mut merged = (*self.snapshot()).clone();
            merged.extend(fetched);
            merged
        } else {
            fetched
        };
        let serialized = encode_mappings(&next)?;
        let size = next.len();
        *self.snapshot.write() = Arc::new(next);

        let ttl = if incremental { SetTtl::KeepTtl } else { SetTtl::Px(self.ttl) };
        self.store.set(&self.cache_key, serialized, ttl).await?;
        Ok(size)
    }

    /// Hydrates from the cache store, or performs a full refresh on a miss.
    pub async fn init(&self) -> Result<(), SchemaCacheError> {
        let cached = self.store.get(&self.cache_key).await?;
        match cached.map(|raw| decode_mappings(&raw)) {
            Some(Ok(mappings)) => {
                info!(tenant = %self.tenant, size = mappings.len(), "property type mappings init: cache hit");
                *self.snapshot.write() = Arc::new(mappings);
                Ok(())
            }
            Some(Err(err)) => {
                warn!(tenant = %self.tenant, error = %err, "property type mappings init: unreadable cache entry");
                self.refresh(false).await
            }
            None => {
                info!(tenant = %self.tenant, "property type mappings init: cache miss");
                self.refresh(false).await
            }
        }
    }

    pub async fn remaining_ttl(&self) -> Result<Ttl, SchemaCacheError> {
        Ok(self.store.pttl(&self.cache_key).await?)
    }

    pub async fn is_about_to_expire(&self) -> Result<bool, SchemaCacheError> {
        Ok(match self.remaining_ttl().await? {
            Ttl::Missing => true,
            Ttl::Persistent => false,
            Ttl::Remaining(remaining) => remaining < EXPIRY_GUARD_BAND,
        })
    }
}

/// `[[name, type], ...]`, the layout other instances read
fn encode_mappings(mappings: &PropertyTypeMap) -> Result<String, serde_json::Error> {
    let mut pairs: Vec<(&String, &ScalarType)> = mappings.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    serde_json::to_string(&pairs)
}

fn decode_mappings(raw: &str) -> Result<PropertyTypeMap, serde_json::Error> {
    let pairs: Vec<(String, ScalarType)> = serde_json::from_str(raw)?;
    Ok(pairs.into_iter().collect())
}

/// One cache per (kind, tenant, table), initialised on first use and rebuilt
/// in full when its stored copy is about to expire. Every acquire moves the
/// cache's look-back window to the caller's.
pub struct SchemaCacheRegistry {
    ttl: Duration,
    source: Arc<dyn MappingSource>,
    store: Arc<dyn CacheStore>,
    caches: Mutex<HashMap<(MappingKind, String, String), Arc<SchemaTypeCache>>>,
}

impl SchemaCacheRegistry {
    pub fn new(ttl: Duration, source: Arc<dyn MappingSource>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            ttl,
            source,
            store,
            caches: Mutex::new(HashMap::new()),
        }
    }

    /// Refresh failures are logged and leave the previous snapshot in place.
    pub async fn acquire(&self, kind: MappingKind, scope: MappingScope) -> Arc<SchemaTypeCache> {
        let key = (kind, scope.tenant.clone(), scope.table_name());
        let existing = self.caches.lock().get(&key).cloned();

        match existing {
            Some(cache) => {
                cache.set_window(scope.since_ms, scope.until_ms);
                match cache.is_about_to_expire().await {
                    Ok(true) => {
                        let _ = cache.refresh(false).await;
                    }
                    Ok(false) => {}
                    Err(err) => warn!(tenant = %scope.tenant, error = %err, "cannot read property type mappings ttl"),
                }
                cache
            }
            None => {
                let cache = Arc::new(SchemaTypeCache::new(
                    kind,
                    scope,
                    self.ttl,
                    Arc::clone(&self.source),
                    Arc::clone(&self.store),
                ));
                if let Err(err) = cache.init().await {
                    warn!(tenant = %cache.tenant(), error = %err, "property type mappings init failed");
                }
                let mut caches = self.caches.lock();
                Arc::clone(caches.entry(key).or_insert(cache))
            }
        }
    }
}
