//! Periodic alert evaluation
//!
//! Every tick walks the full alert set. Each alert is floored to its own
//! window, guarded against double evaluation through its history rows and
//! evaluated independently of the others: one failing alert is logged and
//! never stops the rest of the tick.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use futures::future::join_all;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::alert::{
    does_exceed_threshold, Alert, AlertHistory, AlertSource, AlertState, AlertStore, Dashboard, DisplayType,
    LastValue, SavedSearch, Tile,
};
use crate::ast::FieldRef;
use crate::error::{AlertStoreError, EvaluationError};
use crate::event_store::{numeric_cell, text_cell, EventStore, ResultSet};
use crate::notify::{AlertTarget, MessageView, Notifier};
use crate::query_builder::{CountQuery, SearchQueryBuilder, TimeRange, TimestampColumn};
use crate::schema_cache::{MappingKind, MappingScope, SchemaCacheRegistry};
use crate::serializer::{Serializer, SerializerOptions, SqlSerializer};

const COUNT_COLUMN: &str = "count";
const BUCKET_COLUMN: &str = "ts_bucket";
const GROUP_COLUMN: &str = "group";

/// Floors `time` to a multiple of `minutes` since the epoch
pub fn round_down_to_minutes(time: DateTime<Utc>, minutes: u32) -> DateTime<Utc> {
    let step = i64::from(minutes.max(1)) * 60_000;
    let floored = time.timestamp_millis().div_euclid(step) * step;
    Utc.timestamp_millis_opt(floored).single().unwrap_or(time)
}

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub frontend_url: String,
    pub use_tokenization: bool,
    /// How far back schema inference looks
    pub schema_lookback: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            frontend_url: "http://localhost:8080".to_string(),
            use_tokenization: false,
            schema_lookback: Duration::days(1),
        }
    }
}

/// 跳过评估的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    /// History for this window already exists
    AlreadyEvaluated,
    UnsupportedSource,
    MissingTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    Evaluated { state: AlertState, fired: u32 },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub evaluated: usize,
    pub fired: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// The count query inputs of one alert, whatever its source
enum Target {
    Search(SavedSearch),
    Tile { dashboard: Dashboard, tile: Tile },
}

impl Target {
    fn view(&self) -> AlertTarget<'_> {
        match self {
            Target::Search(saved_search) => AlertTarget::Search(saved_search),
            Target::Tile { dashboard, tile } => AlertTarget::Tile { dashboard, tile },
        }
    }

    fn query(&self) -> &str {
        match self {
            Target::Search(saved_search) => &saved_search.query,
            Target::Tile { tile, .. } => &tile.query,
        }
    }

    fn table(&self) -> &str {
        match self {
            Target::Search(saved_search) => &saved_search.table,
            Target::Tile { tile, .. } => &tile.table,
        }
    }

    fn timestamp(&self) -> &TimestampColumn {
        match self {
            Target::Search(saved_search) => &saved_search.timestamp,
            Target::Tile { tile, .. } => &tile.timestamp,
        }
    }

    fn group_by<'a>(&'a self, alert: &'a Alert) -> Option<&'a str> {
        match self {
            Target::Search(_) => alert.group_by.as_deref(),
            Target::Tile { tile, .. } => tile.group_by.as_deref(),
        }
    }
}

pub struct AlertEvaluator {
    alerts: Arc<dyn AlertStore>,
    events: Arc<dyn EventStore>,
    schemas: Arc<SchemaCacheRegistry>,
    notifier: Arc<dyn Notifier>,
    config: EvaluatorConfig,
}

impl AlertEvaluator {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        events: Arc<dyn EventStore>,
        schemas: Arc<SchemaCacheRegistry>,
        notifier: Arc<dyn Notifier>,
        config: EvaluatorConfig,
    ) -> Self {
        Self {
            alerts,
            events,
            schemas,
            notifier,
            config,
        }
    }

    /// Evaluates every alert once for the tick at `now`
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<TickSummary, EvaluationError> {
        let alerts = self.alerts.alerts().await?;
        info!(alerts = alerts.len(), "checking alerts");

        let outcomes = join_all(alerts.iter().map(|alert| async move {
            let outcome = self.process_alert(alert, now).await;
            if let Err(err) = &outcome {
                error!(alert_id = %alert.id, error = %err, "failed to process alert");
            }
            outcome
        }))
        .await;

        let mut summary = TickSummary::default();
        for outcome in outcomes {
            match outcome {
                Ok(AlertOutcome::Evaluated { fired, .. }) => {
                    summary.evaluated += 1;
                    if fired > 0 {
                        summary.fired += 1;
                    }
                }
                Ok(AlertOutcome::Skipped(_)) => summary.skipped += 1,
                Err(_) => summary.failed += 1,
            }
        }
        Ok(summary)
    }

    /// Ticks forever on a fixed period
    pub async fn run_periodically(&self, period: std::time::Duration) {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match self.run_tick(Utc::now()).await {
                Ok(summary) => debug!(?summary, "alert tick finished"),
                Err(err) => error!(error = %err, "cannot load alerts"),
            }
        }
    }

    async fn resolve_target(&self, alert: &Alert) -> Result<Result<Target, SkipReason>, EvaluationError> {
        match &alert.source {
            AlertSource::Search { saved_search_id } => match self.alerts.saved_search(saved_search_id).await? {
                Some(saved_search) => Ok(Ok(Target::Search(saved_search))),
                None => {
                    error!(alert_id = %alert.id, saved_search_id = %saved_search_id, "saved search not found");
                    Ok(Err(SkipReason::MissingTarget))
                }
            },
            AlertSource::Tile { dashboard_id, tile_id } => {
                let Some(dashboard) = self.alerts.dashboard(dashboard_id).await? else {
                    error!(alert_id = %alert.id, dashboard_id = %dashboard_id, "dashboard not found");
                    return Ok(Err(SkipReason::MissingTarget));
                };
                let Some(tile) = dashboard.tile(tile_id).cloned() else {
                    error!(alert_id = %alert.id, tile_id = %tile_id, "tile not found");
                    return Ok(Err(SkipReason::MissingTarget));
                };
                // 目前只支持折线图
                if tile.display_type != DisplayType::Line {
                    warn!(alert_id = %alert.id, tile_id = %tile_id, "unsupported tile display type");
                    return Ok(Err(SkipReason::UnsupportedSource));
                }
                Ok(Ok(Target::Tile { dashboard, tile }))
            }
        }
    }

    pub async fn process_alert(&self, alert: &Alert, now: DateTime<Utc>) -> Result<AlertOutcome, EvaluationError> {
        if alert.state == AlertState::Disabled {
            return Ok(AlertOutcome::Skipped(SkipReason::Disabled));
        }
        let target = match self.resolve_target(alert).await? {
            Ok(target) => target,
            Err(reason) => return Ok(AlertOutcome::Skipped(reason)),
        };

        let window_minutes = alert.interval.minutes();
        let tick_floor = round_down_to_minutes(now, window_minutes);
        let previous = self.alerts.latest_history(&alert.id).await?;
        if previous.as_ref().is_some_and(|history| history.created_at == tick_floor) {
            info!(
                alert_id = %alert.id,
                tick_floor = %tick_floor,
                "skipped to check alert since the time diff is still less than 1 window size"
            );
            return Ok(AlertOutcome::Skipped(SkipReason::AlreadyEvaluated));
        }

        let start = previous
            .map(|history| history.created_at)
            .unwrap_or_else(|| tick_floor - Duration::minutes(i64::from(window_minutes)));
        let range = TimeRange::new(start, tick_floor);

        // 先写入历史，标记该窗口已消费
        let mut history = AlertHistory::new(alert.id.clone(), tick_floor);
        match self.alerts.insert_history(history.clone()).await {
            Ok(()) => {}
            Err(AlertStoreError::DuplicateHistory { .. }) => {
                return Ok(AlertOutcome::Skipped(SkipReason::AlreadyEvaluated));
            }
            Err(err) => return Err(err.into()),
        }

        let sql = self.count_sql(alert, &target, &range, now).await?;
        debug!(alert_id = %alert.id, sql = %sql, "alert count query");
        let result = self.events.query(&sql).await?;

        let group_by = target.group_by(alert);
        let silenced = alert.is_silenced(now);
        let mut state = AlertState::Ok;

        let buckets = buckets(&result, group_by, range.start);
        if result.rows() > 0 && buckets.is_empty() {
            state = AlertState::InsufficientData;
        }
        for bucket in buckets {
            if does_exceed_threshold(alert.threshold_type, alert.threshold, bucket.value) {
                state = AlertState::Alert;
                info!(alert_id = %alert.id, value = bucket.value, group = %bucket.group, "triggering webhook alarm");
                if silenced {
                    info!(alert_id = %alert.id, "alert is silenced, skipping notification");
                } else {
                    let view = MessageView {
                        alert,
                        target: target.view(),
                        group: &bucket.group,
                        value: bucket.value,
                        start_time: bucket.start_time,
                        end_time: bucket.start_time + Duration::minutes(i64::from(window_minutes)),
                    };
                    let message = view.message(&self.config.frontend_url);
                    if let Err(err) = self.notifier.notify(&alert.channel, &message).await {
                        error!(alert_id = %alert.id, error = %err, "failed to fire channel event");
                    }
                }
                history.counts += 1;
            }
            history.last_values.push(LastValue {
                start_time: bucket.start_time,
                count: bucket.value,
            });
        }

        history.state = state;
        self.alerts.update_history(&history).await?;
        self.alerts.set_state(&alert.id, state).await?;
        Ok(AlertOutcome::Evaluated {
            state,
            fired: history.counts,
        })
    }

    async fn count_sql(
        &self,
        alert: &Alert,
        target: &Target,
        range: &TimeRange,
        now: DateTime<Utc>,
    ) -> Result<String, EvaluationError> {
        let scope = MappingScope {
            tenant: alert.tenant.clone(),
            table: target.table().to_string(),
            since_ms: (now - self.config.schema_lookback).timestamp_millis(),
            until_ms: now.timestamp_millis(),
            table_version: None,
        };
        let cache = self.schemas.acquire(MappingKind::Logs, scope).await;
        let serializer = SqlSerializer::for_cache(
            cache,
            SerializerOptions {
                use_tokenization: self.config.use_tokenization,
            },
        );

        let mut builder = SearchQueryBuilder::new(target.query(), &serializer)
            .for_tenant(&alert.tenant)
            .timestamp_in_between(range, target.timestamp());
        let mut group_column = None;
        if let Some(group_by) = target.group_by(alert) {
            let field = FieldRef::Named(group_by.to_string());
            let resolution = serializer.resolve(&field).await;
            let Some(column) = resolution.column() else {
                return Err(EvaluationError::UnknownGroupBy(group_by.to_string()));
            };
            group_column = Some(column.to_string());
            let exists = serializer.is_not_null(&field, false).await;
            builder = builder.and(&exists);
        }
        let where_clause = builder.build().await;

        Ok(CountQuery {
            table: target.table(),
            timestamp: target.timestamp(),
            where_clause: &where_clause,
            group_by: group_column.as_deref(),
            bucket_minutes: alert.interval.minutes(),
        }
        .to_sql())
    }
}

struct Bucket {
    start_time: DateTime<Utc>,
    value: f64,
    group: String,
}

fn bucket_start(row: &Map<String, Value>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    let Some(raw) = text_cell(row, BUCKET_COLUMN) else {
        return fallback;
    };
    if let Ok(time) = DateTime::parse_from_rfc3339(&raw) {
        return time.with_timezone(&Utc);
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(fallback)
}

/// Rows with a usable count. An empty ungrouped result counts as zero.
fn buckets(result: &ResultSet, group_by: Option<&str>, window_start: DateTime<Utc>) -> Vec<Bucket> {
    if result.rows() == 0 && group_by.is_none() {
        return vec![Bucket {
            start_time: window_start,
            value: 0.0,
            group: String::new(),
        }];
    }
    result
        .data
        .iter()
        .filter_map(|row| {
            let value = numeric_cell(row, COUNT_COLUMN)?;
            let group = match group_by {
                Some(name) => format!("{}:{}", name, text_cell(row, GROUP_COLUMN).unwrap_or_default()),
                None => String::new(),
            };
            Some(Bucket {
                start_time: bucket_start(row, window_start),
                value,
                group,
            })
        })
        .collect()
}
